//! Error types for the dsqdata core
//!
//! The taxonomy here is closed and mirrors the reader's error-reporting
//! surface: every failure a consumer can observe is one of these variants.
//! End-of-stream is deliberately *not* a variant: it is represented by
//! [`crate::DsqDataReader::read`] returning `Ok(None)`, since it is a normal
//! termination signal rather than an error.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while opening or reading a digital sequence database.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// One of the three backing files (`.dsqi`, `.dsqm`, `.dsqs`) could not be opened.
    #[error("could not open database file {path}: {source}")]
    NotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The index header's magic word, format version, or geometry is
    /// inconsistent with the expected format (including cross-endian files).
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// The caller-supplied alphabet does not match the database's alphabet.
    #[error("alphabet incompatible: database has K={db_k} sentinel={db_sentinel}, caller supplied K={caller_k} sentinel={caller_sentinel}")]
    AlphabetIncompatible {
        db_k: u32,
        db_sentinel: u8,
        caller_k: u32,
        caller_sentinel: u8,
    },

    /// A structural invariant of the on-disk data was violated: a
    /// non-monotone index offset, a metadata cursor overrun, an invalid
    /// packed residue field, or a short read where the index promised more
    /// bytes.
    #[error("corruption: {0}")]
    Corruption(String),

    /// An underlying read returned fewer bytes than requested for reasons
    /// the corruption checks above don't explain (e.g. a genuinely
    /// truncated file at a record boundary).
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A buffer whose size is driven by on-disk (and therefore untrusted)
    /// values could not be allocated. Distinguished from other errors so
    /// callers can treat it as the exceptional condition it is, rather than
    /// a normal format problem.
    #[error("allocation failure: requested {requested} bytes")]
    Alloc { requested: usize },
}

/// Format-level problems detected while parsing the index file header.
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("bad magic word 0x{0:08x} (wrong format, or file written on a differently-endian machine)")]
    BadMagic(u32),

    #[error("unsupported index format version {0}")]
    UnsupportedVersion(u8),

    #[error("index header is truncated: expected at least {expected} bytes, file has {actual}")]
    TruncatedHeader { expected: usize, actual: usize },

    #[error("invalid alphabet geometry: K={0} exceeds the maximum packable symbol count")]
    InvalidAlphabetSize(u32),
}

impl Error {
    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }
}
