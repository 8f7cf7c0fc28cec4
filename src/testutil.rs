//! A minimal single-threaded writer for building DSQDATA fixtures
//!
//! This is test and demo support only: no compression, no format
//! negotiation, no concurrency, and no performance requirements. It
//! exists so this crate's own tests (and anyone exercising
//! [`crate::DsqDataReader`] without a real Easel toolchain on hand) have
//! a way to produce the three-file, stub-fronted layout the reader
//! expects.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::alphabet::{Alphabet, PACKED_SENTINEL_FIELD};
use crate::error::Error;
use crate::format::{self, IndexFileHeader, IndexRecord, EOS_BIT};
use crate::Result;

/// One sequence to write into a fixture database.
pub struct TestSequence {
    pub name: Vec<u8>,
    pub accession: Vec<u8>,
    pub description: Vec<u8>,
    pub taxid: Option<i32>,
    /// Digital residues in `0..alphabet.k()`.
    pub residues: Vec<u8>,
}

impl TestSequence {
    #[must_use]
    pub fn new(name: &str, residues: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.as_bytes().to_vec(),
            accession: Vec::new(),
            description: Vec::new(),
            taxid: None,
            residues: residues.into(),
        }
    }
}

/// Packs `residues` into 32-bit 5-bit-residue words, setting the
/// end-of-sequence bit on the final word. Mirrors the encoding
/// [`crate::unpacker`] decodes.
fn pack_residues(residues: &[u8]) -> Vec<u8> {
    let mut words = Vec::new();
    let mut chunks = residues.chunks(6).peekable();
    let sentinel = u32::from(PACKED_SENTINEL_FIELD);
    if chunks.peek().is_none() {
        let mut word = EOS_BIT;
        for i in 0..6 {
            word |= sentinel << ((5 - i) * 5);
        }
        words.extend_from_slice(&word.to_ne_bytes());
        return words;
    }
    while let Some(group) = chunks.next() {
        let mut word: u32 = 0;
        for i in 0..6 {
            let field = group.get(i).map_or(sentinel, |&r| u32::from(r));
            word |= field << ((5 - i) * 5);
        }
        if chunks.peek().is_none() {
            word |= EOS_BIT;
        }
        words.extend_from_slice(&word.to_ne_bytes());
    }
    words
}

/// Writes a fixture database at `base_name`: `base_name` itself (a
/// plain-text stub), `base_name.dsqi`, `base_name.dsqm` and
/// `base_name.dsqs`.
///
/// # Errors
///
/// Returns [`Error::Io`] if any of the four files cannot be created or
/// written.
pub fn write_database(base_name: &Path, alphabet: &Alphabet, sequences: &[TestSequence]) -> Result<()> {
    let (index_path, metadata_path, sequence_path) = format::backing_paths(base_name);

    let mut psq_cursor: i64 = 0;
    let mut meta_cursor: i64 = 0;
    let mut records = Vec::with_capacity(sequences.len());
    let mut psq_buf = Vec::new();
    let mut meta_buf = Vec::new();

    for seq in sequences {
        let words = pack_residues(&seq.residues);
        psq_cursor += words.len() as i64;
        psq_buf.extend_from_slice(&words);

        meta_buf.extend_from_slice(&seq.name);
        meta_buf.push(0);
        meta_buf.extend_from_slice(&seq.accession);
        meta_buf.push(0);
        meta_buf.extend_from_slice(&seq.description);
        meta_buf.push(0);
        let mut taxid_bytes = [0u8; 4];
        LittleEndian::write_i32(&mut taxid_bytes, seq.taxid.unwrap_or(-1));
        meta_buf.extend_from_slice(&taxid_bytes);
        meta_cursor += (seq.name.len() + 1 + seq.accession.len() + 1 + seq.description.len() + 1 + 4) as i64;

        records.push(IndexRecord {
            metadata_end: meta_cursor,
            psq_end: psq_cursor,
        });
    }

    let header = IndexFileHeader::new(alphabet, sequences.len() as u64);

    let mut index_writer = BufWriter::new(open_for_write(&index_path)?);
    header.write_to(&mut index_writer)?;
    for record in &records {
        record
            .write_to(&mut index_writer)
            .map_err(|source| io_err(&index_path, source))?;
    }
    index_writer.flush().map_err(|source| io_err(&index_path, source))?;

    let mut metadata_writer = BufWriter::new(open_for_write(&metadata_path)?);
    metadata_writer
        .write_all(&meta_buf)
        .map_err(|source| io_err(&metadata_path, source))?;
    metadata_writer
        .flush()
        .map_err(|source| io_err(&metadata_path, source))?;

    let mut sequence_writer = BufWriter::new(open_for_write(&sequence_path)?);
    sequence_writer
        .write_all(&psq_buf)
        .map_err(|source| io_err(&sequence_path, source))?;
    sequence_writer
        .flush()
        .map_err(|source| io_err(&sequence_path, source))?;

    let mut stub = open_for_write(base_name)?;
    writeln!(stub, "DSQDATA stub").map_err(|source| io_err(base_name, source))?;
    writeln!(stub, "format {}", format::FORMAT_VERSION).map_err(|source| io_err(base_name, source))?;
    writeln!(stub, "nseq {}", sequences.len()).map_err(|source| io_err(base_name, source))?;

    Ok(())
}

fn open_for_write(path: &Path) -> Result<File> {
    File::create(path).map_err(|source| io_err(path, source))
}

fn io_err(path: &Path, source: std::io::Error) -> Error {
    Error::Io {
        path: path.to_path_buf(),
        source,
    }
}
