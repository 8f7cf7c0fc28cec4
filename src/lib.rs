//! A high-performance streaming reader for Easel digital sequence
//! databases (DSQDATA).
//!
//! A DSQDATA database packs millions of biological sequences into three
//! binary files behind a human-readable stub: an index (`.dsqi`), a
//! metadata stream (`.dsqm`), and 5-bit-packed digital residues
//! (`.dsqs`). Reading one back is a small pipeline rather than a single
//! function call: a loader thread streams bytes off disk into
//! fixed-capacity [`Chunk`]s, an unpacker thread decodes those chunks'
//! packed residues in place, and any number of consumer threads call
//! [`DsqDataReader::read`] to pull finished chunks off the far end,
//! returning each one to [`DsqDataReader::recycle`] when they're done
//! with it.
//!
//! ```no_run
//! use dsqdata::DsqDataReader;
//!
//! # fn main() -> dsqdata::Result<()> {
//! let reader = DsqDataReader::open("proteins", None)?;
//! while let Some(chunk) = reader.read()? {
//!     for seq in chunk.iter() {
//!         let _ = seq.residues();
//!     }
//!     reader.recycle(chunk);
//! }
//! reader.close()?;
//! # Ok(())
//! # }
//! ```

mod alphabet;
mod chunk;
mod error;
mod format;
mod loader;
mod reader;
mod slot;
mod unpacker;

pub mod prelude;
pub mod testutil;

pub use alphabet::{Alphabet, AlphabetSlot};
pub use chunk::{Chunk, ChunkIter, SeqRef};
pub use error::{Error, FormatError, Result};
pub use format::{DEFAULT_CHUNK_CAPACITY, DEFAULT_CHUNK_MAX_WORDS};
pub use reader::{DsqDataReader, DsqDataReaderBuilder};
