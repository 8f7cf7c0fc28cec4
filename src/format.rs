//! On-disk layout for a DSQDATA database
//!
//! A database identified by a base name occupies four files (§3, §6):
//! the base name itself (a human-readable stub, not parsed here), and
//! `.dsqi` / `.dsqm` / `.dsqs` for the index, metadata and packed
//! sequence data respectively. This module is the single place that knows
//! the byte layout of all of them.

use byteorder::{ByteOrder, LittleEndian};
use std::io::{Read, Write};

use crate::alphabet::Alphabet;
use crate::error::{Error, FormatError};
use crate::Result;

/// Suffix of the index file.
pub const SUFFIX_INDEX: &str = "dsqi";
/// Suffix of the metadata file.
pub const SUFFIX_METADATA: &str = "dsqm";
/// Suffix of the packed sequence file.
pub const SUFFIX_SEQUENCE: &str = "dsqs";

/// Magic word identifying a DSQDATA index file: "DSQD" read as a
/// little-endian `u32`. Reading this word back on a cross-endian machine
/// yields a different value, which is how Open detects the mismatch
/// (rejection, not byteswap, per §9).
pub const MAGIC: u32 = 0x4451_5344;

/// Current index format version.
pub const FORMAT_VERSION: u8 = 1;

/// Fixed size in bytes of the index file header.
pub const SIZE_INDEX_HEADER: usize = 32;

/// Fixed size in bytes of one index record (two `i64` offsets, §6).
pub const SIZE_INDEX_RECORD: usize = 16;

/// Maximum number of sequences held in one chunk (the compile-time `C` of §3).
pub const DEFAULT_CHUNK_CAPACITY: usize = 4096;

/// Maximum number of packed 32-bit words loaded into one chunk (§4.2).
pub const DEFAULT_CHUNK_MAX_WORDS: usize = 4096 * 6;

/// Bit 31 of a packed word: set on the last word of a sequence.
pub const EOS_BIT: u32 = 1 << 31;
/// Bit 30 of a packed word: packing-mode tag. `0` means 5-bit packing,
/// the only mode this reader decodes (§6); a set bit is reserved for
/// 2-bit nucleotide packing and out of scope here.
pub const MODE_BIT: u32 = 1 << 30;
/// Number of 5-bit residue fields packed into one 32-bit word.
pub const RESIDUES_PER_WORD: u32 = 6;
/// Width in bits of one residue field.
pub const FIELD_BITS: u32 = 5;
/// Mask for a single 5-bit field.
pub const FIELD_MASK: u32 = 0b1_1111;

/// Header that opens the `.dsqi` file: magic, format version, the
/// database's alphabet geometry, and the total record count. This is the
/// one concrete detail this crate adds beyond the distilled spec (see
/// `SPEC_FULL.md` §C) to give Open a place to perform its magic-word /
/// byte-order check and to discover the alphabet when the caller's slot
/// is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexFileHeader {
    pub magic: u32,
    pub format: u8,
    pub k: u32,
    pub sentinel: u8,
    pub nseq: u64,
}

impl IndexFileHeader {
    #[must_use]
    pub fn new(alphabet: &Alphabet, nseq: u64) -> Self {
        Self {
            magic: MAGIC,
            format: FORMAT_VERSION,
            k: alphabet.k(),
            sentinel: alphabet.sentinel(),
            nseq,
        }
    }

    /// Parses a header from a fixed-size buffer, validating the magic
    /// word and format version.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::BadMagic`] or [`FormatError::UnsupportedVersion`]
    /// on a malformed or cross-endian file.
    pub fn from_bytes(buf: &[u8; SIZE_INDEX_HEADER]) -> Result<Self> {
        let magic = LittleEndian::read_u32(&buf[0..4]);
        if magic != MAGIC {
            return Err(FormatError::BadMagic(magic).into());
        }
        let format = buf[4];
        if format != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(format).into());
        }
        let k = LittleEndian::read_u32(&buf[5..9]);
        let sentinel = buf[9];
        let nseq = LittleEndian::read_u64(&buf[10..18]);
        Ok(Self {
            magic,
            format,
            k,
            sentinel,
            nseq,
        })
    }

    /// Reads a header from the start of a reader.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`]-shaped failures via the caller's own mapping,
    /// or a [`FormatError`] on invalid contents.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; SIZE_INDEX_HEADER];
        reader.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::from(FormatError::TruncatedHeader {
                    expected: SIZE_INDEX_HEADER,
                    actual: 0,
                })
            } else {
                Error::Corruption(format!("reading index header: {e}"))
            }
        })?;
        Self::from_bytes(&buf)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buf = [0u8; SIZE_INDEX_HEADER];
        LittleEndian::write_u32(&mut buf[0..4], self.magic);
        buf[4] = self.format;
        LittleEndian::write_u32(&mut buf[5..9], self.k);
        buf[9] = self.sentinel;
        LittleEndian::write_u64(&mut buf[10..18], self.nseq);
        writer
            .write_all(&buf)
            .map_err(|e| Error::Corruption(format!("writing index header: {e}")))?;
        Ok(())
    }

    /// The alphabet this header describes.
    ///
    /// # Errors
    ///
    /// Returns a [`FormatError`] if the header's `k` is outside what
    /// 5-bit packing can address, a sign of a corrupt or foreign file
    /// that happened to pass the magic-word check.
    pub fn alphabet(&self) -> Result<Alphabet> {
        Alphabet::new(self.k, self.sentinel)
    }
}

/// One fixed-size index record (§3, §6): the cumulative byte/word extents
/// of sequence `i`'s metadata and packed sequence, one past the last byte
/// / word belonging to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexRecord {
    pub metadata_end: i64,
    pub psq_end: i64,
}

impl IndexRecord {
    #[must_use]
    pub fn from_bytes(buf: &[u8; SIZE_INDEX_RECORD]) -> Self {
        Self {
            metadata_end: LittleEndian::read_i64(&buf[0..8]),
            psq_end: LittleEndian::read_i64(&buf[8..16]),
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        let mut buf = [0u8; SIZE_INDEX_RECORD];
        LittleEndian::write_i64(&mut buf[0..8], self.metadata_end);
        LittleEndian::write_i64(&mut buf[8..16], self.psq_end);
        writer.write_all(&buf)
    }
}

/// Parses a batch of raw bytes (a multiple of [`SIZE_INDEX_RECORD`]) into
/// index records, in file order.
#[must_use]
pub fn parse_index_records(bytes: &[u8]) -> Vec<IndexRecord> {
    bytes
        .chunks_exact(SIZE_INDEX_RECORD)
        .map(|chunk| {
            let mut arr = [0u8; SIZE_INDEX_RECORD];
            arr.copy_from_slice(chunk);
            IndexRecord::from_bytes(&arr)
        })
        .collect()
}

/// Returns the base name's three backing file paths, in the order
/// index, metadata, sequence.
pub fn backing_paths(base_name: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf, std::path::PathBuf) {
    let mut idx = base_name.as_os_str().to_owned();
    idx.push(".");
    idx.push(SUFFIX_INDEX);
    let mut meta = base_name.as_os_str().to_owned();
    meta.push(".");
    meta.push(SUFFIX_METADATA);
    let mut seq = base_name.as_os_str().to_owned();
    seq.push(".");
    seq.push(SUFFIX_SEQUENCE);
    (idx.into(), meta.into(), seq.into())
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_header_round_trip() -> Result<()> {
        let alphabet = Alphabet::amino();
        let header = IndexFileHeader::new(&alphabet, 42);
        let mut buf = Vec::new();
        header.write_to(&mut buf)?;
        assert_eq!(buf.len(), SIZE_INDEX_HEADER);

        let mut cursor = &buf[..];
        let read_back = IndexFileHeader::read_from(&mut cursor)?;
        assert_eq!(read_back, header);
        assert_eq!(read_back.nseq, 42);
        Ok(())
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut buf = [0u8; SIZE_INDEX_HEADER];
        buf[0..4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        let err = IndexFileHeader::from_bytes(&buf).unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::BadMagic(_))));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let alphabet = Alphabet::amino();
        let header = IndexFileHeader::new(&alphabet, 0);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        buf[4] = 99;
        let mut arr = [0u8; SIZE_INDEX_HEADER];
        arr.copy_from_slice(&buf);
        let err = IndexFileHeader::from_bytes(&arr).unwrap_err();
        assert!(matches!(err, Error::Format(FormatError::UnsupportedVersion(99))));
    }

    #[test]
    fn test_record_round_trip() {
        let record = IndexRecord {
            metadata_end: 128,
            psq_end: 64,
        };
        let mut buf = Vec::new();
        record.write_to(&mut buf).unwrap();
        let parsed = parse_index_records(&buf);
        assert_eq!(parsed, vec![record]);
    }

    #[test]
    fn test_backing_paths() {
        let (idx, meta, seq) = backing_paths(std::path::Path::new("/tmp/proteins"));
        assert_eq!(idx, std::path::PathBuf::from("/tmp/proteins.dsqi"));
        assert_eq!(meta, std::path::PathBuf::from("/tmp/proteins.dsqm"));
        assert_eq!(seq, std::path::PathBuf::from("/tmp/proteins.dsqs"));
    }
}
