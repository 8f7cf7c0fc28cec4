//! Minimal alphabet collaborator
//!
//! The full biological alphabet abstraction (symbol tables, degeneracy
//! maps, complementation) lives elsewhere in Easel and is out of scope
//! here (§1). The DSQDATA core only needs three facts about an alphabet to
//! open and decode a database: how many real symbols it has (`K`), which
//! byte value is the sentinel, and a name for error messages. This module
//! provides exactly that surface, as a stand-in for the real collaborator.

/// A biological alphabet, reduced to what the reader needs: symbol count
/// and sentinel value.
///
/// Digital residues produced by the unpacker fall in `0..k`; the
/// `sentinel` byte (always `>= k` as an unpacked byte, and always the
/// reserved packed field value `31` on disk) delimits each sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alphabet {
    /// Number of real symbols in the alphabet (e.g. 20 for unambiguous
    /// amino acids, up to the 31 that 5-bit packing can address).
    k: u32,
    /// The sentinel byte value used to bookend each sequence in `smem`.
    sentinel: u8,
}

/// The packed-word sentinel field value (all-ones in 5 bits); see §6.
pub const PACKED_SENTINEL_FIELD: u8 = 31;

/// Largest symbol count a 5-bit packed residue field can represent,
/// reserving the all-ones field for the sentinel.
pub const MAX_K: u32 = 31;

impl Alphabet {
    /// Builds an alphabet with `k` real symbols and the given unpacked
    /// sentinel byte.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::FormatError::InvalidAlphabetSize`] if `k`
    /// exceeds what 5-bit packing can address.
    pub fn new(k: u32, sentinel: u8) -> crate::Result<Self> {
        if k == 0 || k > MAX_K {
            return Err(crate::error::FormatError::InvalidAlphabetSize(k).into());
        }
        Ok(Self { k, sentinel })
    }

    /// The amino acid alphabet used by protein DSQDATA databases: 20
    /// unambiguous residues, packed with a sentinel value of 127.
    #[must_use]
    pub fn amino() -> Self {
        Self {
            k: 20,
            sentinel: 127,
        }
    }

    /// Number of real symbols in this alphabet.
    #[must_use]
    pub fn k(&self) -> u32 {
        self.k
    }

    /// The unpacked sentinel byte that bookends every sequence.
    #[must_use]
    pub fn sentinel(&self) -> u8 {
        self.sentinel
    }

    /// Returns `true` if `other` describes the same symbol count and
    /// sentinel value as `self`.
    #[must_use]
    pub fn compatible_with(&self, other: &Alphabet) -> bool {
        self.k == other.k && self.sentinel == other.sentinel
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self::amino()
    }
}

/// The partial-bypass convention used by [`crate::DsqDataReader::open`]: an
/// empty slot is filled in by the reader from the database; a populated
/// slot is validated against the database and left untouched on success.
pub type AlphabetSlot = Option<Alphabet>;

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_amino_defaults() {
        let a = Alphabet::amino();
        assert_eq!(a.k(), 20);
        assert_eq!(a.sentinel(), 127);
        assert_eq!(a, Alphabet::default());
    }

    #[test]
    fn test_compatible_with() {
        let a = Alphabet::new(20, 127).unwrap();
        let b = Alphabet::new(20, 127).unwrap();
        let c = Alphabet::new(4, 127).unwrap();
        assert!(a.compatible_with(&b));
        assert!(!a.compatible_with(&c));
    }

    #[test]
    fn test_rejects_zero_and_oversized_k() {
        assert!(Alphabet::new(0, 0).is_err());
        assert!(Alphabet::new(32, 0).is_err());
        assert!(Alphabet::new(31, 0).is_ok());
    }
}
