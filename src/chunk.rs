//! The chunk: the in-memory unit of transfer through the pipeline (§3, §4.4)
//!
//! A [`Chunk`] holds up to `cap` sequences' packed bytes, their unpacked
//! digital residues, per-sequence metadata pointers, and a metadata byte
//! buffer. It is created and destroyed only by the loader thread (§4.2,
//! §9 "Allocator/destroyer asymmetry"); every other holder only borrows or
//! moves it by value through the pipeline's slots.
//!
//! `smem` is the one deliberately tricky piece of storage here: the
//! packed 32-bit words for this load sit in its last `4 * pn` bytes,
//! while the unpacker decodes residues into the *same* buffer starting
//! from byte 0. This is the in-place unpacking aliasing trick from §4.3 /
//! §9: because each packed word is copied into a local variable before
//! any byte derived from it is written, and because the write cursor
//! provably never overtakes the read cursor (6 output bytes can be
//! produced per 4 input bytes, but the write cursor starts `smem.len() -
//! 4*pn` bytes behind the read cursor and the two only meet exactly at
//! the end), decoding can proceed without a second allocation. This file
//! only owns the storage and the bookkeeping arrays; the decode loop
//! itself lives in [`crate::unpacker`].

use crate::error::{Error, Result};
use crate::format::RESIDUES_PER_WORD;

/// A single sequence's view into a [`Chunk`], returned by [`Chunk::iter`].
///
/// A lightweight reference into the chunk's buffers rather than an
/// owned copy.
#[derive(Debug, Clone, Copy)]
pub struct SeqRef<'a> {
    index: u64,
    len: u32,
    taxid: i32,
    name: &'a [u8],
    acc: &'a [u8],
    desc: &'a [u8],
    /// The decoded sequence *including* both bookending sentinel bytes:
    /// `dsq[0]` is the leading sentinel, `dsq[1..=len]` are residues in
    /// `0..K`, `dsq[len + 1]` is the trailing sentinel.
    dsq: &'a [u8],
}

impl<'a> SeqRef<'a> {
    /// Absolute index of this sequence within the database.
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Number of residues (excludes both sentinels).
    #[must_use]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Taxonomy id, or `None` if the database recorded it as unknown (-1).
    #[must_use]
    pub fn taxid(&self) -> Option<i32> {
        if self.taxid == -1 {
            None
        } else {
            Some(self.taxid)
        }
    }

    #[must_use]
    pub fn name(&self) -> &'a [u8] {
        self.name
    }

    #[must_use]
    pub fn accession(&self) -> &'a [u8] {
        self.acc
    }

    #[must_use]
    pub fn description(&self) -> &'a [u8] {
        self.desc
    }

    /// The digital residues bookended by the sentinel byte on either side,
    /// per §6's 1-indexed convention: `dsq()[0]` and `dsq()[len()+1]` are
    /// sentinels, `dsq()[1..=len()]` are residues in `0..K`.
    #[must_use]
    pub fn dsq(&self) -> &'a [u8] {
        self.dsq
    }

    /// Just the residues, with no bookending sentinels.
    #[must_use]
    pub fn residues(&self) -> &'a [u8] {
        &self.dsq[1..=self.len as usize]
    }
}

/// Iterator over the sequences held in a [`Chunk`], in ascending absolute
/// index order (invariant 3, §3).
pub struct ChunkIter<'a> {
    chunk: &'a Chunk,
    pos: usize,
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = SeqRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.chunk.n {
            return None;
        }
        let i = self.pos;
        self.pos += 1;
        let start = self.chunk.starts[i] as usize;
        let len = self.chunk.lens[i];
        let (ns, ne) = self.chunk.name_ranges[i];
        let (accs, acce) = self.chunk.acc_ranges[i];
        let (ds, de) = self.chunk.desc_ranges[i];
        Some(SeqRef {
            index: self.chunk.i0 + i as u64,
            len,
            taxid: self.chunk.taxids[i],
            name: &self.chunk.metadata[ns as usize..ne as usize],
            acc: &self.chunk.metadata[accs as usize..acce as usize],
            desc: &self.chunk.metadata[ds as usize..de as usize],
            dsq: &self.chunk.smem[start - 1..start + len as usize + 1],
        })
    }
}

impl<'a> IntoIterator for &'a Chunk {
    type Item = SeqRef<'a>;
    type IntoIter = ChunkIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// The fixed-capacity buffer passed hand-to-hand through the pipeline.
pub struct Chunk {
    /// Absolute index of the first sequence in this chunk.
    pub(crate) i0: u64,
    /// Number of sequences currently loaded (0 means end-of-stream).
    pub(crate) n: usize,
    /// Number of packed 32-bit words currently loaded.
    pub(crate) pn: usize,
    /// Number of sequences the loader intends for this batch; the
    /// unpacker decodes until `n` reaches this value and treats any
    /// other outcome (too few words, too many) as corruption.
    pub(crate) pending_n: usize,
    /// Maximum sequences this chunk can hold.
    cap: usize,
    /// Current packed-word capacity `smem` is sized for (may grow past the
    /// configured `CHUNK_MAX_WORDS` for an oversized single-record load).
    max_words: usize,
    /// Single backing buffer: unpacked residues grow from the front,
    /// packed words occupy the last `4 * pn` bytes. See module docs for
    /// why these are allowed to alias.
    pub(crate) smem: Vec<u8>,
    /// Offset into `smem` of each sequence's first residue.
    pub(crate) starts: Vec<u32>,
    /// Residue count of each sequence.
    pub(crate) lens: Vec<u32>,
    pub(crate) name_ranges: Vec<(u32, u32)>,
    pub(crate) acc_ranges: Vec<(u32, u32)>,
    pub(crate) desc_ranges: Vec<(u32, u32)>,
    pub(crate) taxids: Vec<i32>,
    /// Raw metadata bytes fetched for the sequences currently loaded.
    pub(crate) metadata: Vec<u8>,
}

impl Chunk {
    fn smem_capacity_for(cap: usize, max_words: usize) -> usize {
        (max_words * RESIDUES_PER_WORD as usize) + cap + 1
    }

    /// Allocates a fresh, empty chunk sized to hold up to `cap` sequences
    /// and `max_words` packed 32-bit words.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Alloc`] if the backing buffers cannot be allocated.
    pub fn new(cap: usize, max_words: usize) -> Result<Self> {
        let smem_len = Self::smem_capacity_for(cap, max_words);
        let mut smem = Vec::new();
        smem.try_reserve_exact(smem_len)
            .map_err(|_| Error::Alloc { requested: smem_len })?;
        smem.resize(smem_len, 0);
        Ok(Self {
            i0: 0,
            n: 0,
            pn: 0,
            pending_n: 0,
            cap,
            max_words,
            smem,
            starts: Vec::with_capacity(cap),
            lens: Vec::with_capacity(cap),
            name_ranges: Vec::with_capacity(cap),
            acc_ranges: Vec::with_capacity(cap),
            desc_ranges: Vec::with_capacity(cap),
            taxids: Vec::with_capacity(cap),
            metadata: Vec::new(),
        })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Absolute index of this chunk's first sequence.
    #[must_use]
    pub fn i0(&self) -> u64 {
        self.i0
    }

    /// Number of sequences in this chunk. Zero means end-of-stream.
    #[must_use]
    pub fn n(&self) -> usize {
        self.n
    }

    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        self.n == 0
    }

    /// Iterates over the sequences in this chunk, in ascending index order.
    #[must_use]
    pub fn iter(&self) -> ChunkIter<'_> {
        ChunkIter {
            chunk: self,
            pos: 0,
        }
    }

    /// Clears a chunk for reuse and records the absolute index of the
    /// first sequence about to be loaded into it.
    pub(crate) fn reset_for_load(&mut self, i0: u64) {
        self.i0 = i0;
        self.n = 0;
        self.pn = 0;
        self.pending_n = 0;
        self.starts.clear();
        self.lens.clear();
        self.name_ranges.clear();
        self.acc_ranges.clear();
        self.desc_ranges.clear();
        self.taxids.clear();
        self.metadata.clear();
    }

    /// Ensures `smem` can hold `pn` packed words alongside `n` sequences'
    /// worth of unpacked residues, growing it (rare: only for the
    /// oversized-single-record case of §4.2 step 3) if necessary. Growth
    /// is permanent: once a chunk has grown, it keeps the larger size for
    /// the rest of its life.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Alloc`] if growth is needed but allocation fails.
    pub(crate) fn ensure_capacity_for(&mut self, pn: usize, n: usize) -> Result<()> {
        if pn > self.max_words || n > self.cap {
            let new_max_words = pn.max(self.max_words);
            let new_cap = n.max(self.cap);
            let needed = Self::smem_capacity_for(new_cap, new_max_words);
            self.smem
                .try_reserve_exact(needed.saturating_sub(self.smem.len()))
                .map_err(|_| Error::Alloc { requested: needed })?;
            self.smem.resize(needed, 0);
            self.max_words = new_max_words;
            self.cap = new_cap;
        }
        Ok(())
    }

    /// Mutable slice at the tail of `smem`, sized to hold `pn` packed
    /// 32-bit words as raw native-endian bytes. The loader reads the
    /// packed sequence file directly into this region; this is the only
    /// write to the packed region that happens before it is consumed.
    pub(crate) fn packed_region_mut(&mut self, pn: usize) -> &mut [u8] {
        self.pn = pn;
        let len = self.smem.len();
        &mut self.smem[len - pn * 4..]
    }

    /// Grows the metadata buffer (doubling policy, §4.2 step 5) to fit at
    /// least `needed` bytes and returns a mutable slice of exactly that
    /// size for the loader to fetch metadata bytes into.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Alloc`] if the buffer cannot be allocated.
    pub(crate) fn metadata_region_mut(&mut self, needed: usize) -> Result<&mut [u8]> {
        if self.metadata.capacity() < needed {
            let mut target = self.metadata.capacity().max(4096);
            while target < needed {
                target *= 2;
            }
            self.metadata
                .try_reserve_exact(target.saturating_sub(self.metadata.len()))
                .map_err(|_| Error::Alloc { requested: target })?;
        }
        self.metadata.resize(needed, 0);
        Ok(&mut self.metadata[..needed])
    }

    /// Sets the number of sequences this batch is expected to resolve
    /// to once unpacked.
    pub(crate) fn set_pending(&mut self, pending_n: usize) {
        self.pending_n = pending_n;
    }

    /// Records a freshly-decoded sequence's extent: `start` is the offset
    /// in `smem` of its first residue, `len` its residue count.
    pub(crate) fn push_sequence(&mut self, start: u32, len: u32) {
        self.starts.push(start);
        self.lens.push(len);
        self.n += 1;
    }

    /// Records the metadata pointer ranges and taxonomy id resolved for
    /// the sequence most recently added via [`Chunk::push_sequence`].
    pub(crate) fn set_metadata_pointers(
        &mut self,
        name: (u32, u32),
        acc: (u32, u32),
        desc: (u32, u32),
        taxid: i32,
    ) {
        self.name_ranges.push(name);
        self.acc_ranges.push(acc);
        self.desc_ranges.push(desc);
        self.taxids.push(taxid);
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_fresh_chunk_is_end_of_stream() {
        let chunk = Chunk::new(4, 24).unwrap();
        assert!(chunk.is_end_of_stream());
        assert_eq!(chunk.n(), 0);
        assert_eq!(chunk.iter().count(), 0);
    }

    #[test]
    fn test_push_sequence_and_iter() {
        let mut chunk = Chunk::new(4, 24).unwrap();
        chunk.reset_for_load(10);
        chunk.set_pending(1);

        chunk.smem[0] = 127;
        chunk.smem[1] = 3;
        chunk.smem[2] = 5;
        chunk.smem[3] = 127;
        chunk.metadata.extend_from_slice(b"seq1\0acc1\0desc1\0");
        chunk.metadata.extend_from_slice(&(-1i32).to_le_bytes());

        chunk.push_sequence(1, 2);
        chunk.set_metadata_pointers((0, 4), (5, 9), (10, 15), -1);

        assert_eq!(chunk.i0(), 10);
        assert_eq!(chunk.n(), 1);
        assert!(!chunk.is_end_of_stream());

        let seq_ref = chunk.iter().next().unwrap();
        assert_eq!(seq_ref.index(), 10);
        assert_eq!(seq_ref.len(), 2);
        assert_eq!(seq_ref.name(), b"seq1");
        assert_eq!(seq_ref.accession(), b"acc1");
        assert_eq!(seq_ref.description(), b"desc1");
        assert_eq!(seq_ref.taxid(), None);
        assert_eq!(seq_ref.residues(), &[3, 5]);
        assert_eq!(seq_ref.dsq(), &[127, 3, 5, 127]);
    }

    #[test]
    fn test_reset_for_load_clears_bookkeeping() {
        let mut chunk = Chunk::new(4, 24).unwrap();
        chunk.reset_for_load(0);
        chunk.set_pending(1);
        chunk.push_sequence(0, 1);
        chunk.set_metadata_pointers((0, 0), (0, 0), (0, 0), 7);

        chunk.reset_for_load(5);
        assert_eq!(chunk.i0(), 5);
        assert_eq!(chunk.n(), 0);
        assert_eq!(chunk.pending_n, 0);
        assert!(chunk.starts.is_empty());
        assert!(chunk.taxids.is_empty());
        assert!(chunk.metadata.is_empty());
    }

    #[test]
    fn test_ensure_capacity_for_grows_permanently() {
        let mut chunk = Chunk::new(2, 4).unwrap();
        assert_eq!(chunk.capacity(), 2);

        chunk.ensure_capacity_for(100, 50).unwrap();
        assert!(chunk.capacity() >= 50);
        assert!(chunk.smem.len() >= Chunk::smem_capacity_for(50, 100));

        // Growth sticks even if a later request is smaller.
        chunk.ensure_capacity_for(1, 1).unwrap();
        assert!(chunk.capacity() >= 50);
    }

    #[test]
    fn test_metadata_region_mut_doubling_growth() {
        let mut chunk = Chunk::new(4, 24).unwrap();
        let region = chunk.metadata_region_mut(10).unwrap();
        assert_eq!(region.len(), 10);
        region.copy_from_slice(&[1u8; 10]);

        let region = chunk.metadata_region_mut(9000).unwrap();
        assert_eq!(region.len(), 9000);
    }
}
