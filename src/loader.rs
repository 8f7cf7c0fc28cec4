//! The loader thread (§4.2)
//!
//! The loader owns the three backing files and is the only thread that
//! allocates or frees [`Chunk`]s (§9 "Allocator/destroyer asymmetry").
//! Each iteration it:
//!
//! 1. acquires a chunk, from the recycling stack or freshly allocated,
//!    blocking if the live-chunk cap has been reached;
//! 2. refills its index-record window if needed, keeping any records
//!    left over from the previous iteration;
//! 3. picks `nload`, the largest run of upcoming records whose packed
//!    words fit within `CHUNK_MAX_WORDS`, via binary search over the
//!    window's cumulative word counts (falling back to a single,
//!    possibly oversized record when even one record doesn't fit);
//! 4. reads that run's packed bytes and metadata bytes straight into the
//!    chunk's buffers;
//! 5. publishes the chunk to `loader_outbox` for the unpacker.
//!
//! Reaching the end of the index produces exactly one zero-sequence
//! chunk, after which the loader exits. A fatal error takes the same
//! path: it is recorded in the shared error slot and followed by a
//! zero-sequence chunk, so a `Read` call blocked on the pipeline always
//! unblocks.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::chunk::Chunk;
use crate::error::Error;
use crate::format::{self, IndexRecord};
use crate::slot::{RecyclingStack, Slot};
use crate::Result;

/// Read-ahead window size, in index records, kept buffered in memory.
/// Large enough to always cover one chunk's worth of records without
/// re-reading the index file on every iteration.
const INDEX_WINDOW: usize = 8192;

pub(crate) struct LoaderConfig {
    pub(crate) index_path: PathBuf,
    pub(crate) metadata_path: PathBuf,
    pub(crate) sequence_path: PathBuf,
    pub(crate) chunk_capacity: usize,
    pub(crate) chunk_max_words: usize,
    pub(crate) nseq: u64,
}

struct LoaderState {
    index_reader: BufReader<File>,
    metadata_reader: BufReader<File>,
    sequence_reader: BufReader<File>,
    window: VecDeque<IndexRecord>,
    nseq: u64,
    /// Cumulative end offsets of the last record already consumed.
    prev_meta_end: i64,
    prev_psq_end: i64,
    chunk_capacity: usize,
    chunk_max_words: usize,
    /// Absolute index of the next sequence to be loaded.
    i0_next: u64,
}

impl LoaderState {
    fn open(cfg: &LoaderConfig) -> Result<Self> {
        let index_file = File::open(&cfg.index_path).map_err(|source| Error::NotFound {
            path: cfg.index_path.clone(),
            source,
        })?;
        let metadata_file = File::open(&cfg.metadata_path).map_err(|source| Error::NotFound {
            path: cfg.metadata_path.clone(),
            source,
        })?;
        let sequence_file = File::open(&cfg.sequence_path).map_err(|source| Error::NotFound {
            path: cfg.sequence_path.clone(),
            source,
        })?;
        let mut index_reader = BufReader::new(index_file);
        let _header = format::IndexFileHeader::read_from(&mut index_reader)?;
        Ok(Self {
            index_reader,
            metadata_reader: BufReader::new(metadata_file),
            sequence_reader: BufReader::new(sequence_file),
            window: VecDeque::with_capacity(INDEX_WINDOW),
            nseq: cfg.nseq,
            prev_meta_end: 0,
            prev_psq_end: 0,
            chunk_capacity: cfg.chunk_capacity,
            chunk_max_words: cfg.chunk_max_words,
            i0_next: 0,
        })
    }

    /// Tops up `window` with records read from the index file, keeping
    /// whatever is left over from the previous iteration (the "index
    /// window carryover" of §4.2).
    fn refill_window(&mut self) -> Result<()> {
        let consumed = self.i0_next + self.window.len() as u64;
        let remaining_in_db = self.nseq.saturating_sub(consumed);
        let want = INDEX_WINDOW.saturating_sub(self.window.len()) as u64;
        let to_read = want.min(remaining_in_db) as usize;
        if to_read == 0 {
            return Ok(());
        }
        let mut buf = vec![0u8; to_read * format::SIZE_INDEX_RECORD];
        self.index_reader.read_exact(&mut buf).map_err(|e| {
            Error::corruption(format!(
                "index file ended early: expected {to_read} more records: {e}"
            ))
        })?;
        for record in format::parse_index_records(&buf) {
            self.window.push_back(record);
        }
        Ok(())
    }

    /// Picks the run length `m` (1..=available) maximizing sequences
    /// loaded while keeping cumulative packed words within
    /// `chunk_max_words`, via binary search over the window's
    /// monotonically non-decreasing cumulative word counts.
    fn pick_nload(&self, available: usize) -> usize {
        let words_through = |m: usize| -> i64 { (self.window[m - 1].psq_end - self.prev_psq_end) / 4 };

        if words_through(1) as usize > self.chunk_max_words {
            return 1;
        }
        let mut lo = 1usize;
        let mut hi = available;
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if words_through(mid) as usize <= self.chunk_max_words {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        lo
    }

    /// Loads the next batch of sequences into `chunk`, or leaves it
    /// marked end-of-stream if the database is exhausted.
    fn load_into(&mut self, chunk: &mut Chunk) -> Result<()> {
        chunk.reset_for_load(self.i0_next);

        self.refill_window()?;

        if self.window.is_empty() {
            return Ok(());
        }

        let available = self.window.len().min(self.chunk_capacity);
        let nload = self.pick_nload(available);

        let last = self.window[nload - 1];
        if last.psq_end < self.prev_psq_end || last.metadata_end < self.prev_meta_end {
            return Err(Error::corruption(
                "index offsets are not monotonically increasing",
            ));
        }
        if (last.psq_end - self.prev_psq_end) % 4 != 0 {
            return Err(Error::corruption(
                "packed sequence extent is not a whole number of 32-bit words",
            ));
        }
        let nwords = ((last.psq_end - self.prev_psq_end) / 4) as usize;
        let nmeta = (last.metadata_end - self.prev_meta_end) as usize;

        chunk.ensure_capacity_for(nwords, nload)?;
        chunk.set_pending(nload);

        self.sequence_reader
            .read_exact(chunk.packed_region_mut(nwords))
            .map_err(|source| Error::Io {
                path: PathBuf::from("<sequence file>"),
                source,
            })?;

        let meta_buf = chunk.metadata_region_mut(nmeta)?;
        self.metadata_reader
            .read_exact(meta_buf)
            .map_err(|source| Error::Io {
                path: PathBuf::from("<metadata file>"),
                source,
            })?;

        self.prev_psq_end = last.psq_end;
        self.prev_meta_end = last.metadata_end;
        for _ in 0..nload {
            self.window.pop_front();
        }
        self.i0_next += nload as u64;

        Ok(())
    }
}

/// Runs the loader thread body to completion.
pub(crate) fn run(
    cfg: LoaderConfig,
    recycling: Arc<RecyclingStack>,
    outbox: Arc<Slot<Chunk>>,
    error_slot: Arc<Mutex<Option<Error>>>,
) {
    let chunk_capacity = cfg.chunk_capacity;
    let chunk_max_words = cfg.chunk_max_words;

    let mut state = match LoaderState::open(&cfg) {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "loader failed to open backing files");
            fail(&error_slot, &outbox, chunk_capacity, chunk_max_words, err);
            return;
        }
    };

    loop {
        let chunk = match recycling.acquire(|| Chunk::new(chunk_capacity, chunk_max_words)) {
            Some(Ok(chunk)) => chunk,
            Some(Err(err)) => {
                tracing::error!(error = %err, "loader could not allocate a chunk");
                fail(&error_slot, &outbox, chunk_capacity, chunk_max_words, err);
                return;
            }
            None => return,
        };
        let mut chunk = chunk;

        if let Err(err) = state.load_into(&mut chunk) {
            tracing::error!(error = %err, "loader hit a corrupt or unreadable database");
            let i0 = chunk.i0();
            chunk.reset_for_load(i0);
            *error_slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(err);
            if let Some(chunk) = outbox.put(chunk) {
                recycling.recycle(chunk);
            }
            return;
        }

        let is_eos = chunk.pending_n == 0;
        tracing::debug!(
            i0 = chunk.i0(),
            pending = chunk.pending_n,
            eos = is_eos,
            "loader publishing chunk"
        );
        if let Some(chunk) = outbox.put(chunk) {
            recycling.recycle(chunk);
            return;
        }
        if is_eos {
            return;
        }
    }
}

fn fail(
    error_slot: &Arc<Mutex<Option<Error>>>,
    outbox: &Arc<Slot<Chunk>>,
    chunk_capacity: usize,
    chunk_max_words: usize,
    err: Error,
) {
    *error_slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(err);
    if let Ok(placeholder) = Chunk::new(chunk_capacity.max(1), chunk_max_words.max(1)) {
        let _ = outbox.put(placeholder);
    }
}
