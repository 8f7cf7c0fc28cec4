//! The reader handle (§4.1)
//!
//! [`DsqDataReader`] is the public entry point: `open` spins up the
//! loader and unpacker threads described in [`crate::loader`] and
//! [`crate::unpacker`], wired together through the [`Slot`] rendezvous
//! points and a [`RecyclingStack`] (§5). `read` and `recycle` are safe
//! to call concurrently from any number of consumer threads; `close`
//! tears the pipeline down deterministically and is idempotent.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::alphabet::{Alphabet, AlphabetSlot};
use crate::chunk::Chunk;
use crate::error::Error;
use crate::format::{self, DEFAULT_CHUNK_CAPACITY, DEFAULT_CHUNK_MAX_WORDS};
use crate::loader::{self, LoaderConfig};
use crate::slot::{RecyclingStack, Slot};
use crate::unpacker;
use crate::Result;

struct Handles {
    loader: JoinHandle<()>,
    unpacker: JoinHandle<()>,
}

/// A handle onto an open digital sequence database.
///
/// Clone-free sharing across consumer threads is expected to happen
/// through `Arc<DsqDataReader>`; every method here takes `&self`.
pub struct DsqDataReader {
    loader_outbox: Arc<Slot<Chunk>>,
    unpacker_outbox: Arc<Slot<Chunk>>,
    recycling: Arc<RecyclingStack>,
    error_slot: Arc<Mutex<Option<Error>>>,
    at_eof: AtomicBool,
    handles: Mutex<Option<Handles>>,
    alphabet: Alphabet,
    nseq: u64,
}

impl DsqDataReader {
    /// Opens the database at `base_name`, using the ambient number of
    /// CPUs to size the consumer pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if a backing file is missing,
    /// [`Error::Format`] if the index header is malformed, and
    /// [`Error::AlphabetIncompatible`] if `alphabet` is supplied and
    /// does not match the database.
    pub fn open(base_name: impl AsRef<Path>, alphabet: AlphabetSlot) -> Result<Self> {
        DsqDataReaderBuilder::new(base_name).alphabet(alphabet).open()
    }

    fn start(
        index_path: PathBuf,
        metadata_path: PathBuf,
        sequence_path: PathBuf,
        alphabet_slot: AlphabetSlot,
        chunk_capacity: usize,
        chunk_max_words: usize,
        nconsumers: usize,
    ) -> Result<Self> {
        let mut index_file = std::fs::File::open(&index_path).map_err(|source| Error::NotFound {
            path: index_path.clone(),
            source,
        })?;
        let header = format::IndexFileHeader::read_from(&mut index_file)?;
        drop(index_file);

        let db_alphabet = header.alphabet()?;
        let alphabet = match alphabet_slot {
            None => db_alphabet,
            Some(caller) => {
                if !caller.compatible_with(&db_alphabet) {
                    return Err(Error::AlphabetIncompatible {
                        db_k: db_alphabet.k(),
                        db_sentinel: db_alphabet.sentinel(),
                        caller_k: caller.k(),
                        caller_sentinel: caller.sentinel(),
                    });
                }
                caller
            }
        };

        let live_cap = nconsumers + 2;
        let recycling = Arc::new(RecyclingStack::new(live_cap));
        let loader_outbox = Arc::new(Slot::new());
        let unpacker_outbox = Arc::new(Slot::new());
        let error_slot = Arc::new(Mutex::new(None));

        let loader_cfg = LoaderConfig {
            index_path,
            metadata_path,
            sequence_path,
            chunk_capacity,
            chunk_max_words,
            nseq: header.nseq,
        };

        let loader_recycling = Arc::clone(&recycling);
        let loader_outbox_producer = Arc::clone(&loader_outbox);
        let loader_error_slot = Arc::clone(&error_slot);
        let loader_handle = std::thread::Builder::new()
            .name("dsqdata-loader".into())
            .spawn(move || loader::run(loader_cfg, loader_recycling, loader_outbox_producer, loader_error_slot))
            .expect("failed to spawn loader thread");

        let unpacker_alphabet = alphabet;
        let unpacker_inbox = Arc::clone(&loader_outbox);
        let unpacker_outbox_producer = Arc::clone(&unpacker_outbox);
        let unpacker_recycling = Arc::clone(&recycling);
        let unpacker_error_slot = Arc::clone(&error_slot);
        let unpacker_handle = std::thread::Builder::new()
            .name("dsqdata-unpacker".into())
            .spawn(move || {
                unpacker::run(
                    unpacker_alphabet,
                    unpacker_inbox,
                    unpacker_outbox_producer,
                    unpacker_recycling,
                    unpacker_error_slot,
                )
            })
            .expect("failed to spawn unpacker thread");

        tracing::info!(nseq = header.nseq, k = alphabet.k(), "database opened");

        Ok(Self {
            loader_outbox,
            unpacker_outbox,
            recycling,
            error_slot,
            at_eof: AtomicBool::new(false),
            handles: Mutex::new(Some(Handles {
                loader: loader_handle,
                unpacker: unpacker_handle,
            })),
            alphabet,
            nseq: header.nseq,
        })
    }

    /// The alphabet this reader validated (or discovered) when opening.
    #[must_use]
    pub fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    /// Total number of sequences in the database.
    #[must_use]
    pub fn nseq(&self) -> u64 {
        self.nseq
    }

    /// Reads the next chunk of sequences, or `Ok(None)` once every
    /// sequence has been delivered.
    ///
    /// Safe to call concurrently from multiple consumer threads: each
    /// chunk is delivered to exactly one caller. Only one end-of-stream
    /// chunk is ever produced by the pipeline, so the consumer that
    /// observes it closes `unpacker_outbox` itself, which wakes every
    /// other consumer blocked in `take` and sends them straight to
    /// `Ok(None)` rather than leaving them waiting on a producer that
    /// has already exited.
    ///
    /// # Errors
    ///
    /// Returns whatever error the loader or unpacker thread recorded
    /// (§7) the first time that failure is observed by a caller.
    pub fn read(&self) -> Result<Option<Chunk>> {
        if self.at_eof.load(Ordering::Acquire) {
            return Ok(None);
        }

        let Some(chunk) = self.unpacker_outbox.take() else {
            self.at_eof.store(true, Ordering::Release);
            return Ok(None);
        };

        if chunk.is_end_of_stream() {
            self.at_eof.store(true, Ordering::Release);
            self.recycling.recycle(chunk);
            self.unpacker_outbox.close();
            let pending = self
                .error_slot
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take();
            return match pending {
                Some(err) => Err(err),
                None => Ok(None),
            };
        }

        Ok(Some(chunk))
    }

    /// Returns a chunk to the recycling pool once its caller is done
    /// with it. The loader reuses recycled chunks before allocating new
    /// ones, keeping the live-chunk count bounded at `nconsumers + 2`.
    pub fn recycle(&self, chunk: Chunk) {
        self.recycling.recycle(chunk);
    }

    /// Tears the pipeline down: wakes the loader and unpacker threads if
    /// they're blocked, drains and drops every reachable chunk, and
    /// joins both threads. Idempotent, and safe to call even if `read`
    /// never reached end-of-stream, including after zero reads, when a
    /// chunk may still be sitting unclaimed in `loader_outbox` or
    /// `unpacker_outbox`.
    ///
    /// # Errors
    ///
    /// Returns an error if the loader or unpacker thread panicked.
    pub fn close(&self) -> Result<()> {
        let handles = self
            .handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let Some(handles) = handles else {
            return Ok(());
        };

        self.recycling.close();
        self.loader_outbox.close();
        self.unpacker_outbox.close();
        self.at_eof.store(true, Ordering::Release);

        handles
            .loader
            .join()
            .map_err(|_| Error::corruption("loader thread panicked"))?;
        handles
            .unpacker
            .join()
            .map_err(|_| Error::corruption("unpacker thread panicked"))?;

        // Both threads have exited, so any chunk still parked in either
        // slot was never claimed by a consumer and won't be; reclaim it
        // here rather than leaving it stranded outside the recycling
        // stack's accounting.
        if let Some(chunk) = self.loader_outbox.take() {
            self.recycling.recycle(chunk);
        }
        if let Some(chunk) = self.unpacker_outbox.take() {
            self.recycling.recycle(chunk);
        }

        drop(self.recycling.drain_all());
        Ok(())
    }
}

impl Drop for DsqDataReader {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Builder for [`DsqDataReader`]: construct with `new`, override what
/// the defaults don't suit, then `open`.
pub struct DsqDataReaderBuilder {
    base_name: PathBuf,
    alphabet: AlphabetSlot,
    chunk_capacity: usize,
    chunk_max_words: usize,
    nconsumers: Option<usize>,
}

impl DsqDataReaderBuilder {
    #[must_use]
    pub fn new(base_name: impl AsRef<Path>) -> Self {
        Self {
            base_name: base_name.as_ref().to_path_buf(),
            alphabet: None,
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            chunk_max_words: DEFAULT_CHUNK_MAX_WORDS,
            nconsumers: None,
        }
    }

    /// Supplies an alphabet to validate against the database's own, or
    /// leaves it empty to let `open` discover it from the index header.
    #[must_use]
    pub fn alphabet(mut self, alphabet: AlphabetSlot) -> Self {
        self.alphabet = alphabet;
        self
    }

    /// Overrides the maximum number of sequences per chunk (`C`). Mainly
    /// useful for shrinking chunks in tests against small fixtures.
    #[must_use]
    pub fn chunk_capacity(mut self, cap: usize) -> Self {
        self.chunk_capacity = cap.max(1);
        self
    }

    /// Overrides `CHUNK_MAX_WORDS`, the packed-word budget per chunk.
    #[must_use]
    pub fn chunk_max_words(mut self, max_words: usize) -> Self {
        self.chunk_max_words = max_words.max(1);
        self
    }

    /// Overrides the assumed number of concurrent consumer threads,
    /// which determines the live-chunk cap (`nconsumers + 2`). Defaults
    /// to the number of available CPUs.
    #[must_use]
    pub fn nconsumers(mut self, n: usize) -> Self {
        self.nconsumers = Some(n.max(1));
        self
    }

    /// Opens the database with the configured overrides.
    ///
    /// # Errors
    ///
    /// See [`DsqDataReader::open`].
    pub fn open(self) -> Result<DsqDataReader> {
        let (index_path, metadata_path, sequence_path) = format::backing_paths(&self.base_name);
        let nconsumers = self.nconsumers.unwrap_or_else(num_cpus::get);
        DsqDataReader::start(
            index_path,
            metadata_path,
            sequence_path,
            self.alphabet,
            self.chunk_capacity,
            self.chunk_max_words,
            nconsumers,
        )
    }
}

#[cfg(test)]
mod testing {
    use std::collections::HashSet;
    use std::sync::Arc;

    use crate::testutil::{write_database, TestSequence};

    use super::*;

    fn seqs(specs: &[(&str, &[u8])]) -> Vec<TestSequence> {
        specs
            .iter()
            .map(|(name, residues)| TestSequence::new(name, residues.to_vec()))
            .collect()
    }

    #[test]
    fn test_empty_database() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("empty");
        write_database(&base, &Alphabet::amino(), &[])?;

        let reader = DsqDataReader::open(&base, None)?;
        assert_eq!(reader.nseq(), 0);
        assert!(reader.read()?.is_none());
        reader.close()?;
        Ok(())
    }

    #[test]
    fn test_close_without_reading() -> Result<()> {
        // Close must not hang even when the pipeline never gets a chance
        // to run to end-of-stream: here the loader's end-of-stream chunk
        // is left sitting unclaimed in `unpacker_outbox`.
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("unread");
        write_database(&base, &Alphabet::amino(), &seqs(&[("a", &[1, 2])]))?;

        let reader = DsqDataReader::open(&base, None)?;
        reader.close()?;
        Ok(())
    }

    #[test]
    fn test_close_after_partial_read() -> Result<()> {
        // Close must not hang when called after some, but not all,
        // chunks have been read and recycled.
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("partial");
        let specs = seqs(&[("a", &[1, 2]), ("b", &[3, 4]), ("c", &[5, 6])]);
        write_database(&base, &Alphabet::amino(), &specs)?;

        let reader = DsqDataReaderBuilder::new(&base).chunk_capacity(1).open()?;
        let chunk = reader.read()?.expect("at least one chunk");
        reader.recycle(chunk);
        reader.close()?;
        Ok(())
    }

    #[test]
    fn test_round_trip_basic() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("proteins");
        let specs: Vec<TestSequence> = seqs(&[
            ("short", &[1, 2, 3]),
            ("exactly_one_word", &[0, 1, 2, 3, 4, 5]),
            ("spans_two_words", &[0, 1, 2, 3, 4, 5, 6, 7]),
            ("empty", &[]),
        ]);
        write_database(&base, &Alphabet::amino(), &specs)?;

        let reader = DsqDataReader::open(&base, None)?;
        assert_eq!(reader.nseq(), specs.len() as u64);

        let mut seen = Vec::new();
        while let Some(chunk) = reader.read()? {
            for seq_ref in chunk.iter() {
                seen.push((seq_ref.index(), seq_ref.name().to_vec(), seq_ref.residues().to_vec()));
            }
            reader.recycle(chunk);
        }

        assert_eq!(seen.len(), specs.len());
        for (i, spec) in specs.iter().enumerate() {
            assert_eq!(seen[i].0, i as u64);
            assert_eq!(seen[i].1, spec.name);
            assert_eq!(seen[i].2, spec.residues);
        }

        reader.close()?;
        Ok(())
    }

    #[test]
    fn test_chunk_capacity_splits_into_multiple_chunks() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("split");
        let specs = seqs(&[
            ("a", &[1, 2]),
            ("b", &[3, 4]),
            ("c", &[5, 6]),
            ("d", &[7, 8]),
            ("e", &[9, 10]),
        ]);
        write_database(&base, &Alphabet::amino(), &specs)?;

        let reader = DsqDataReaderBuilder::new(&base).chunk_capacity(2).open()?;

        let mut chunk_count = 0;
        let mut total_seqs = 0;
        let mut last_i0: Option<u64> = None;
        while let Some(chunk) = reader.read()? {
            assert!(chunk.n() <= 2);
            if let Some(prev) = last_i0 {
                assert!(chunk.i0() > prev);
            }
            last_i0 = Some(chunk.i0());
            total_seqs += chunk.n();
            chunk_count += 1;
            reader.recycle(chunk);
        }

        assert!(chunk_count >= 3, "expected at least 3 chunks, got {chunk_count}");
        assert_eq!(total_seqs, specs.len());
        reader.close()?;
        Ok(())
    }

    #[test]
    fn test_alphabet_mismatch_rejected() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("proteins");
        write_database(&base, &Alphabet::amino(), &seqs(&[("a", &[1, 2])]))?;

        let wrong = Alphabet::new(4, 127).unwrap();
        let err = DsqDataReader::open(&base, Some(wrong)).unwrap_err();
        assert!(matches!(err, Error::AlphabetIncompatible { .. }));
        Ok(())
    }

    #[test]
    fn test_truncated_sequence_file_is_reported() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("truncated");
        write_database(
            &base,
            &Alphabet::amino(),
            &seqs(&[("a", &[1, 2, 3, 4, 5, 6, 7, 8, 9])]),
        )?;

        let (_, _, sequence_path) = format::backing_paths(&base);
        let file = std::fs::OpenOptions::new().write(true).open(&sequence_path).unwrap();
        file.set_len(2).unwrap();
        drop(file);

        let reader = DsqDataReader::open(&base, None)?;
        let mut saw_error = false;
        loop {
            match reader.read() {
                Ok(Some(chunk)) => reader.recycle(chunk),
                Ok(None) => break,
                Err(_) => {
                    saw_error = true;
                    break;
                }
            }
        }
        assert!(saw_error);
        reader.close()?;
        Ok(())
    }

    #[test]
    fn test_recycle_keeps_live_chunk_count_bounded() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("bounded");
        let specs: Vec<TestSequence> = (0..20).map(|i| TestSequence::new("s", vec![(i % 20) as u8])).collect();
        write_database(&base, &Alphabet::amino(), &specs)?;

        let reader = DsqDataReaderBuilder::new(&base)
            .chunk_capacity(1)
            .nconsumers(2)
            .open()?;

        let mut n = 0;
        while let Some(chunk) = reader.read()? {
            n += chunk.n();
            reader.recycle(chunk);
        }
        assert_eq!(n, specs.len());
        reader.close()?;
        Ok(())
    }

    #[test]
    fn test_multiple_consumer_threads_see_every_sequence_once() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("concurrent");
        let specs: Vec<TestSequence> = (0..200)
            .map(|i| TestSequence::new("s", vec![(i % 20) as u8; (i % 9) as usize]))
            .collect();
        write_database(&base, &Alphabet::amino(), &specs)?;

        let reader = Arc::new(DsqDataReaderBuilder::new(&base).chunk_capacity(8).nconsumers(4).open()?);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reader = Arc::clone(&reader);
                std::thread::spawn(move || {
                    let mut indices = Vec::new();
                    loop {
                        match reader.read().unwrap() {
                            Some(chunk) => {
                                for seq_ref in chunk.iter() {
                                    indices.push(seq_ref.index());
                                }
                                reader.recycle(chunk);
                            }
                            None => break,
                        }
                    }
                    indices
                })
            })
            .collect();

        let mut all_indices = Vec::new();
        for handle in handles {
            all_indices.extend(handle.join().unwrap());
        }

        assert_eq!(all_indices.len(), specs.len());
        let unique: HashSet<_> = all_indices.iter().copied().collect();
        assert_eq!(unique.len(), specs.len());

        reader.close()?;
        Ok(())
    }

    #[test]
    fn test_idle_consumers_wake_on_end_of_stream() -> Result<()> {
        // Only one end-of-stream chunk is ever produced, so every
        // consumer past the one that claims it must still be woken
        // rather than blocking forever in `take`. A single tiny chunk
        // and 8 consumers maximizes the number of threads that end up
        // idle-waiting when end-of-stream arrives.
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("idle_consumers");
        write_database(&base, &Alphabet::amino(), &seqs(&[("a", &[1, 2])]))?;

        let reader = Arc::new(DsqDataReaderBuilder::new(&base).nconsumers(8).open()?);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reader = Arc::clone(&reader);
                std::thread::spawn(move || {
                    let mut n = 0;
                    while let Some(chunk) = reader.read().unwrap() {
                        n += chunk.n();
                        reader.recycle(chunk);
                    }
                    n
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 1);

        reader.close()?;
        Ok(())
    }
}
