//! Hand-off primitives connecting the pipeline's stages (§5)
//!
//! Two kinds of shared state tie the loader, unpacker and consumer
//! threads together: a one-item rendezvous ([`Slot`]) used for
//! `loader_outbox` and `unpacker_outbox`, and a LIFO stack of spare
//! chunks ([`RecyclingStack`]) that consumers return chunks to after
//! they've read them. Both are built directly on `Mutex` + `Condvar`
//! rather than channels, matching the literal handshake the design
//! calls for: a full slot blocks its producer, an empty slot blocks its
//! consumer, and recycling blocks the loader only when no spare chunk
//! exists and the live-chunk cap has been reached.
//!
//! Both primitives are also close-aware: [`DsqDataReader::close`] needs
//! to unstick a loader or unpacker thread that is blocked mid-handshake,
//! so every wait loop here also watches a `closed` flag and is woken by
//! [`Slot::close`] / [`RecyclingStack::close`]. Neither primitive ever
//! drops a chunk silently on the way out: [`Slot::put`] hands a
//! rejected chunk back to its caller instead of swallowing it, and
//! [`RecyclingStack::drain_all`] stops waiting once closed rather than
//! assuming every chunk it ever handed out comes back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

/// A single-item rendezvous: `put` blocks while the slot is occupied,
/// `take` blocks while it's empty. Used for `loader_outbox` and
/// `unpacker_outbox` (§5).
pub(crate) struct Slot<T> {
    item: Mutex<Option<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    closed: AtomicBool,
}

impl<T> Slot<T> {
    pub(crate) fn new() -> Self {
        Self {
            item: Mutex::new(None),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Blocks until the slot is empty, then places `value` in it and
    /// wakes one waiting consumer. Returns `value` back to the caller
    /// instead, without placing it, if the slot is closed before a
    /// vacancy appears: the caller is responsible for its disposal
    /// (e.g. recycling it) rather than the slot silently dropping it.
    pub(crate) fn put(&self, value: T) -> Option<T> {
        let mut guard = self.item.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Some(value);
            }
            if guard.is_none() {
                break;
            }
            guard = self
                .not_full
                .wait(guard)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        *guard = Some(value);
        self.not_empty.notify_one();
        None
    }

    /// Blocks until the slot is occupied, then removes and returns its
    /// contents, waking one waiting producer. Returns `None` if the
    /// slot is closed while empty.
    pub(crate) fn take(&self) -> Option<T> {
        let mut guard = self.item.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if let Some(value) = guard.take() {
                self.not_full.notify_one();
                return Some(value);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            guard = self
                .not_empty
                .wait(guard)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Marks the slot closed and wakes every thread blocked in `put` or
    /// `take`. Idempotent.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.item.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }
}

/// A LIFO stack of chunks available for the loader to reuse, plus the
/// bookkeeping needed to cap the number of chunks alive at once at
/// `nconsumers + 2` (§4.4, §9 "Bounded chunk count").
///
/// The loader blocks on this stack exactly when it has already
/// allocated `live_cap` chunks and none are available to recycle; any
/// other producer/consumer interaction with chunk lifetime goes through
/// ordinary ownership transfer, not this stack.
pub(crate) struct RecyclingStack {
    inner: Mutex<RecyclingState>,
    available: Condvar,
    closed: AtomicBool,
}

struct RecyclingState {
    spares: Vec<crate::chunk::Chunk>,
    /// Number of chunks currently allocated (spare or in flight).
    live: usize,
    /// Maximum number of chunks allowed to be allocated at once.
    cap: usize,
}

impl RecyclingStack {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            inner: Mutex::new(RecyclingState {
                spares: Vec::new(),
                live: 0,
                cap,
            }),
            available: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns a chunk for the loader to fill: a spare off the stack if
    /// one exists, otherwise a freshly allocated chunk if the live cap
    /// has not been reached, otherwise blocks until a consumer recycles
    /// one. Returns `None` if the stack is closed before a chunk becomes
    /// available.
    pub(crate) fn acquire(
        &self,
        alloc: impl Fn() -> crate::Result<crate::chunk::Chunk>,
    ) -> Option<crate::Result<crate::chunk::Chunk>> {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if let Some(chunk) = guard.spares.pop() {
                return Some(Ok(chunk));
            }
            if guard.live < guard.cap {
                guard.live += 1;
                return Some(alloc());
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            guard = self
                .available
                .wait(guard)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Returns a chunk to the stack for reuse, waking one blocked
    /// acquirer.
    pub(crate) fn recycle(&self, chunk: crate::chunk::Chunk) {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.spares.push(chunk);
        self.available.notify_one();
    }

    /// Marks the stack closed and wakes every blocked acquirer.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.available.notify_all();
    }

    /// Drains every chunk currently on the stack, blocking until either
    /// `live` of them have been collected or the stack is closed.
    /// Used by Close (§4.1) to tear the pipeline down deterministically.
    ///
    /// A closed stack stops this from waiting even if fewer than `live`
    /// chunks ever make it to `spares`: a chunk stranded in a pipeline
    /// slot at shutdown (never handed to a consumer, or dropped by a
    /// caller that never recycled it) must not turn `Close` into a
    /// permanent hang.
    pub(crate) fn drain_all(&self) -> Vec<crate::chunk::Chunk> {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut drained = Vec::with_capacity(guard.live);
        loop {
            while let Some(chunk) = guard.spares.pop() {
                drained.push(chunk);
            }
            if drained.len() >= guard.live || self.closed.load(Ordering::Acquire) {
                break;
            }
            guard = self
                .available
                .wait(guard)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        guard.live = 0;
        drained
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_slot_put_take_round_trip() {
        let slot: Slot<u32> = Slot::new();
        assert!(slot.put(7).is_none());
        assert_eq!(slot.take(), Some(7));
    }

    #[test]
    fn test_slot_take_returns_none_once_closed_and_empty() {
        let slot: Slot<u32> = Slot::new();
        slot.close();
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn test_slot_take_still_returns_parked_item_after_close() {
        let slot: Slot<u32> = Slot::new();
        assert!(slot.put(9).is_none());
        slot.close();
        // An item parked before `close` is still reachable: `close` must
        // not make the slot look empty to a caller that still wants to
        // reclaim what was left in it.
        assert_eq!(slot.take(), Some(9));
    }

    #[test]
    fn test_slot_put_hands_value_back_once_closed() {
        let slot: Slot<u32> = Slot::new();
        slot.close();
        assert_eq!(slot.put(3), Some(3));
    }

    #[test]
    fn test_slot_close_wakes_blocked_consumer() {
        let slot: Arc<Slot<u32>> = Arc::new(Slot::new());
        let waiter = Arc::clone(&slot);
        let handle = std::thread::spawn(move || waiter.take());

        std::thread::sleep(Duration::from_millis(50));
        slot.close();

        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn test_recycling_stack_acquire_allocates_up_to_cap_then_blocks() {
        let stack = RecyclingStack::new(1);
        let chunk = stack
            .acquire(|| crate::chunk::Chunk::new(1, 6))
            .unwrap()
            .unwrap();
        assert_eq!(chunk.capacity(), 1);

        // The cap is reached; a second acquire must not allocate, and
        // closing must unblock it rather than allocate past the cap.
        let stack = Arc::new(stack);
        let waiter = Arc::clone(&stack);
        let handle = std::thread::spawn(move || waiter.acquire(|| crate::chunk::Chunk::new(1, 6)));

        std::thread::sleep(Duration::from_millis(50));
        stack.close();

        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn test_recycling_stack_recycle_then_acquire() {
        let stack = RecyclingStack::new(2);
        let chunk = stack.acquire(|| crate::chunk::Chunk::new(1, 6)).unwrap().unwrap();
        stack.recycle(chunk);

        let chunk = stack.acquire(|| crate::chunk::Chunk::new(1, 6)).unwrap().unwrap();
        assert_eq!(chunk.capacity(), 1);
    }

    #[test]
    fn test_drain_all_stops_at_closed_even_if_short_of_live() {
        let stack = RecyclingStack::new(3);
        // Allocate two chunks without ever recycling either: `live` is 2
        // but `spares` stays empty.
        let _a = stack.acquire(|| crate::chunk::Chunk::new(1, 6)).unwrap().unwrap();
        let _b = stack.acquire(|| crate::chunk::Chunk::new(1, 6)).unwrap().unwrap();

        stack.close();
        let drained = stack.drain_all();
        assert!(drained.is_empty());
    }

    #[test]
    fn test_drain_all_collects_recycled_chunks() {
        let stack = RecyclingStack::new(2);
        let a = stack.acquire(|| crate::chunk::Chunk::new(1, 6)).unwrap().unwrap();
        let b = stack.acquire(|| crate::chunk::Chunk::new(1, 6)).unwrap().unwrap();
        stack.recycle(a);
        stack.recycle(b);

        stack.close();
        let drained = stack.drain_all();
        assert_eq!(drained.len(), 2);
    }
}
