//! Shared fixed-capacity block buffer between one producer and many readers.
//!
//! The buffer holds `capacity` blocks of `block_size` bytes. Block indices are
//! 1-based and block `i` always lives in slot `(i - 1) % capacity`; every slot
//! remembers which logical block it holds, so a slot is only ever served for
//! the block that was last written into it.
//!
//! Two layouts share the same storage:
//!
//! - **Sequential**: `write_index` is the next block the producer will write.
//!   Blocks `write_index - capacity ..= write_index - 1` are held. A reader
//!   older than that has been overrun.
//! - **Windowed**: `write_index` is the first block of the window and
//!   `valid_len` counts the contiguous valid blocks from there. The producer
//!   re-anchors the window when the target reader leaves
//!   `[write_index, write_index + capacity)`.
//!
//! # Locking
//!
//! Cursor slots live behind the registration lock, block data and indices
//! behind the write lock. The two are never held together. Readers wait on
//! the write condition; the producer waits on the "reader advanced" event.
//! Every wait is bounded by the liveness tick so shutdown is observed promptly.

mod cursor;

pub use cursor::{Cursor, CursorLease, Release};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mediafeed_common::{Error, FeedStatus, Result};
use parking_lot::{Condvar, Mutex};

use crate::config::BufferConfig;

/// How the producer lays blocks out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    Sequential,
    Windowed,
}

/// Snapshot of the window in windowed mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// First block of the window.
    pub start: u64,
    /// Number of valid blocks from `start`.
    pub valid_len: usize,
}

impl Window {
    /// First block not yet fetched.
    pub fn next(&self) -> u64 {
        self.start + self.valid_len as u64
    }
}

struct Slot {
    index: u64,
    data: Bytes,
}

struct WriteState {
    slots: Vec<Option<Slot>>,
    write_index: u64,
    valid_len: usize,
    status: FeedStatus,
    target: Option<usize>,
}

impl WriteState {
    fn slot_for(&self, block: u64) -> usize {
        ((block - 1) % self.slots.len() as u64) as usize
    }

    fn stored(&self, block: u64) -> Option<Bytes> {
        match &self.slots[self.slot_for(block)] {
            Some(slot) if slot.index == block => Some(slot.data.clone()),
            _ => None,
        }
    }

    fn in_window(&self, block: u64) -> bool {
        block >= self.write_index && block < self.write_index + self.valid_len as u64
    }
}

/// Fixed-capacity ring of media blocks plus reader cursors.
pub struct RingBuffer {
    mode: BufferMode,
    block_size: usize,
    capacity: usize,
    ahead: usize,
    tick: Duration,
    cursors: Mutex<Vec<Cursor>>,
    state: Mutex<WriteState>,
    written: Condvar,
    advanced: Mutex<bool>,
    advanced_signal: Condvar,
    shutdown: AtomicBool,
}

impl RingBuffer {
    pub fn new(mode: BufferMode, config: &BufferConfig) -> Self {
        let capacity = config.capacity_blocks.max(1);
        Self {
            mode,
            block_size: config.block_size,
            capacity,
            ahead: config.ahead_blocks,
            tick: config.liveness_tick(),
            cursors: Mutex::new(Vec::new()),
            state: Mutex::new(WriteState {
                slots: (0..capacity).map(|_| None).collect(),
                write_index: 1,
                valid_len: 0,
                status: FeedStatus::Initializing,
                target: None,
            }),
            written: Condvar::new(),
            advanced: Mutex::new(false),
            advanced_signal: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ahead(&self) -> usize {
        self.ahead
    }

    pub fn liveness_tick(&self) -> Duration {
        self.tick
    }

    // ------------------------------------------------------------------
    // Cursor slots (registration lock)
    // ------------------------------------------------------------------

    /// Claim a new cursor slot. Slots are never reused.
    pub fn register(&self, initial: Cursor) -> usize {
        let slot = {
            let mut cursors = self.cursors.lock();
            cursors.push(initial);
            cursors.len() - 1
        };
        tracing::debug!(slot, cursor = ?initial, "Registered cursor");
        self.notify_advanced();
        slot
    }

    /// Claim a slot whose release is tied to the returned lease.
    pub fn lease(self: &Arc<Self>, initial: Cursor, release: Release) -> CursorLease {
        let slot = self.register(initial);
        CursorLease::new(Arc::clone(self), slot, release)
    }

    pub fn set_cursor(&self, slot: usize, cursor: Cursor) {
        let mut cursors = self.cursors.lock();
        if let Some(entry) = cursors.get_mut(slot) {
            *entry = cursor;
        }
    }

    pub fn cursor(&self, slot: usize) -> Cursor {
        self.cursors
            .lock()
            .get(slot)
            .copied()
            .unwrap_or(Cursor::Unregistered)
    }

    /// Snapshot of every slot ever registered.
    pub fn cursors(&self) -> Vec<Cursor> {
        self.cursors.lock().clone()
    }

    pub fn active_readers(&self) -> usize {
        self.cursors.lock().iter().filter(|c| c.is_active()).count()
    }

    /// Highest block any active reader is waiting for.
    pub fn furthest_reader(&self) -> Option<u64> {
        self.cursors
            .lock()
            .iter()
            .filter_map(|c| c.position())
            .max()
    }

    /// The most recently registered active reader and its block.
    pub fn highest_active(&self) -> Option<(usize, u64)> {
        self.cursors
            .lock()
            .iter()
            .enumerate()
            .rev()
            .find_map(|(slot, c)| c.position().map(|block| (slot, block)))
    }

    // ------------------------------------------------------------------
    // Reader-advanced event
    // ------------------------------------------------------------------

    /// Tell the producer a reader moved (or a slot changed).
    pub fn notify_advanced(&self) {
        let mut flag = self.advanced.lock();
        *flag = true;
        self.advanced_signal.notify_all();
    }

    /// Wait up to one liveness tick for a reader to advance. Returns whether
    /// the event fired; the event is consumed either way.
    pub fn wait_advanced(&self) -> bool {
        let mut flag = self.advanced.lock();
        if !*flag && !self.is_shutdown() {
            self.advanced_signal.wait_for(&mut flag, self.tick);
        }
        std::mem::replace(&mut *flag, false)
    }

    // ------------------------------------------------------------------
    // Producer side (write lock)
    // ------------------------------------------------------------------

    pub fn status(&self) -> FeedStatus {
        self.state.lock().status
    }

    pub fn write_index(&self) -> u64 {
        self.state.lock().write_index
    }

    pub fn window(&self) -> Window {
        let state = self.state.lock();
        Window {
            start: state.write_index,
            valid_len: state.valid_len,
        }
    }

    /// Move from `Initializing` to `Running`.
    pub fn mark_running(&self) {
        let mut state = self.state.lock();
        if state.status == FeedStatus::Initializing {
            state.status = FeedStatus::Running;
        }
        self.written.notify_all();
    }

    /// Production reached the end of the source. Keeps an earlier abort.
    pub fn complete(&self) {
        let mut state = self.state.lock();
        if state.status != FeedStatus::Aborted {
            state.status = FeedStatus::Completed;
        }
        tracing::debug!(write_index = state.write_index, status = %state.status, "Feed finished");
        self.written.notify_all();
    }

    /// Production failed; readers observe `FeedAborted` instead of EOF.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.status = FeedStatus::Aborted;
        self.written.notify_all();
    }

    /// Append the next block in sequential mode. Returns its index.
    pub fn push_block(&self, data: Bytes) -> u64 {
        let mut state = self.state.lock();
        let index = state.write_index;
        let slot = state.slot_for(index);
        state.slots[slot] = Some(Slot { index, data });
        state.write_index += 1;
        self.written.notify_all();
        index
    }

    /// Discard the window and restart it at `start`.
    pub fn reanchor(&self, start: u64) {
        let mut state = self.state.lock();
        state.write_index = start.max(1);
        state.valid_len = 0;
        self.written.notify_all();
    }

    /// Append the next block of the window. Returns its index, or `None` if
    /// the window is already full.
    pub fn push_window_block(&self, data: Bytes) -> Option<u64> {
        let mut state = self.state.lock();
        if state.valid_len >= self.capacity {
            return None;
        }
        let index = state.write_index + state.valid_len as u64;
        let slot = state.slot_for(index);
        state.slots[slot] = Some(Slot { index, data });
        state.valid_len += 1;
        self.written.notify_all();
        Some(index)
    }

    pub fn target(&self) -> Option<usize> {
        self.state.lock().target
    }

    /// Record which slot drives the window. Wakes every reader when it changes
    /// so those left behind can notice.
    pub fn set_target(&self, target: Option<usize>) -> bool {
        let mut state = self.state.lock();
        if state.target == target {
            return false;
        }
        state.target = target;
        self.written.notify_all();
        true
    }

    // ------------------------------------------------------------------
    // Reader side (write lock)
    // ------------------------------------------------------------------

    /// Wait for `block` in sequential mode.
    ///
    /// Returns `Ok(None)` at end of stream. `abandoned` is polled on every
    /// liveness tick so a reader whose client left stops waiting.
    pub fn next_sequential(
        &self,
        block: u64,
        abandoned: impl Fn() -> bool,
    ) -> Result<Option<Bytes>> {
        let mut state = self.state.lock();
        loop {
            if self.is_shutdown() {
                return Err(Error::Shutdown);
            }

            let write_index = state.write_index;
            if block < write_index {
                let oldest = write_index.saturating_sub(self.capacity as u64).max(1);
                if block < oldest {
                    return Err(Error::Overrun { block, oldest });
                }
                return state
                    .stored(block)
                    .map(Some)
                    .ok_or(Error::Overrun { block, oldest });
            }

            match state.status {
                FeedStatus::Completed => return Ok(None),
                FeedStatus::Aborted => return Err(Error::FeedAborted),
                _ => {}
            }

            if abandoned() {
                return Err(Error::ConnectionWrite);
            }
            self.written.wait_for(&mut state, self.tick);
        }
    }

    /// Wait for `block` in windowed mode on behalf of cursor `slot`.
    ///
    /// A reader registered before the current target whose block falls
    /// outside the window has been expelled and gets `Overrun`. A reader at or
    /// after the target keeps waiting: the producer will move the window to it.
    pub fn window_block(
        &self,
        slot: usize,
        block: u64,
        abandoned: impl Fn() -> bool,
    ) -> Result<Bytes> {
        let mut state = self.state.lock();
        loop {
            if self.is_shutdown() {
                return Err(Error::Shutdown);
            }

            if state.in_window(block) {
                if let Some(data) = state.stored(block) {
                    return Ok(data);
                }
            }

            if state.status == FeedStatus::Aborted {
                return Err(Error::FeedAborted);
            }

            let start = state.write_index;
            let outside = block < start || block >= start + self.capacity as u64;
            let behind_target = state.target.is_some_and(|target| target > slot);
            if outside && behind_target {
                return Err(Error::Overrun {
                    block,
                    oldest: start,
                });
            }

            if abandoned() {
                return Err(Error::ConnectionWrite);
            }
            self.written.wait_for(&mut state, self.tick);
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Stop the session and wake every waiter. Safe to call repeatedly.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let _state = self.state.lock();
            self.written.notify_all();
        }
        self.notify_advanced();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Instant;

    fn config(capacity: usize, ahead: usize) -> BufferConfig {
        BufferConfig {
            block_size: 4,
            capacity_blocks: capacity,
            ahead_blocks: ahead,
            liveness_tick_ms: 20,
        }
    }

    fn block(n: u8) -> Bytes {
        Bytes::from(vec![n; 4])
    }

    #[test]
    fn test_sequential_reads_in_order() {
        let buffer = RingBuffer::new(BufferMode::Sequential, &config(4, 2));
        for n in 1..=3 {
            assert_eq!(buffer.push_block(block(n)), n as u64);
        }
        assert_eq!(buffer.write_index(), 4);

        for n in 1..=3u8 {
            let data = buffer.next_sequential(n as u64, || false).unwrap().unwrap();
            assert_eq!(data, block(n));
        }
    }

    #[test]
    fn test_sequential_overrun_detected() {
        let buffer = RingBuffer::new(BufferMode::Sequential, &config(4, 2));
        for n in 1..=6 {
            buffer.push_block(block(n));
        }
        // Blocks 3..=6 remain.
        assert_matches!(
            buffer.next_sequential(2, || false),
            Err(Error::Overrun { block: 2, oldest: 3 })
        );
        assert_eq!(buffer.next_sequential(3, || false).unwrap(), Some(block(3)));
    }

    #[test]
    fn test_sequential_end_of_stream() {
        let buffer = RingBuffer::new(BufferMode::Sequential, &config(4, 2));
        buffer.push_block(block(1));
        buffer.complete();
        assert!(buffer.next_sequential(1, || false).unwrap().is_some());
        assert_eq!(buffer.next_sequential(2, || false).unwrap(), None);
        assert_eq!(buffer.status(), FeedStatus::Completed);
    }

    #[test]
    fn test_empty_source_completes_immediately() {
        let buffer = RingBuffer::new(BufferMode::Sequential, &config(4, 2));
        buffer.complete();
        assert_eq!(buffer.next_sequential(1, || false).unwrap(), None);
    }

    #[test]
    fn test_abort_is_not_overwritten_by_complete() {
        let buffer = RingBuffer::new(BufferMode::Sequential, &config(4, 2));
        buffer.abort();
        buffer.complete();
        assert_eq!(buffer.status(), FeedStatus::Aborted);
        assert_matches!(buffer.next_sequential(1, || false), Err(Error::FeedAborted));
    }

    #[test]
    fn test_abandoned_reader_stops_waiting() {
        let buffer = RingBuffer::new(BufferMode::Sequential, &config(4, 2));
        assert_matches!(
            buffer.next_sequential(1, || true),
            Err(Error::ConnectionWrite)
        );
    }

    #[test]
    fn test_reader_wakes_on_write() {
        let buffer = Arc::new(RingBuffer::new(BufferMode::Sequential, &config(4, 2)));
        let reader = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || buffer.next_sequential(1, || false))
        };
        std::thread::sleep(Duration::from_millis(30));
        buffer.push_block(block(9));
        assert_eq!(reader.join().unwrap().unwrap(), Some(block(9)));
    }

    #[test]
    fn test_shutdown_wakes_waiters() {
        let buffer = Arc::new(RingBuffer::new(BufferMode::Sequential, &config(4, 2)));
        let reader = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || buffer.next_sequential(1, || false))
        };
        std::thread::sleep(Duration::from_millis(30));
        let started = Instant::now();
        buffer.shutdown();
        buffer.shutdown();
        assert_matches!(reader.join().unwrap(), Err(Error::Shutdown));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(buffer.wait_advanced());
    }

    #[test]
    fn test_window_serves_only_current_blocks() {
        let buffer = RingBuffer::new(BufferMode::Windowed, &config(4, 2));
        buffer.push_window_block(block(1));
        buffer.push_window_block(block(2));
        assert_eq!(buffer.window_block(0, 2, || false).unwrap(), block(2));

        // Block 5 shares slot 0 with block 1; after re-anchoring at 5 the
        // old contents must not be served as block 5.
        buffer.reanchor(5);
        assert_eq!(
            buffer.window(),
            Window {
                start: 5,
                valid_len: 0
            }
        );
        let slot = buffer.register(Cursor::Reading(5));
        assert_matches!(buffer.window_block(slot, 5, || true), Err(Error::ConnectionWrite));

        assert_eq!(buffer.push_window_block(block(50)), Some(5));
        assert_eq!(buffer.window_block(slot, 5, || false).unwrap(), block(50));
    }

    #[test]
    fn test_window_full_rejects_push() {
        let buffer = RingBuffer::new(BufferMode::Windowed, &config(2, 1));
        assert_eq!(buffer.push_window_block(block(1)), Some(1));
        assert_eq!(buffer.push_window_block(block(2)), Some(2));
        assert_eq!(buffer.push_window_block(block(3)), None);
    }

    #[test]
    fn test_reader_behind_target_is_expelled() {
        let buffer = RingBuffer::new(BufferMode::Windowed, &config(4, 2));
        let slow = buffer.register(Cursor::Reading(5));
        let fast = buffer.register(Cursor::Reading(50));
        assert_eq!(buffer.highest_active(), Some((fast, 50)));

        assert!(buffer.set_target(Some(fast)));
        assert!(!buffer.set_target(Some(fast)));
        buffer.reanchor(50);

        assert_matches!(
            buffer.window_block(slow, 5, || false),
            Err(Error::Overrun { block: 5, oldest: 50 })
        );
        // The target itself is never expelled; it waits for its data.
        assert_matches!(
            buffer.window_block(fast, 50, || true),
            Err(Error::ConnectionWrite)
        );
    }

    #[test]
    fn test_newer_reader_waits_for_reanchor() {
        let buffer = RingBuffer::new(BufferMode::Windowed, &config(4, 2));
        let old = buffer.register(Cursor::Reading(1));
        buffer.set_target(Some(old));
        let new = buffer.register(Cursor::Reading(90));
        assert_matches!(
            buffer.window_block(new, 90, || true),
            Err(Error::ConnectionWrite)
        );
    }

    #[test]
    fn test_cursor_snapshots() {
        let buffer = RingBuffer::new(BufferMode::Sequential, &config(4, 2));
        assert_eq!(buffer.furthest_reader(), None);
        let a = buffer.register(Cursor::Reading(3));
        let b = buffer.register(Cursor::Reading(7));
        buffer.set_cursor(b, Cursor::Finished(7));
        assert_eq!(buffer.furthest_reader(), Some(3));
        assert_eq!(buffer.highest_active(), Some((a, 3)));
        assert_eq!(buffer.active_readers(), 1);
        assert_eq!(
            buffer.cursors(),
            vec![Cursor::Reading(3), Cursor::Finished(7)]
        );
        assert_eq!(buffer.cursor(42), Cursor::Unregistered);
    }

    #[test]
    fn test_lease_release_modes() {
        let buffer = Arc::new(RingBuffer::new(BufferMode::Windowed, &config(4, 2)));
        let finish_slot = {
            let lease = buffer.lease(Cursor::Reading(1), Release::Finish);
            lease.advance_to(4);
            lease.slot()
        };
        assert_eq!(buffer.cursor(finish_slot), Cursor::Finished(4));

        let unregister_slot = {
            let lease = buffer.lease(Cursor::Reading(9), Release::Unregister);
            assert_eq!(lease.cursor(), Cursor::Reading(9));
            lease.slot()
        };
        assert_eq!(buffer.cursor(unregister_slot), Cursor::Unregistered);
        assert_ne!(finish_slot, unregister_slot);
    }

    #[test]
    fn test_wait_advanced_consumes_event() {
        let buffer = RingBuffer::new(BufferMode::Sequential, &config(4, 2));
        buffer.notify_advanced();
        assert!(buffer.wait_advanced());
        assert!(!buffer.wait_advanced());
    }
}
