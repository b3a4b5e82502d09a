//! Per-connection read positions.

use std::sync::Arc;

use super::RingBuffer;

/// One connection's read position, in 1-based block indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// The slot is not (or no longer) driving anything.
    Unregistered,
    /// The reader needs this block next.
    Reading(u64),
    /// The reader delivered everything up to, but excluding, this block.
    Finished(u64),
}

impl Cursor {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Reading(_))
    }

    /// The block an active reader is waiting for.
    pub fn position(self) -> Option<u64> {
        match self {
            Self::Reading(block) => Some(block),
            _ => None,
        }
    }
}

/// What a lease leaves behind in its slot when dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Mark the reader finished at its last position (sequential delivery).
    Finish,
    /// Reset the slot so target selection ignores it (random-access delivery).
    Unregister,
}

/// A claimed cursor slot that is released on every exit path.
pub struct CursorLease {
    buffer: Arc<RingBuffer>,
    slot: usize,
    release: Release,
}

impl CursorLease {
    pub(super) fn new(buffer: Arc<RingBuffer>, slot: usize, release: Release) -> Self {
        Self {
            buffer,
            slot,
            release,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn cursor(&self) -> Cursor {
        self.buffer.cursor(self.slot)
    }

    pub fn buffer(&self) -> &Arc<RingBuffer> {
        &self.buffer
    }

    /// Move the cursor to `block` and wake the producer.
    pub fn advance_to(&self, block: u64) {
        self.buffer.set_cursor(self.slot, Cursor::Reading(block));
        self.buffer.notify_advanced();
    }

    /// Mark the reader finished at `block`.
    pub fn finish_at(&self, block: u64) {
        self.buffer.set_cursor(self.slot, Cursor::Finished(block));
        self.buffer.notify_advanced();
    }
}

impl Drop for CursorLease {
    fn drop(&mut self) {
        let released = match (self.release, self.buffer.cursor(self.slot)) {
            (Release::Finish, Cursor::Reading(block)) => Cursor::Finished(block),
            (Release::Finish, other) => other,
            (Release::Unregister, _) => Cursor::Unregistered,
        };
        self.buffer.set_cursor(self.slot, released);
        self.buffer.notify_advanced();
        tracing::trace!(slot = self.slot, cursor = ?released, "Released cursor");
    }
}
