//! Windowed producer for size-known remote sources.
//!
//! The window follows the target: the most recently registered reader that
//! is still active. Older readers whose block falls out of the window are
//! expelled by the buffer.

use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use mediafeed_common::{Error, Result};
use tracing::{debug, error, info, trace};

use super::{BlockFetcher, BuildSignal};
use crate::buffer::RingBuffer;

pub struct RandomAccessFeeder<F> {
    buffer: Arc<RingBuffer>,
    fetcher: F,
    size: u64,
    accepts_ranges: bool,
}

impl<F: BlockFetcher + 'static> RandomAccessFeeder<F> {
    pub fn new(buffer: Arc<RingBuffer>, fetcher: F, size: u64, accepts_ranges: bool) -> Self {
        Self {
            buffer,
            fetcher,
            size,
            accepts_ranges,
        }
    }

    /// Run on a dedicated thread.
    pub fn spawn(self, build: BuildSignal) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("mediafeed-window".to_string())
            .spawn(move || self.run(build))
    }

    /// Connect, then keep the window on the target until shutdown or a
    /// source failure.
    pub fn run(mut self, build: BuildSignal) {
        if let Err(e) = self.fetcher.open() {
            error!("Failed to open random-access source: {e}");
            self.buffer.abort();
            build.finish(false);
            return;
        }
        self.buffer.mark_running();
        build.finish(true);

        match self.serve() {
            Ok(()) => {
                info!("Random-access feed stopped");
                self.buffer.complete();
            }
            Err(e) => {
                error!(window = ?self.buffer.window(), "Random-access feed aborted: {e}");
                self.buffer.abort();
            }
        }
    }

    fn block_size(&self) -> u64 {
        self.buffer.block_size() as u64
    }

    fn total_blocks(&self) -> u64 {
        self.size.div_ceil(self.block_size())
    }

    fn serve(&mut self) -> Result<()> {
        let capacity = self.buffer.capacity() as u64;
        let ahead = self.buffer.ahead() as u64;
        let last = self.total_blocks();

        while !self.buffer.is_shutdown() {
            let Some((slot, cursor)) = self.buffer.highest_active() else {
                self.buffer.set_target(None);
                self.buffer.wait_advanced();
                continue;
            };
            if self.buffer.set_target(Some(slot)) {
                debug!(slot, block = cursor, "Target changed");
            }

            let target = cursor.clamp(1, last.max(1));
            let window = self.buffer.window();
            if target < window.start || target >= window.start + capacity {
                self.slide_to(target);
                continue;
            }

            let next = window.next();
            let limit = (target + ahead).min(window.start + capacity - 1).min(last);
            if next > limit {
                self.buffer.wait_advanced();
                continue;
            }

            let data = self.fetch_block(next)?;
            if let Some(block) = self.buffer.push_window_block(data) {
                trace!(block, "Fetched block");
            }
        }
        Ok(())
    }

    /// Re-anchor the window so the target falls inside it.
    ///
    /// The fetcher keeps its position when it can carry on from there: it is
    /// already at the target, or it has no ranges and the target lies ahead
    /// (the gap is read and discarded). Otherwise it is reset, which for a
    /// source without ranges means reading again from byte 0.
    fn slide_to(&mut self, target: u64) {
        let bs = self.block_size();
        let next = self
            .fetcher
            .position()
            .filter(|offset| offset % bs == 0)
            .map(|offset| offset / bs + 1);

        let continues = match next {
            Some(next) => next == target || (!self.accepts_ranges && next < target),
            None => false,
        };
        if !continues {
            self.fetcher.reset();
        }
        debug!(target, from = ?next, continues, "Re-anchoring window");
        self.buffer.reanchor(target);
    }

    fn fetch_block(&mut self, block: u64) -> Result<Bytes> {
        let bs = self.block_size();
        let offset = (block - 1) * bs;
        let expected = bs.min(self.size - offset) as usize;
        let data = self.fetcher.fetch(offset, expected)?;
        if data.len() != expected {
            return Err(Error::ShortRead {
                block,
                expected,
                actual: data.len(),
            });
        }
        Ok(data)
    }
}
