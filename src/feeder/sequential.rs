//! Linear producer for one-shot sources.

use std::io::Read;
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use mediafeed_common::{Error, Result};
use tracing::{debug, error, info, trace};

use super::BuildSignal;
use crate::buffer::RingBuffer;
use crate::config::UpstreamConfig;
use crate::source::{read_block, SequentialSource};

/// Why production stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Exhausted,
    Shutdown,
}

/// Reads a source front to back into the buffer, never more than
/// `ahead_blocks` past the block the furthest reader is waiting for.
pub struct SequentialFeeder {
    buffer: Arc<RingBuffer>,
    source: SequentialSource,
    upstream: UpstreamConfig,
}

impl SequentialFeeder {
    pub fn new(
        buffer: Arc<RingBuffer>,
        source: SequentialSource,
        upstream: UpstreamConfig,
    ) -> Self {
        Self {
            buffer,
            source,
            upstream,
        }
    }

    /// Run on a dedicated thread.
    pub fn spawn(self, build: BuildSignal) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("mediafeed-sequential".to_string())
            .spawn(move || self.run(build))
    }

    /// Open the source and produce until it is exhausted, fails, or the
    /// session shuts down.
    pub fn run(self, build: BuildSignal) {
        let Self {
            buffer,
            source,
            upstream,
        } = self;

        debug!(source = ?source, "Opening sequential source");
        let mut reader = match source.open(&upstream) {
            Ok(reader) => reader,
            Err(e) => {
                error!("Failed to open sequential source: {e}");
                buffer.abort();
                build.finish(false);
                return;
            }
        };
        buffer.mark_running();

        match produce(&buffer, reader.as_mut(), &build) {
            Ok(stop) => {
                info!(
                    blocks = buffer.write_index() - 1,
                    ?stop,
                    "Sequential feed finished"
                );
                buffer.complete();
            }
            Err(e) => {
                error!(write_index = buffer.write_index(), "Sequential feed aborted: {e}");
                buffer.abort();
                // No-op when a block already reported success.
                build.finish(false);
                return;
            }
        }
        build.finish(!buffer.is_shutdown());
    }
}

fn produce(buffer: &RingBuffer, reader: &mut dyn Read, build: &BuildSignal) -> Result<Stop> {
    let block_size = buffer.block_size();
    let ahead = buffer.ahead() as u64;
    let mut next = buffer.write_index();

    loop {
        if buffer.is_shutdown() {
            return Ok(Stop::Shutdown);
        }

        // The block the frontier reader still needs is not part of the look-ahead.
        let frontier = buffer.furthest_reader().unwrap_or(1).max(1);
        if next > frontier + ahead + 1 {
            buffer.wait_advanced();
            continue;
        }

        let mut block = vec![0u8; block_size];
        let filled = read_block(reader, &mut block).map_err(Error::source_read)?;
        if filled > 0 {
            block.truncate(filled);
            next = buffer.push_block(Bytes::from(block)) + 1;
            trace!(block = next - 1, bytes = filled, "Wrote block");
        }
        build.finish(true);

        if filled < block_size {
            return Ok(Stop::Exhausted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferMode, Cursor};
    use crate::config::BufferConfig;
    use assert_matches::assert_matches;
    use mediafeed_common::FeedStatus;
    use std::io::{self, Cursor as IoCursor};
    use std::time::{Duration, Instant};

    const BLOCK: usize = 4;

    fn buffer(capacity: usize, ahead: usize) -> Arc<RingBuffer> {
        Arc::new(RingBuffer::new(
            BufferMode::Sequential,
            &BufferConfig {
                block_size: BLOCK,
                capacity_blocks: capacity,
                ahead_blocks: ahead,
                liveness_tick_ms: 10,
            },
        ))
    }

    fn source(blocks: u8) -> SequentialSource {
        let data: Vec<u8> = (1..=blocks).flat_map(|b| [b; BLOCK]).collect();
        SequentialSource::Reader(Box::new(IoCursor::new(data)))
    }

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        check()
    }

    /// Reader that fails after handing out `good` bytes.
    struct Failing {
        good: usize,
    }

    impl Read for Failing {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.good == 0 {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
            }
            let n = buf.len().min(self.good);
            buf[..n].fill(7);
            self.good -= n;
            Ok(n)
        }
    }

    #[test]
    fn test_look_ahead_throttles_producer() {
        // Ten blocks, four slots, two blocks of look-ahead.
        let buffer = buffer(4, 2);
        let reader = buffer.register(Cursor::Reading(3));
        let (build, watch) = BuildSignal::channel();
        let feeder = SequentialFeeder::new(Arc::clone(&buffer), source(10), Default::default());
        let handle = feeder.spawn(build).unwrap();

        // Blocks 1..=6 written while the reader still needs block 3.
        assert!(wait_until(Duration::from_secs(2), || buffer.write_index() == 7));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(buffer.write_index(), 7);
        assert_eq!(watch.outcome(), Some(true));
        assert_eq!(buffer.next_sequential(3, || false).unwrap().unwrap()[..], [3; BLOCK]);

        // Consuming block 3 releases exactly block 7.
        buffer.set_cursor(reader, Cursor::Reading(4));
        buffer.notify_advanced();
        assert!(wait_until(Duration::from_secs(2), || buffer.write_index() == 8));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(buffer.write_index(), 8);
        assert_eq!(buffer.next_sequential(7, || false).unwrap().unwrap()[..], [7; BLOCK]);

        buffer.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_exhausted_source_completes() {
        let buffer = buffer(4, 2);
        let slot = buffer.register(Cursor::Reading(1));
        let (build, mut watch) = BuildSignal::channel();
        let feeder = SequentialFeeder::new(Arc::clone(&buffer), source(3), Default::default());
        let handle = feeder.spawn(build).unwrap();

        let mut delivered = Vec::new();
        let mut block = 1;
        while let Some(data) = buffer.next_sequential(block, || false).unwrap() {
            delivered.extend_from_slice(&data);
            block += 1;
            buffer.set_cursor(slot, Cursor::Reading(block));
            buffer.notify_advanced();
        }
        handle.join().unwrap();

        assert_eq!(delivered, vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);
        assert_eq!(buffer.status(), FeedStatus::Completed);
        assert!(tokio_test::block_on(watch.wait()));
    }

    #[test]
    fn test_partial_last_block_is_kept() {
        let buffer = buffer(4, 2);
        let (build, _watch) = BuildSignal::channel();
        let data = SequentialSource::Reader(Box::new(IoCursor::new(vec![5u8; 6])));
        SequentialFeeder::new(Arc::clone(&buffer), data, Default::default()).run(build);

        assert_eq!(buffer.next_sequential(1, || false).unwrap().unwrap().len(), 4);
        assert_eq!(buffer.next_sequential(2, || false).unwrap().unwrap().len(), 2);
        assert_eq!(buffer.next_sequential(3, || false).unwrap(), None);
    }

    #[test]
    fn test_read_failure_aborts_session() {
        let buffer = buffer(4, 2);
        let (build, watch) = BuildSignal::channel();
        let failing = SequentialSource::Reader(Box::new(Failing { good: BLOCK }));
        SequentialFeeder::new(Arc::clone(&buffer), failing, Default::default()).run(build);

        assert_eq!(buffer.status(), FeedStatus::Aborted);
        // The first block made it, so the build itself succeeded.
        assert_eq!(watch.outcome(), Some(true));
        assert!(buffer.next_sequential(1, || false).unwrap().is_some());
        assert_matches!(buffer.next_sequential(2, || false), Err(Error::FeedAborted));
    }

    #[test]
    fn test_failed_first_read_fails_build() {
        let buffer = buffer(4, 2);
        let (build, watch) = BuildSignal::channel();
        let failing = SequentialSource::Reader(Box::new(Failing { good: 0 }));
        SequentialFeeder::new(Arc::clone(&buffer), failing, Default::default()).run(build);

        assert_eq!(buffer.status(), FeedStatus::Aborted);
        assert_eq!(watch.outcome(), Some(false));
        assert_matches!(buffer.next_sequential(1, || false), Err(Error::FeedAborted));
    }

    #[test]
    fn test_unopenable_source_fails_build() {
        let buffer = buffer(4, 2);
        let (build, watch) = BuildSignal::channel();
        let missing = SequentialSource::Path("/no/such/media.ts".into());
        SequentialFeeder::new(Arc::clone(&buffer), missing, Default::default()).run(build);

        assert_eq!(watch.outcome(), Some(false));
        assert_eq!(buffer.status(), FeedStatus::Aborted);
    }
}
