//! Session orchestration: one feed, one buffer, one HTTP listener.
//!
//! [`MediaServer::start`] picks a delivery strategy, starts the producer,
//! binds the listener and only begins accepting connections once the
//! producer reports a successful build. [`ServerHandle::shutdown`] may be
//! called at any point and wakes every waiting thread.

pub mod access;

use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, Router};
use mediafeed_common::{Error, FeedStatus, MediaFeedDescriptor, Result, SourceKind};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferMode, RingBuffer};
use crate::config::Config;
use crate::feeder::{BuildSignal, BuildWatch, HttpFetcher, RandomAccessFeeder, SequentialFeeder};
use crate::source::SequentialSource;
use crate::streaming::{self, SubtitleStore};

pub use access::AllowList;

/// How the content reaches renderers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Chunked delivery from a linear feed.
    Sequential,
    /// Byte ranges through the windowed buffer.
    Buffered,
    /// Byte ranges straight from a local file.
    Filesystem(PathBuf),
}

/// Choose the strategy for a descriptor.
///
/// An explicitly supplied reader or an unknown size forces sequential
/// delivery. Otherwise local files are served from disk and URLs through
/// the windowed buffer.
pub fn select_strategy(descriptor: &MediaFeedDescriptor, reader_supplied: bool) -> Strategy {
    if reader_supplied || descriptor.size.is_none() {
        return Strategy::Sequential;
    }
    match &descriptor.source {
        SourceKind::Path(path) => Strategy::Filesystem(path.clone()),
        SourceKind::Url(_) => Strategy::Buffered,
    }
}

/// The feed being served.
pub struct MediaFeed {
    pub descriptor: MediaFeedDescriptor,
    pub strategy: Strategy,
    pub buffer: Arc<RingBuffer>,
}

impl MediaFeed {
    pub fn size(&self) -> u64 {
        self.descriptor.size.unwrap_or(0)
    }

    /// Whether `Range` requests are honoured. Local files are seekable
    /// unless the resolver said otherwise.
    pub fn ranges(&self) -> bool {
        match self.strategy {
            Strategy::Sequential => false,
            Strategy::Buffered => self.descriptor.supports_ranges(),
            Strategy::Filesystem(_) => self.descriptor.accepts_ranges != Some(false),
        }
    }

    pub fn media_path(&self) -> String {
        format!("/media{}", self.descriptor.extension)
    }
}

/// Shared handler context.
#[derive(Clone)]
pub struct AppContext {
    pub feed: Arc<MediaFeed>,
    pub subtitles: Arc<SubtitleStore>,
    pub shutdown: CancellationToken,
}

/// Create the router for one feed.
pub fn build_router(ctx: AppContext, allow: AllowList) -> Router {
    streaming::media_router(&ctx)
        .layer(middleware::from_fn_with_state(
            allow,
            access::allow_list_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Builder for one playback session.
pub struct MediaServer {
    config: Config,
    descriptor: MediaFeedDescriptor,
    reader: Option<Box<dyn Read + Send>>,
    subtitles: Arc<SubtitleStore>,
}

impl MediaServer {
    pub fn new(config: Config, descriptor: MediaFeedDescriptor) -> Self {
        Self {
            config,
            descriptor,
            reader: None,
            subtitles: Arc::new(SubtitleStore::new()),
        }
    }

    /// Feed from an already-open stream, such as a transcoder's output.
    pub fn with_reader(mut self, reader: impl Read + Send + 'static) -> Self {
        self.reader = Some(Box::new(reader));
        self
    }

    pub fn with_subtitles(mut self, subtitles: Arc<SubtitleStore>) -> Self {
        self.subtitles = subtitles;
        self
    }

    /// Start the producer and the listener.
    ///
    /// Returns once the listener is bound; use [`ServerHandle::wait_built`]
    /// to learn whether the feed came up.
    pub async fn start(self) -> Result<ServerHandle> {
        let Self {
            config,
            descriptor,
            reader,
            subtitles,
        } = self;

        let strategy = select_strategy(&descriptor, reader.is_some());
        let mode = match strategy {
            Strategy::Sequential => BufferMode::Sequential,
            _ => BufferMode::Windowed,
        };
        let buffer = Arc::new(RingBuffer::new(mode, &config.buffer));
        let feed = Arc::new(MediaFeed {
            descriptor,
            strategy,
            buffer: Arc::clone(&buffer),
        });

        let listener =
            TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
        let addr = listener.local_addr()?;
        info!(
            addr = %addr,
            strategy = ?feed.strategy,
            source = %feed.descriptor.source,
            title = %feed.descriptor.title,
            "Starting media server"
        );

        let (signal, build) = BuildSignal::channel();
        let producer = start_producer(&feed, reader, &config, signal).await?;

        let token = CancellationToken::new();
        let ctx = AppContext {
            feed: Arc::clone(&feed),
            subtitles: Arc::clone(&subtitles),
            shutdown: token.clone(),
        };
        let app = build_router(ctx, AllowList::new(config.server.allowed_addrs()));
        let server = tokio::spawn(run_accept_loop(listener, app, build.clone(), token.clone()));

        Ok(ServerHandle {
            addr,
            feed,
            subtitles,
            build,
            token,
            server: Some(server),
            producer,
        })
    }
}

async fn start_producer(
    feed: &MediaFeed,
    reader: Option<Box<dyn Read + Send>>,
    config: &Config,
    signal: BuildSignal,
) -> Result<Option<std::thread::JoinHandle<()>>> {
    let buffer = Arc::clone(&feed.buffer);
    match &feed.strategy {
        Strategy::Sequential => {
            let source = match reader {
                Some(reader) => SequentialSource::Reader(reader),
                None => SequentialSource::from(&feed.descriptor.source),
            };
            let feeder = SequentialFeeder::new(buffer, source, config.upstream.clone());
            Ok(Some(feeder.spawn(signal)?))
        }
        Strategy::Buffered => {
            let SourceKind::Url(url) = &feed.descriptor.source else {
                return Err(Error::invalid_input("buffered delivery needs a URL source"));
            };
            let ranges = feed.ranges();
            let fetcher = HttpFetcher::new(url.clone(), ranges, config.upstream.clone());
            let feeder = RandomAccessFeeder::new(buffer, fetcher, feed.size(), ranges);
            Ok(Some(feeder.spawn(signal)?))
        }
        Strategy::Filesystem(path) => {
            // Files are read per connection; there is nothing to produce.
            let readable = tokio::fs::metadata(path)
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false);
            if readable {
                buffer.mark_running();
            } else {
                error!(path = %path.display(), "Media file is not readable");
                buffer.abort();
            }
            signal.finish(readable);
            Ok(None)
        }
    }
}

/// Accept connections once the build succeeded, until cancelled.
async fn run_accept_loop(
    listener: TcpListener,
    app: Router,
    mut build: BuildWatch,
    token: CancellationToken,
) -> std::io::Result<()> {
    tokio::select! {
        built = build.wait() => {
            if !built {
                warn!("Feed failed to build; not accepting connections");
                return Ok(());
            }
        }
        _ = token.cancelled() => return Ok(()),
    }

    info!(addr = ?listener.local_addr().ok(), "Accepting connections");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(token.cancelled_owned())
    .await?;

    info!("Media server stopped");
    Ok(())
}

/// A running session.
///
/// Dropping the handle shuts the session down.
pub struct ServerHandle {
    addr: SocketAddr,
    feed: Arc<MediaFeed>,
    subtitles: Arc<SubtitleStore>,
    build: BuildWatch,
    token: CancellationToken,
    server: Option<JoinHandle<std::io::Result<()>>>,
    producer: Option<std::thread::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// URL of the primary content.
    pub fn media_url(&self) -> String {
        format!("http://{}{}", self.addr, self.feed.media_path())
    }

    pub fn strategy(&self) -> &Strategy {
        &self.feed.strategy
    }

    pub fn buffer(&self) -> &Arc<RingBuffer> {
        &self.feed.buffer
    }

    pub fn subtitles(&self) -> &Arc<SubtitleStore> {
        &self.subtitles
    }

    /// Resolves once the producer reported; `true` when the feed is up.
    pub async fn wait_built(&self) -> bool {
        self.build.clone().wait().await
    }

    pub fn status(&self) -> FeedStatus {
        self.feed.buffer.status()
    }

    /// Stop the session. Safe to call at any point, any number of times.
    pub fn shutdown(&self) {
        if self.token.is_cancelled() {
            return;
        }
        info!(addr = %self.addr, status = %self.status(), "Shutting down media server");
        self.feed.buffer.shutdown();
        if matches!(self.feed.strategy, Strategy::Filesystem(_)) {
            self.feed.buffer.complete();
        }
        self.token.cancel();
    }

    /// Shut down and wait for the listener to close.
    ///
    /// A producer still blocked inside an upstream read after a few liveness
    /// ticks is left to exit on its own.
    pub async fn stop(mut self) -> Result<()> {
        self.shutdown();

        if let Some(server) = self.server.take() {
            server
                .await
                .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        }

        if let Some(producer) = self.producer.take() {
            let tick = self.feed.buffer.liveness_tick();
            let deadline = tokio::time::Instant::now() + tick * 4;
            while !producer.is_finished() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            if producer.is_finished() {
                let _ = producer.join();
            } else {
                debug!("Producer still blocked on its source; detaching");
            }
        }
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_forces_sequential() {
        let descriptor = MediaFeedDescriptor::path("/m/a.mkv", "mkv", "a").with_size(10);
        assert_eq!(select_strategy(&descriptor, true), Strategy::Sequential);
    }

    #[test]
    fn test_unknown_size_is_sequential() {
        let descriptor = MediaFeedDescriptor::url("http://cdn/a.ts", "ts", "a").with_ranges(true);
        assert_eq!(select_strategy(&descriptor, false), Strategy::Sequential);
    }

    #[test]
    fn test_sized_sources() {
        let local = MediaFeedDescriptor::path("/m/a.mkv", "mkv", "a").with_size(10);
        assert_eq!(
            select_strategy(&local, false),
            Strategy::Filesystem(PathBuf::from("/m/a.mkv"))
        );
        let remote = MediaFeedDescriptor::url("http://cdn/a.mp4", "mp4", "a").with_size(10);
        assert_eq!(select_strategy(&remote, false), Strategy::Buffered);
    }

    #[test]
    fn test_feed_range_support() {
        let feed = |descriptor: MediaFeedDescriptor, reader| {
            let strategy = select_strategy(&descriptor, reader);
            MediaFeed {
                descriptor,
                strategy,
                buffer: Arc::new(RingBuffer::new(
                    BufferMode::Windowed,
                    &Default::default(),
                )),
            }
        };

        let remote = MediaFeedDescriptor::url("http://cdn/a.mp4", "mp4", "a").with_size(10);
        assert!(!feed(remote.clone(), false).ranges());
        assert!(feed(remote.with_ranges(true), false).ranges());

        let local = MediaFeedDescriptor::path("/m/a.mkv", ".mkv", "a").with_size(10);
        let served = feed(local.clone(), false);
        assert!(served.ranges());
        assert_eq!(served.media_path(), "/media.mkv");
        assert!(!feed(local.clone().with_ranges(false), false).ranges());
        assert!(!feed(local, true).ranges());
    }
}
