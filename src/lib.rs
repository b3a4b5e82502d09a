//! mediafeed - DLNA media buffering and delivery engine
//!
//! Streams one piece of media (a local file, a direct URL, or a process's
//! output) to DLNA renderers that may connect several times, at arbitrary
//! offsets, and read at their own pace. A single producer fills a
//! fixed-capacity [`buffer::RingBuffer`]; each HTTP connection reads from it
//! independently.
//!
//! ```no_run
//! use mediafeed::config::Config;
//! use mediafeed::server::MediaServer;
//! use mediafeed_common::MediaFeedDescriptor;
//!
//! # async fn example() -> mediafeed_common::Result<()> {
//! let descriptor = MediaFeedDescriptor::url("http://cdn.example/show.mp4", "mp4", "Show")
//!     .with_size(734_003_200)
//!     .with_ranges(true);
//! let handle = MediaServer::new(Config::default(), descriptor).start().await?;
//! if handle.wait_built().await {
//!     println!("renderers can fetch {}", handle.media_url());
//! }
//! handle.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod config;
pub mod feeder;
pub mod server;
pub mod source;
pub mod streaming;
