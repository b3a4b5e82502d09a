//! Mediafeed-Common: shared types and errors.
//!
//! This crate provides what the buffering engine and its collaborators agree on:
//!
//! - **Feed description**: [`MediaFeedDescriptor`], the resolver's decision about what to play
//! - **Lifecycle**: [`FeedStatus`] as reported to the session orchestrator
//! - **Error Handling**: the [`Error`] taxonomy and its [`Result`] alias
//!
//! # Examples
//!
//! ```
//! use mediafeed_common::{Error, FeedStatus, MediaFeedDescriptor, Result};
//!
//! let feed = MediaFeedDescriptor::url("http://10.0.0.2/video.mkv", ".mkv", "Video")
//!     .with_size(4096)
//!     .with_ranges(true);
//! assert!(feed.supports_ranges());
//! assert!(!FeedStatus::Running.is_terminal());
//!
//! fn example() -> Result<()> {
//!     Err(Error::bad_range("bytes=abc-xyz"))
//! }
//! assert!(example().is_err());
//! ```

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
