//! Error types shared by the buffering engine and its HTTP surface.
//!
//! Producer-side failures (`SourceRead`, `ShortRead`) end the whole playback
//! session; consumer-side failures (`Overrun`, `BadRange`, `ConnectionWrite`)
//! end a single connection and leave the buffer untouched.

/// Error type for mediafeed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The upstream source failed while being read.
    #[error("source read failed: {0}")]
    SourceRead(#[source] std::io::Error),

    /// A fetched block was smaller than the remaining size said it should be.
    #[error("short read on block {block}: expected {expected} bytes, got {actual}")]
    ShortRead {
        block: u64,
        expected: usize,
        actual: usize,
    },

    /// The block a reader needs is no longer held by the buffer.
    #[error("block {block} is no longer buffered (oldest held: {oldest})")]
    Overrun { block: u64, oldest: u64 },

    /// The `Range` header could not be satisfied.
    #[error("unsatisfiable range: {0}")]
    BadRange(String),

    /// The client went away while a response was being written.
    #[error("client connection closed")]
    ConnectionWrite,

    /// The producer stopped on a failure; readers observe this instead of EOF.
    #[error("media feed aborted")]
    FeedAborted,

    /// The session was shut down.
    #[error("media session shut down")]
    Shutdown,

    /// The upstream HTTP exchange failed before any bytes were read.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Create a new BadRange error.
    pub fn bad_range<S: Into<String>>(msg: S) -> Self {
        Self::BadRange(msg.into())
    }

    /// Create a new Upstream error.
    pub fn upstream<S: Into<String>>(msg: S) -> Self {
        Self::Upstream(msg.into())
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Wrap an I/O error raised by the upstream source.
    pub fn source_read(err: std::io::Error) -> Self {
        Self::SourceRead(err)
    }

    /// Whether this failure ends the whole playback session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::SourceRead(_) | Self::ShortRead { .. } | Self::Upstream(_)
        )
    }

    /// Whether this failure only concerns the connection that hit it.
    pub fn is_connection_local(&self) -> bool {
        matches!(
            self,
            Self::Overrun { .. } | Self::BadRange(_) | Self::ConnectionWrite
        )
    }
}

/// Result type alias using the mediafeed Error type.
pub type Result<T> = std::result::Result<T, Error>;
