//! Core type definitions exchanged with the resolver and the orchestrator.
//!
//! Enums are serialized in lowercase so status snapshots can be handed to a
//! control panel as-is.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Where the media bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A file on the local filesystem.
    Path(PathBuf),
    /// A direct content URL (already resolved from any web page).
    Url(String),
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Url(url) => write!(f, "{url}"),
        }
    }
}

/// The resolver's decision about what to play.
///
/// Created once per playback attempt and read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFeedDescriptor {
    /// Location of the content.
    pub source: SourceKind,
    /// Total size in bytes, when the source announced it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Whether the source answers byte-range requests, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepts_ranges: Option<bool>,
    /// Extension served to renderers, including the leading dot (`.mkv`).
    pub extension: String,
    /// Human readable title.
    pub title: String,
}

impl MediaFeedDescriptor {
    /// Describe a local file.
    pub fn path(path: impl Into<PathBuf>, extension: &str, title: &str) -> Self {
        Self {
            source: SourceKind::Path(path.into()),
            size: None,
            accepts_ranges: None,
            extension: normalize_extension(extension),
            title: title.to_string(),
        }
    }

    /// Describe a direct content URL.
    pub fn url(url: impl Into<String>, extension: &str, title: &str) -> Self {
        Self {
            source: SourceKind::Url(url.into()),
            size: None,
            accepts_ranges: None,
            extension: normalize_extension(extension),
            title: title.to_string(),
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_ranges(mut self, accepts_ranges: bool) -> Self {
        self.accepts_ranges = Some(accepts_ranges);
        self
    }

    /// True only when the source explicitly declared range support.
    pub fn supports_ranges(&self) -> bool {
        self.accepts_ranges == Some(true)
    }

    /// True when the content lives on the local filesystem.
    pub fn is_local(&self) -> bool {
        matches!(self.source, SourceKind::Path(_))
    }
}

/// Ensure an extension carries exactly one leading dot.
pub fn normalize_extension(ext: &str) -> String {
    let trimmed = ext.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(".{trimmed}")
    }
}

/// Lifecycle of one media feed as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    /// The producer has not opened its source yet.
    Initializing,
    /// The producer stopped on a failure.
    Aborted,
    /// Data is flowing.
    Running,
    /// The source was read to its end.
    Completed,
}

impl FeedStatus {
    /// Whether production has stopped for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Aborted | Self::Completed)
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Aborted => write!(f, "aborted"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
        }
    }
}
