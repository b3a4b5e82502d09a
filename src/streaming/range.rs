//! `Range` header parsing.

use mediafeed_common::{Error, Result};

/// Half-open byte span `[start, end)` of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// The whole source.
    pub fn full(size: u64) -> Self {
        Self { start: 0, end: size }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// `Content-Range` value for a 206 response.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end - 1, size)
    }
}

/// Parse a single-range `Range` header against a source of `size` bytes.
///
/// Supports:
/// - `bytes=0-499` (inclusive end, converted to `[0, 500)`)
/// - `bytes=500-` (to the end)
/// - `bytes=-500` (last 500 bytes; longer suffixes start at 0)
///
/// The result must satisfy `0 <= start < end <= size`.
pub fn parse_range(header: &str, size: u64) -> Result<ByteRange> {
    let bad = || Error::bad_range(header);

    let spec = header.trim().strip_prefix("bytes=").ok_or_else(bad)?;
    if spec.contains(',') {
        return Err(bad());
    }
    let (first, last) = spec.split_once('-').ok_or_else(bad)?;
    let (first, last) = (first.trim(), last.trim());

    let range = match (first.is_empty(), last.is_empty()) {
        (true, false) => {
            let suffix: u64 = last.parse().map_err(|_| bad())?;
            if suffix == 0 {
                return Err(bad());
            }
            ByteRange {
                start: size.saturating_sub(suffix),
                end: size,
            }
        }
        (false, true) => ByteRange {
            start: first.parse().map_err(|_| bad())?,
            end: size,
        },
        (false, false) => {
            let start: u64 = first.parse().map_err(|_| bad())?;
            let last: u64 = last.parse().map_err(|_| bad())?;
            ByteRange {
                start,
                end: last.checked_add(1).ok_or_else(bad)?,
            }
        }
        (true, true) => return Err(bad()),
    };

    if range.start < range.end && range.end <= size {
        Ok(range)
    } else {
        Err(bad())
    }
}
