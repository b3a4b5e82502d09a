//! Byte-range delivery for size-known sources.
//!
//! Local files are read straight from disk; remote sources are read through
//! the windowed buffer. Either way the response length is exactly the
//! requested span.

use std::io::{self, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use mediafeed_common::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::dlna;
use super::range::{parse_range, ByteRange};
use crate::buffer::{Cursor, CursorLease, Release, RingBuffer};

const CHANNEL_DEPTH: usize = 2;

/// What a random-access request resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Serve the whole source with 200.
    Full(ByteRange),
    /// Serve a span with 206.
    Partial(ByteRange),
    /// Answer 416.
    Unsatisfiable,
}

impl Plan {
    /// Decide from the request headers. `Range` is ignored unless the source
    /// declared range support.
    pub fn from_headers(headers: &HeaderMap, size: u64, ranges: bool) -> Self {
        let raw = match headers.get(header::RANGE) {
            Some(raw) if ranges => raw,
            _ => return Self::Full(ByteRange::full(size)),
        };
        let parsed = raw
            .to_str()
            .map_err(|_| Error::bad_range("non-ASCII Range header"))
            .and_then(|raw| parse_range(raw, size));
        match parsed {
            Ok(span) => Self::Partial(span),
            Err(e) => {
                debug!(size, "Rejecting range: {e}");
                Self::Unsatisfiable
            }
        }
    }
}

fn respond(plan: Plan, size: u64, ranges: bool, body: Body) -> Response {
    let (status, span) = match plan {
        Plan::Full(span) => (StatusCode::OK, span),
        Plan::Partial(span) => (StatusCode::PARTIAL_CONTENT, span),
        Plan::Unsatisfiable => return unsatisfiable(size, ranges),
    };

    let mut builder = dlna::media_headers(Response::builder().status(status), ranges)
        .header(header::ACCEPT_RANGES, accept_ranges(ranges))
        .header(header::CONTENT_LENGTH, span.len());
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(header::CONTENT_RANGE, span.content_range(size));
    }
    builder.body(body).unwrap_or_else(|e| {
        tracing::error!("Failed to build range response: {e}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

fn unsatisfiable(size: u64, ranges: bool) -> Response {
    dlna::media_headers(
        Response::builder().status(StatusCode::RANGE_NOT_SATISFIABLE),
        ranges,
    )
    .header(header::ACCEPT_RANGES, accept_ranges(ranges))
    .header(header::CONTENT_RANGE, format!("bytes */{size}"))
    .body(Body::empty())
    .unwrap_or_else(|_| StatusCode::RANGE_NOT_SATISFIABLE.into_response())
}

fn accept_ranges(ranges: bool) -> HeaderValue {
    HeaderValue::from_static(if ranges { "bytes" } else { "none" })
}

/// Headers only, without claiming a cursor.
pub fn head(plan: Plan, size: u64, ranges: bool) -> Response {
    respond(plan, size, ranges, Body::empty())
}

/// Serve from a local file.
///
/// A cursor is still registered so connections show up in the buffer's
/// bookkeeping.
pub async fn serve_file(
    path: &Path,
    buffer: &Arc<RingBuffer>,
    plan: Plan,
    size: u64,
    ranges: bool,
    shutdown: CancellationToken,
) -> Response {
    let span = match plan {
        Plan::Full(span) | Plan::Partial(span) => span,
        Plan::Unsatisfiable => return unsatisfiable(size, ranges),
    };

    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            warn!(path = %path.display(), "Failed to open media file: {e}");
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    if let Err(e) = file.seek(SeekFrom::Start(span.start)).await {
        warn!(path = %path.display(), "Failed to seek media file: {e}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let block_size = buffer.block_size();
    let lease = buffer.lease(
        Cursor::Reading(span.start / block_size as u64 + 1),
        Release::Unregister,
    );
    debug!(slot = lease.slot(), start = span.start, end = span.end, "Serving file range");

    let stream = ReaderStream::with_capacity(file.take(span.len()), block_size)
        .take_until(shutdown.cancelled_owned())
        .map(move |chunk| {
            let _held = &lease;
            chunk
        });
    respond(plan, size, ranges, Body::from_stream(stream))
}

/// Serve through the windowed buffer.
pub fn serve_buffered(buffer: &Arc<RingBuffer>, plan: Plan, size: u64, ranges: bool) -> Response {
    let span = match plan {
        Plan::Full(span) | Plan::Partial(span) => span,
        Plan::Unsatisfiable => return unsatisfiable(size, ranges),
    };
    if span.is_empty() {
        return respond(plan, size, ranges, Body::empty());
    }

    let first = span.start / buffer.block_size() as u64 + 1;
    let lease = buffer.lease(Cursor::Reading(first), Release::Unregister);
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::task::spawn_blocking(move || pump(lease, span, tx));

    respond(plan, size, ranges, Body::from_stream(ReceiverStream::new(rx)))
}

/// Copy the in-span slice of each block to the client.
fn pump(lease: CursorLease, span: ByteRange, tx: mpsc::Sender<io::Result<Bytes>>) {
    let buffer = Arc::clone(lease.buffer());
    let slot = lease.slot();
    let block_size = buffer.block_size() as u64;
    let mut offset = span.start;

    while offset < span.end {
        let block = offset / block_size + 1;
        let data = match buffer.window_block(slot, block, || tx.is_closed()) {
            Ok(data) => data,
            Err(Error::ConnectionWrite) => {
                debug!(slot, block, "Client disconnected while waiting");
                return;
            }
            Err(e) => {
                match &e {
                    Error::Overrun { .. } => warn!(slot, "Reader expelled from window: {e}"),
                    _ => debug!(slot, block, "Ending delivery: {e}"),
                }
                drop(lease);
                let _ = tx.blocking_send(Err(io::Error::new(io::ErrorKind::Other, e.to_string())));
                return;
            }
        };

        let block_start = (block - 1) * block_size;
        let from = (offset - block_start) as usize;
        let to = (span.end.min(block_start + data.len() as u64) - block_start) as usize;
        if from >= to {
            warn!(slot, block, len = data.len(), "Block shorter than expected");
            drop(lease);
            let _ = tx.blocking_send(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("block {block} ends before byte {offset}"),
            )));
            return;
        }

        if tx.blocking_send(Ok(data.slice(from..to))).is_err() {
            debug!(slot, block, "Client disconnected");
            return;
        }
        trace!(slot, block, bytes = to - from, "Delivered slice");

        offset = block_start + to as u64;
        if offset < span.end {
            lease.advance_to(block + 1);
        }
    }
    drop(lease);
    debug!(slot, start = span.start, end = span.end, "Range delivery complete");
}
