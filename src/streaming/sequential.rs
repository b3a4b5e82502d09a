//! Chunked delivery of a sequential feed.
//!
//! Each connection drains the buffer from block 1 on a blocking thread and
//! hands blocks to the response body through a small channel. A closed
//! channel means the client went away.

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use mediafeed_common::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace, warn};

use super::dlna;
use crate::buffer::{Cursor, CursorLease, Release, RingBuffer};

/// Body chunks in flight per connection.
const CHANNEL_DEPTH: usize = 2;

/// Start a chunked response reading the buffer from its first block.
pub fn stream(buffer: &Arc<RingBuffer>) -> Response {
    let lease = buffer.lease(Cursor::Reading(1), Release::Finish);
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::task::spawn_blocking(move || drain(lease, tx));

    respond(Body::from_stream(ReceiverStream::new(rx)))
}

/// Headers only, without claiming a cursor.
pub fn head() -> Response {
    respond(Body::empty())
}

fn respond(body: Body) -> Response {
    let builder = dlna::media_headers(Response::builder().status(StatusCode::OK), false);
    builder.body(body).unwrap_or_else(|e| {
        tracing::error!("Failed to build sequential response: {e}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

/// Copy blocks to the client until end of stream, a failure, or the client
/// leaves.
fn drain(lease: CursorLease, tx: mpsc::Sender<io::Result<Bytes>>) {
    let buffer = Arc::clone(lease.buffer());
    let slot = lease.slot();
    let mut block = 1;

    loop {
        match buffer.next_sequential(block, || tx.is_closed()) {
            Ok(Some(data)) => {
                if tx.blocking_send(Ok(data)).is_err() {
                    debug!(slot, block, "Client disconnected");
                    return;
                }
                trace!(slot, block, "Delivered block");
                block += 1;
                lease.advance_to(block);
            }
            Ok(None) => {
                lease.finish_at(block);
                debug!(slot, blocks = block - 1, "Sequential delivery complete");
                return;
            }
            Err(Error::ConnectionWrite) => {
                debug!(slot, block, "Client disconnected while waiting");
                return;
            }
            Err(e) => {
                match &e {
                    Error::Overrun { .. } => warn!(slot, "Reader fell behind: {e}"),
                    _ => debug!(slot, block, "Ending delivery: {e}"),
                }
                drop(lease);
                // An error item aborts the body instead of ending it cleanly.
                let _ = tx.blocking_send(Err(io::Error::new(io::ErrorKind::Other, e.to_string())));
                return;
            }
        }
    }
}
