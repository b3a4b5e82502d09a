//! HTTP delivery of the media feed.
//!
//! # Routes
//!
//! - `GET /media<ext>` - the content, chunked (sequential feed) or with
//!   byte ranges (random-access feed)
//! - `HEAD /media<ext>` - headers only, no cursor is registered
//! - `GET /mediasub<ext>` - the subtitle companion as deposited
//! - `GET /media.smi` - the subtitle companion as SAMI
//!
//! Anything else is 404.

mod dlna;
mod random;
mod range;
mod sequential;
mod subtitles;

pub use random::Plan;
pub use range::{parse_range, ByteRange};
pub use subtitles::{SamiConverter, SubtitleStore};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use std::sync::Arc;

use crate::server::{AppContext, Strategy};

/// Build the media routes for one feed.
pub fn media_router(ctx: &AppContext) -> Router<AppContext> {
    Router::new()
        .route(&ctx.feed.media_path(), get(media).head(media_head))
        .route("/media.smi", get(sami))
        .route("/:file", get(subtitle))
}

/// `CaptionInfo.sec` for the current subtitle, if any.
fn caption(ctx: &AppContext, headers: &HeaderMap) -> Option<HeaderValue> {
    let ext = ctx.subtitles.extension()?;
    let host = headers.get(header::HOST).and_then(|h| h.to_str().ok());
    dlna::caption_info(host, &ext)
}

async fn media(State(ctx): State<AppContext>, headers: HeaderMap) -> Response {
    let feed = &ctx.feed;
    let (size, ranges) = (feed.size(), feed.ranges());

    let response = match &feed.strategy {
        Strategy::Sequential => sequential::stream(&feed.buffer),
        Strategy::Buffered => {
            let plan = Plan::from_headers(&headers, size, ranges);
            random::serve_buffered(&feed.buffer, plan, size, ranges)
        }
        Strategy::Filesystem(path) => {
            let plan = Plan::from_headers(&headers, size, ranges);
            let shutdown = ctx.shutdown.clone();
            random::serve_file(path, &feed.buffer, plan, size, ranges, shutdown).await
        }
    };
    with_caption(response, &ctx, &headers)
}

async fn media_head(State(ctx): State<AppContext>, headers: HeaderMap) -> Response {
    let feed = &ctx.feed;
    let response = match feed.strategy {
        Strategy::Sequential => sequential::head(),
        _ => {
            let (size, ranges) = (feed.size(), feed.ranges());
            random::head(Plan::from_headers(&headers, size, ranges), size, ranges)
        }
    };
    with_caption(response, &ctx, &headers)
}

/// Point successful media responses at the subtitle companion.
fn with_caption(mut response: Response, ctx: &AppContext, headers: &HeaderMap) -> Response {
    if response.status().is_success() {
        if let Some(caption) = caption(ctx, headers) {
            response.headers_mut().insert(dlna::CAPTION_INFO.clone(), caption);
        }
    }
    response
}

async fn subtitle(State(ctx): State<AppContext>, Path(file): Path<String>) -> Response {
    let data = file
        .strip_prefix("mediasub")
        .and_then(|ext| ctx.subtitles.get(&format!(".{}", ext.trim_start_matches('.'))));
    match data {
        Some(data) => whole(data),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn sami(State(ctx): State<AppContext>) -> Response {
    let subtitles = Arc::clone(&ctx.subtitles);
    match tokio::task::spawn_blocking(move || subtitles.sami()).await {
        Ok(Ok(Some(data))) => whole(data),
        Ok(Ok(None)) => StatusCode::NOT_FOUND.into_response(),
        Ok(Err(e)) => {
            tracing::warn!("SAMI conversion failed: {e}");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(e) => {
            tracing::error!("SAMI conversion task failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// A companion resource served as a single chunk.
fn whole(data: Bytes) -> Response {
    let chunk = futures::stream::once(async move { Ok::<_, std::io::Error>(data) });
    dlna::media_headers(Response::builder().status(StatusCode::OK), false)
        .body(Body::from_stream(chunk))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
