//! Shared test harness for integration tests.
//!
//! [`TestHarness`] starts a [`MediaServer`] on an ephemeral local port with a
//! deliberately small buffer, and waits for the feed to build.
//! [`RangeResponder`] plays a remote source for `wiremock`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mediafeed::config::{BufferConfig, Config, ServerConfig};
use mediafeed::server::{MediaServer, ServerHandle};
use mediafeed_common::MediaFeedDescriptor;
use wiremock::{Request, Respond, ResponseTemplate};

pub const BLOCK: usize = 16;

/// Config with a tiny buffer so tests cross block and window boundaries.
pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            allowed_ips: Vec::new(),
        },
        buffer: BufferConfig {
            block_size: BLOCK,
            capacity_blocks: 8,
            ahead_blocks: 4,
            liveness_tick_ms: 20,
        },
        ..Config::default()
    }
}

/// Deterministic, non-repeating-per-block test content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

pub fn write_media(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).expect("failed to write media file");
    path
}

/// A started server plus an HTTP client.
pub struct TestHarness {
    pub handle: ServerHandle,
    pub client: reqwest::Client,
}

impl TestHarness {
    /// Start a server for `descriptor` with [`test_config`].
    pub async fn start(descriptor: MediaFeedDescriptor) -> Self {
        Self::start_server(MediaServer::new(test_config(), descriptor)).await
    }

    /// Start a prepared server and wait for a successful build.
    pub async fn start_server(server: MediaServer) -> Self {
        let handle = server.start().await.expect("failed to start media server");
        assert!(handle.wait_built().await, "feed failed to build");
        Self {
            handle,
            client: reqwest::Client::new(),
        }
    }

    pub fn media_url(&self) -> String {
        self.handle.media_url()
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.handle.local_addr(), path)
    }

    pub async fn get_range(&self, range: &str) -> reqwest::Response {
        self.client
            .get(self.media_url())
            .header("range", range)
            .send()
            .await
            .expect("request failed")
    }
}

/// Upstream that honours `Range: bytes=a-b` and `bytes=a-`.
pub struct RangeResponder {
    data: Arc<Vec<u8>>,
    ranges: bool,
    shortfall: usize,
    failures: usize,
    attempts: AtomicUsize,
    closing: bool,
}

impl RangeResponder {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            ranges: true,
            shortfall: 0,
            failures: 0,
            attempts: AtomicUsize::new(0),
            closing: false,
        }
    }

    /// Answer the first `n` data requests with 500. The opening
    /// `bytes=0-0` request is never failed.
    pub fn fail_first(mut self, n: usize) -> Self {
        self.failures = n;
        self
    }

    /// Send `Connection: close` on every response.
    pub fn closing(mut self) -> Self {
        self.closing = true;
        self
    }

    /// Ignore `Range` and always answer 200 with the whole body.
    pub fn without_ranges(mut self) -> Self {
        self.ranges = false;
        self
    }

    /// Answer every range with `n` bytes fewer than asked.
    pub fn short_by(mut self, n: usize) -> Self {
        self.shortfall = n;
        self
    }

    fn requested(&self, request: &Request) -> Option<(usize, usize)> {
        let raw = request.headers.get("range")?.to_str().ok()?;
        let (first, last) = raw.strip_prefix("bytes=")?.split_once('-')?;
        let start: usize = first.parse().ok()?;
        let end = match last {
            "" => self.data.len(),
            last => last.parse::<usize>().ok()? + 1,
        };
        Some((start, end.min(self.data.len())))
    }

    fn failing(&self, request: &Request) -> bool {
        if self.failures == 0 {
            return false;
        }
        let opening = request
            .headers
            .get("range")
            .is_some_and(|v| v.as_bytes() == b"bytes=0-0");
        !opening && self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures
    }

    fn answer(&self, request: &Request) -> ResponseTemplate {
        if self.failing(request) {
            return ResponseTemplate::new(500);
        }
        if !self.ranges {
            return ResponseTemplate::new(200).set_body_bytes(self.data.to_vec());
        }
        match self.requested(request) {
            Some((start, end)) if start < end => {
                let end = end.saturating_sub(self.shortfall).max(start);
                ResponseTemplate::new(206)
                    .insert_header(
                        "content-range",
                        format!("bytes {}-{}/{}", start, end.max(start + 1) - 1, self.data.len()),
                    )
                    .set_body_bytes(self.data[start..end].to_vec())
            }
            Some(_) => ResponseTemplate::new(416),
            None => ResponseTemplate::new(200).set_body_bytes(self.data.to_vec()),
        }
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let response = self.answer(request);
        if self.closing {
            response.insert_header("connection", "close")
        } else {
            response
        }
    }
}
