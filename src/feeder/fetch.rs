//! Block-aligned access to a remote source.

use std::io::{self, Read};

use bytes::Bytes;
use mediafeed_common::{Error, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONNECTION, RANGE};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::source::{blocking_client, read_block};

/// Fetches byte ranges of a size-known source for the windowed feeder.
///
/// Implementations run on the feeder thread and may block.
pub trait BlockFetcher: Send {
    /// Connect to the source before the first fetch.
    fn open(&mut self) -> Result<()>;

    /// Read exactly `len` bytes at `offset`, or fewer if the source ends.
    fn fetch(&mut self, offset: u64, len: usize) -> Result<Bytes>;

    /// Offset an open stream would continue from without a new request.
    fn position(&self) -> Option<u64>;

    /// Drop any open stream so the next fetch reconnects.
    fn reset(&mut self);
}

/// An open GET body and the offset it has reached.
struct Stream {
    response: Response,
    position: u64,
}

/// HTTP fetcher over the blocking reqwest client.
///
/// With range support and a keep-alive upstream every block is its own
/// `Range` request, retried once over a fresh connection. Otherwise the
/// fetcher holds one streaming GET and moves forward by discarding bytes;
/// moving backwards reopens the stream.
pub struct HttpFetcher {
    url: String,
    ranged: bool,
    upstream: UpstreamConfig,
    client: Option<Client>,
    persistent: bool,
    stream: Option<Stream>,
}

impl HttpFetcher {
    /// The client itself is built in [`BlockFetcher::open`], on the thread
    /// that will use it.
    pub fn new(url: impl Into<String>, ranged: bool, upstream: UpstreamConfig) -> Self {
        Self {
            url: url.into(),
            ranged,
            upstream,
            client: None,
            persistent: false,
            stream: None,
        }
    }

    fn client(&mut self) -> Result<&Client> {
        if self.client.is_none() {
            self.client = Some(blocking_client(&self.upstream)?);
        }
        self.client
            .as_ref()
            .ok_or_else(|| Error::upstream("HTTP client unavailable"))
    }

    fn range_request(&mut self, offset: u64, len: usize) -> Result<Bytes> {
        let url = self.url.clone();
        let last = offset + len.max(1) as u64 - 1;
        let response = self
            .client()?
            .get(&url)
            .header(RANGE, format!("bytes={offset}-{last}"))
            .send()
            .map_err(to_io)
            .map_err(Error::source_read)?;

        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(Error::upstream(format!(
                "range request for bytes {offset}-{last} answered {}",
                response.status()
            )));
        }
        response
            .bytes()
            .map_err(to_io)
            .map_err(Error::source_read)
    }

    fn open_stream(&mut self, offset: u64) -> Result<Stream> {
        let url = self.url.clone();
        let ranged = self.ranged && offset > 0;
        let mut request = self.client()?.get(&url);
        if ranged {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = request
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::upstream(format!("GET {url}: {e}")))?;

        let position = if response.status() == StatusCode::PARTIAL_CONTENT {
            offset
        } else {
            0
        };
        debug!(url = %url, position, "Opened upstream stream");
        Ok(Stream { response, position })
    }

    fn stream_fetch(&mut self, offset: u64, len: usize) -> Result<Bytes> {
        let mut stream = match self.stream.take() {
            Some(stream) if stream.position <= offset => stream,
            _ => self.open_stream(offset)?,
        };

        if stream.position < offset {
            let gap = offset - stream.position;
            let skipped = io::copy(&mut (&mut stream.response).take(gap), &mut io::sink())
                .map_err(Error::source_read)?;
            stream.position += skipped;
            if skipped < gap {
                return Err(Error::source_read(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended at byte {} while seeking to {offset}", stream.position),
                )));
            }
        }

        let mut buf = vec![0u8; len];
        let filled = read_block(&mut stream.response, &mut buf).map_err(Error::source_read)?;
        buf.truncate(filled);
        stream.position += filled as u64;
        self.stream = Some(stream);
        Ok(Bytes::from(buf))
    }
}

impl BlockFetcher for HttpFetcher {
    fn open(&mut self) -> Result<()> {
        if !self.ranged {
            let stream = self.open_stream(0)?;
            self.stream = Some(stream);
            return Ok(());
        }

        let url = self.url.clone();
        let response = self
            .client()?
            .get(&url)
            .header(RANGE, "bytes=0-0")
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::upstream(format!("GET {url}: {e}")))?;

        let closes = response
            .headers()
            .get(CONNECTION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("close"));
        self.persistent = response.status() == StatusCode::PARTIAL_CONTENT && !closes;
        debug!(url = %url, persistent = self.persistent, "Probed upstream");
        Ok(())
    }

    fn fetch(&mut self, offset: u64, len: usize) -> Result<Bytes> {
        if !self.persistent {
            return self.stream_fetch(offset, len);
        }
        match self.range_request(offset, len) {
            Ok(data) => Ok(data),
            Err(e) => {
                warn!(offset, "Range request failed, reconnecting once: {e}");
                self.client = None;
                self.range_request(offset, len)
            }
        }
    }

    fn position(&self) -> Option<u64> {
        self.stream.as_ref().map(|s| s.position)
    }

    fn reset(&mut self) {
        self.stream = None;
    }
}

fn to_io(e: reqwest::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}
