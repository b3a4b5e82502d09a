//! Linearly readable sources for the sequential feeder.
//!
//! A sequential feed is opened on the producer thread itself: blocking HTTP
//! clients must not be created or dropped on an async worker.

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;

use mediafeed_common::{Error, Result, SourceKind};

use crate::config::UpstreamConfig;

/// Something the sequential feeder can read from start to end exactly once.
pub enum SequentialSource {
    /// An already-open stream handed over by the orchestrator.
    Reader(Box<dyn Read + Send>),
    /// A local file.
    Path(PathBuf),
    /// A direct content URL, fetched with a single GET.
    Url(String),
}

impl SequentialSource {
    /// Open the source for reading.
    pub fn open(self, upstream: &UpstreamConfig) -> Result<Box<dyn Read + Send>> {
        match self {
            Self::Reader(reader) => Ok(reader),
            Self::Path(path) => {
                let file = File::open(&path).map_err(Error::source_read)?;
                tracing::debug!(path = %path.display(), "Opened local source");
                Ok(Box::new(file))
            }
            Self::Url(url) => {
                let client = blocking_client(upstream)?;
                let response = client
                    .get(&url)
                    .send()
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| Error::upstream(format!("GET {url}: {e}")))?;
                tracing::debug!(url = %url, status = %response.status(), "Opened remote source");
                Ok(Box::new(response))
            }
        }
    }
}

impl From<&SourceKind> for SequentialSource {
    fn from(kind: &SourceKind) -> Self {
        match kind {
            SourceKind::Path(path) => Self::Path(path.clone()),
            SourceKind::Url(url) => Self::Url(url.clone()),
        }
    }
}

impl std::fmt::Debug for SequentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reader(_) => f.write_str("Reader(..)"),
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
        }
    }
}

/// Build the blocking HTTP client used by producer threads.
pub fn blocking_client(upstream: &UpstreamConfig) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .connect_timeout(Duration::from_secs(upstream.connect_timeout_secs))
        .timeout(Duration::from_secs(upstream.read_timeout_secs))
        .user_agent(upstream.user_agent.clone())
        .build()
        .map_err(|e| Error::upstream(format!("failed to build HTTP client: {e}")))
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
///
/// Returns the number of bytes read; anything short of `buf.len()` means the
/// source is exhausted.
pub fn read_block(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Builder for an external process whose stdout feeds the buffer, such as a
/// transcoder.
///
/// # Example
///
/// ```no_run
/// use mediafeed::source::ProcessCommand;
///
/// # fn example() -> mediafeed_common::Result<()> {
/// let source = ProcessCommand::new("ffmpeg")
///     .args(["-i", "/media/show.mkv", "-f", "mpegts", "-"])
///     .spawn()?;
/// # drop(source);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    program: OsString,
    args: Vec<OsString>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append a single argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(mut self, iter: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Start the process with its stdout piped.
    pub fn spawn(&self) -> Result<ProcessSource> {
        let program = self.program.to_string_lossy().to_string();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::invalid_input(format!("failed to spawn {program}: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::invalid_input(format!("{program} has no stdout pipe")))?;

        tracing::info!(program = %program, pid = child.id(), "Spawned feed process");
        Ok(ProcessSource {
            program,
            child,
            stdout,
        })
    }
}

/// Stdout of a running process. Dropping it kills and reaps the process.
pub struct ProcessSource {
    program: String,
    child: Child,
    stdout: ChildStdout,
}

impl ProcessSource {
    pub fn id(&self) -> u32 {
        self.child.id()
    }
}

impl Read for ProcessSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout.read(buf)
    }
}

impl Drop for ProcessSource {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                tracing::debug!(program = %self.program, "Failed to kill feed process: {e}");
            }
        }
        let _ = self.child.wait();
        tracing::debug!(program = %self.program, "Feed process stopped");
    }
}
