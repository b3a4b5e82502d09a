//! Producers that fill a [`RingBuffer`](crate::buffer::RingBuffer).
//!
//! Exactly one producer runs per buffer, on its own thread:
//!
//! - [`SequentialFeeder`] reads a one-shot stream front to back.
//! - [`RandomAccessFeeder`] keeps a window over a size-known remote source,
//!   anchored to the most recent active reader.
//!
//! Both report "build finished" once through a [`BuildSignal`].

mod fetch;
mod random;
mod sequential;

pub use fetch::{BlockFetcher, HttpFetcher};
pub use random::RandomAccessFeeder;
pub use sequential::SequentialFeeder;

use tokio::sync::watch;

/// Producer side of the one-shot "build finished" notification.
pub struct BuildSignal {
    tx: watch::Sender<Option<bool>>,
}

/// Orchestrator side of the "build finished" notification.
#[derive(Clone)]
pub struct BuildWatch {
    rx: watch::Receiver<Option<bool>>,
}

impl BuildSignal {
    pub fn channel() -> (BuildSignal, BuildWatch) {
        let (tx, rx) = watch::channel(None);
        (BuildSignal { tx }, BuildWatch { rx })
    }

    /// Report the build outcome. Only the first report counts.
    pub fn finish(&self, ok: bool) {
        let reported = self.tx.send_if_modified(|outcome| {
            if outcome.is_none() {
                *outcome = Some(ok);
                true
            } else {
                false
            }
        });
        if reported {
            tracing::debug!(ok, "Build finished");
        }
    }
}

impl BuildWatch {
    /// The outcome, if the producer reported one yet.
    pub fn outcome(&self) -> Option<bool> {
        *self.rx.borrow()
    }

    /// Wait for the outcome. A producer that vanished without reporting
    /// counts as a failed build.
    pub async fn wait(&mut self) -> bool {
        match self.rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.unwrap_or(false),
            Err(_) => false,
        }
    }
}
