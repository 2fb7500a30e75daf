//! Observer streams
//!
//! Front ends do not get callbacks: they subscribe to a log-line stream
//! (`broadcast`) and a presence stream (`watch`) and consume them at their
//! own pace. A lagging log subscriber loses old lines, never blocks the relay.

use tokio::sync::{broadcast, watch};
use tracing::debug;

/// Capacity of the log-line stream
const LOG_CAPACITY: usize = 1024;

/// Outbound streams consumed by front ends
#[derive(Debug, Clone)]
pub struct RelayEvents {
    log_tx: broadcast::Sender<String>,
    presence_tx: watch::Sender<Vec<String>>,
}

impl RelayEvents {
    /// Create both streams
    pub fn new() -> Self {
        let (log_tx, _) = broadcast::channel(LOG_CAPACITY);
        let (presence_tx, _) = watch::channel(Vec::new());
        Self {
            log_tx,
            presence_tx,
        }
    }

    /// Publish a log line; dropped when nobody listens
    pub fn log(&self, line: impl Into<String>) {
        let _ = self.log_tx.send(line.into());
    }

    /// Publish the current roster
    pub fn presence(&self, names: Vec<String>) {
        debug!(count = names.len(), "presence changed");
        self.presence_tx.send_replace(names);
    }

    /// Subscribe to log lines published from now on
    pub fn subscribe_log(&self) -> broadcast::Receiver<String> {
        self.log_tx.subscribe()
    }

    /// Subscribe to roster updates (starts with the current roster)
    pub fn subscribe_presence(&self) -> watch::Receiver<Vec<String>> {
        self.presence_tx.subscribe()
    }
}

impl Default for RelayEvents {
    fn default() -> Self {
        Self::new()
    }
}
