//! Session struct definition
//!
//! Represents a registered client: its id, display name and the handle to
//! its single outbound writer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::SendError;
use crate::types::SessionId;

/// Connected client information
///
/// Cloning a `Session` clones the handle, not the connection: every clone
/// feeds the same bounded queue, which is drained by exactly one writer
/// task owning the socket write half.
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique identifier for this session
    pub id: SessionId,
    /// Display name (not unique)
    pub display_name: String,
    /// Session → socket line queue
    sender: mpsc::Sender<String>,
    /// Cancelled to close the connection
    closer: CancellationToken,
    /// Consecutive lines dropped because the queue was full
    dropped: Arc<AtomicUsize>,
    /// Drops tolerated before the session is treated as stalled
    max_dropped: usize,
}

impl Session {
    /// Create a new session handle
    pub fn new(
        id: SessionId,
        display_name: impl Into<String>,
        sender: mpsc::Sender<String>,
        closer: CancellationToken,
        max_dropped: usize,
    ) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            sender,
            closer,
            dropped: Arc::new(AtomicUsize::new(0)),
            max_dropped: max_dropped.max(1),
        }
    }

    /// Queue one line for this session
    ///
    /// Never waits. A full queue drops the line; too many consecutive
    /// drops close the session.
    pub fn send(&self, line: impl Into<String>) -> Result<(), SendError> {
        match self.sender.try_send(line.into()) {
            Ok(()) => {
                self.dropped.store(0, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let drops = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if drops >= self.max_dropped {
                    warn!(session = %self.id, drops, "closing stalled session");
                    self.close();
                } else {
                    warn!(session = %self.id, drops, "outbound queue full, line dropped");
                }
                Err(SendError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    /// Ask the connection to close (idempotent)
    pub fn close(&self) {
        self.closer.cancel();
    }

    /// Check whether the session has been asked to close
    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled() || self.sender.is_closed()
    }
}
