//! Broadcast dispatcher
//!
//! Fans formatted lines out to registered sessions. Delivery is
//! best-effort: a failure for one session is logged and skipped, never
//! retried, and never stops delivery to the others. Queueing never waits,
//! so a stalled client cannot hold up a broadcast.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::events::RelayEvents;
use crate::registry::SessionRegistry;
use crate::session::Session;
use crate::types::SessionId;

/// Sends lines to sessions and mirrors them onto the log stream
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    events: RelayEvents,
}

impl Dispatcher {
    /// Create a dispatcher over the given registry
    pub fn new(registry: Arc<SessionRegistry>, events: RelayEvents) -> Self {
        Self { registry, events }
    }

    /// Registry this dispatcher delivers to
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Observer streams
    pub fn events(&self) -> &RelayEvents {
        &self.events
    }

    /// Send `line` to every registered session
    ///
    /// Returns the number of sessions the line was queued for.
    pub async fn broadcast_to_all(&self, line: &str) -> usize {
        self.fan_out(line, None).await
    }

    /// Send `line` to every registered session except `skip`
    pub async fn broadcast_except(&self, line: &str, skip: &SessionId) -> usize {
        self.fan_out(line, Some(skip)).await
    }

    /// Send `line` to one session
    pub fn send_to(&self, session: &Session, line: &str) -> bool {
        self.events.log(line);
        deliver(session, line)
    }

    /// Publish the current roster on the presence stream
    pub async fn publish_presence(&self) -> Vec<String> {
        let names = self.registry.snapshot().await;
        self.events.presence(names.clone());
        names
    }

    async fn fan_out(&self, line: &str, skip: Option<&SessionId>) -> usize {
        let sessions = self.registry.sessions().await;
        let mut delivered = 0;
        for session in sessions.iter().filter(|s| Some(&s.id) != skip) {
            if deliver(session, line) {
                delivered += 1;
            }
        }
        debug!(recipients = delivered, total = sessions.len(), "broadcast");
        self.events.log(line);
        delivered
    }
}

fn deliver(session: &Session, line: &str) -> bool {
    match session.send(line) {
        Ok(()) => true,
        Err(e) => {
            warn!(session = %session.id, error = %e, "failed to deliver line");
            false
        }
    }
}
