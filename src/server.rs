//! Acceptor
//!
//! Binds the listening socket, spawns one connection handler per accepted
//! connection, and runs the shutdown sequence: stop accepting, close every
//! session, clear the registry, publish the final (empty) roster.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::RelayError;
use crate::events::RelayEvents;
use crate::handler::{handle_connection, ConnectionContext};
use crate::identity::IdentityGenerator;
use crate::protocol;
use crate::registry::SessionRegistry;

/// Pause after a failed accept so a persistent error does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound relay, ready to run
pub struct ChatRelay {
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: ConnectionContext,
}

impl ChatRelay {
    /// Bind the configured address
    pub async fn bind(config: ServerConfig) -> Result<Self, RelayError> {
        Self::bind_with(config, IdentityGenerator::new()).await
    }

    /// Bind with an injected id generator
    pub async fn bind_with(
        config: ServerConfig,
        ids: IdentityGenerator,
    ) -> Result<Self, RelayError> {
        config.validate()?;
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let registry = Arc::new(SessionRegistry::new());
        let ctx = ConnectionContext {
            dispatcher: Dispatcher::new(registry, RelayEvents::new()),
            ids: Arc::new(ids),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        };

        Ok(Self {
            listener,
            local_addr,
            ctx,
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Control handle for front ends
    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            dispatcher: self.ctx.dispatcher.clone(),
            shutdown: self.ctx.shutdown.clone(),
        }
    }

    /// Run the accept loop until shutdown, then clean up
    pub async fn run(self) {
        let Self {
            listener,
            local_addr,
            ctx,
        } = self;
        let events = ctx.dispatcher.events().clone();

        info!("Relay listening on {}", local_addr);
        events.log(format!("Server started on {}", local_addr));

        let tracker = TaskTracker::new();
        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection from {}", addr);
                        events.log(format!("Incoming connection from {}", addr));
                        let ctx = ctx.clone();
                        tracker.spawn(async move {
                            if let Err(e) = handle_connection(stream, addr.to_string(), ctx).await {
                                warn!("Connection handler error ({}): {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        info!("Relay shutting down");

        let sessions = ctx.dispatcher.registry().drain().await;
        for session in &sessions {
            session.close();
        }
        debug!("Closed {} sessions", sessions.len());
        ctx.dispatcher.publish_presence().await;

        tracker.close();
        if tokio::time::timeout(ctx.config.shutdown_grace(), tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "{} connection handlers still running after shutdown grace period",
                tracker.len()
            );
        }

        // Handlers that registered while the registry was being drained
        // may have published a roster; the last word is the empty one.
        let leftover = ctx.dispatcher.registry().drain().await;
        for session in &leftover {
            session.close();
        }
        ctx.dispatcher.publish_presence().await;

        events.log("Server stopped");
        info!("Relay stopped");
    }
}

/// Cloneable control surface of a running relay
///
/// This is what a front end holds: it subscribes to the log and presence
/// streams, submits operator notices, and triggers shutdown.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

impl RelayHandle {
    /// Broadcast a timestamped system notice to every session
    pub async fn announce(&self, text: &str) -> usize {
        let line = protocol::format_notice(&protocol::timestamp(), text);
        self.dispatcher.broadcast_to_all(&line).await
    }

    /// Display names currently connected
    pub async fn roster(&self) -> Vec<String> {
        self.dispatcher.registry().snapshot().await
    }

    /// Number of live sessions
    pub async fn session_count(&self) -> usize {
        self.dispatcher.registry().len().await
    }

    /// Log-line stream
    pub fn subscribe_log(&self) -> broadcast::Receiver<String> {
        self.dispatcher.events().subscribe_log()
    }

    /// Presence stream
    pub fn subscribe_presence(&self) -> watch::Receiver<Vec<String>> {
        self.dispatcher.events().subscribe_presence()
    }

    /// Stop the relay (idempotent)
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Check whether shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
