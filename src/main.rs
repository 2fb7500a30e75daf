//! Chat Relay - Entry Point
//!
//! Binds the relay, forwards its log and presence streams to tracing, and
//! shuts down cleanly on Ctrl-C.
//!
//! Usage: `line_relay [addr]`, `line_relay --config <file.json>` or `line_relay --help`

use std::env;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use line_relay::config::USAGE;
use line_relay::{ChatRelay, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // e.g., RUST_LOG=debug or RUST_LOG=line_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("line_relay=info")),
        )
        .init();

    let Some(config) = ServerConfig::from_args(env::args().skip(1))? else {
        println!("{}", USAGE);
        return Ok(());
    };
    let relay = ChatRelay::bind(config).await?;
    let handle = relay.handle();

    let mut log = handle.subscribe_log();
    tokio::spawn(async move {
        loop {
            match log.recv().await {
                Ok(line) => info!(target: "line_relay::log", "{}", line),
                Err(RecvError::Lagged(n)) => warn!("Log stream lagged, {} lines skipped", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut presence = handle.subscribe_presence();
    tokio::spawn(async move {
        while presence.changed().await.is_ok() {
            let names = presence.borrow_and_update().clone();
            info!(target: "line_relay::presence", "Online ({}): {}", names.len(), names.join(", "));
        }
    });

    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            ctrl_c.shutdown();
        }
    });

    relay.run().await;
    Ok(())
}
