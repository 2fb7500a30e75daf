//! Multi-client TCP Chat Relay Library
//!
//! A line-oriented chat relay built on tokio: clients connect over plain
//! TCP, join with a display name, and exchange broadcast chat, whispers,
//! presence notices and typing indicators.
//!
//! # Features
//! - Join handshake (`__JOIN__:<name>`, defaults to "Guest")
//! - Name-derived, collision-free session ids
//! - Chat broadcast with `[HH:MM:SS] [name] body` lines
//! - Whispers (`/w <name> <message>`)
//! - Typing indicators (`__TYPING__:on` / `__TYPING__:off`)
//! - Join/leave notices and `USERS` rosters
//! - Log and presence streams for front ends
//!
//! # Architecture
//! - `SessionRegistry` is the single source of truth for who is connected
//! - Each connection has a reader task (`handle_connection`) and a writer
//!   task that owns the socket's write half
//! - `Dispatcher` fans lines out through bounded per-session queues, so a
//!   slow client never stalls a broadcast
//!
//! # Example
//! ```ignore
//! use line_relay::{ChatRelay, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let relay = ChatRelay::bind(ServerConfig::with_addr("127.0.0.1:8080"))
//!         .await
//!         .unwrap();
//!     let handle = relay.handle();
//!
//!     let mut log = handle.subscribe_log();
//!     tokio::spawn(async move {
//!         while let Ok(line) = log.recv().await {
//!             println!("{}", line);
//!         }
//!     });
//!
//!     relay.run().await;
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handler;
pub mod identity;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use client::ChatClient;
pub use config::ServerConfig;
pub use dispatcher::Dispatcher;
pub use error::{ConfigError, RelayError, SendError};
pub use events::RelayEvents;
pub use handler::{handle_connection, ConnectionContext};
pub use identity::IdentityGenerator;
pub use protocol::{ClientLine, ServerLine};
pub use registry::SessionRegistry;
pub use server::{ChatRelay, RelayHandle};
pub use session::Session;
pub use types::{SessionId, TypingState};
