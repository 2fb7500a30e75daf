//! Relay configuration
//!
//! All fields have defaults, so an empty JSON object is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default listen address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Command line summary
pub const USAGE: &str = "Usage: line_relay [addr] | line_relay --config <file.json> | line_relay --help";

/// Runtime settings for a relay instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the acceptor binds to
    pub bind_addr: String,
    /// Per-session outbound queue capacity (lines)
    pub outbound_queue: usize,
    /// Consecutive dropped lines before a session is closed as stalled
    pub max_dropped_lines: usize,
    /// Upper bound for writing one line to a socket
    pub write_timeout_ms: u64,
    /// Longest accepted inbound line, in bytes
    pub max_line_length: usize,
    /// How long shutdown waits for connection handlers to finish
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_ADDR.to_string(),
            outbound_queue: 64,
            max_dropped_lines: 16,
            write_timeout_ms: 5_000,
            max_line_length: 8 * 1024,
            shutdown_grace_ms: 2_000,
        }
    }
}

impl ServerConfig {
    /// Default config bound to `addr`
    pub fn with_addr(addr: impl Into<String>) -> Self {
        Self {
            bind_addr: addr.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON config
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Build a config from command line arguments (program name excluded)
    ///
    /// Accepts nothing, `<addr>`, or `--config <file.json>`. Returns
    /// `Ok(None)` when help was requested.
    pub fn from_args<I>(args: I) -> Result<Option<Self>, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let config = match args.next().as_deref() {
            None => Self::default(),
            Some("-h") | Some("--help") => return Ok(None),
            Some("--config") => {
                let path = args
                    .next()
                    .ok_or_else(|| ConfigError::Usage(format!("--config requires a file path\n{}", USAGE)))?;
                Self::from_json_file(path)?
            }
            Some(flag) if flag.starts_with('-') => {
                return Err(ConfigError::Usage(format!("unknown option '{}'\n{}", flag, USAGE)));
            }
            Some(addr) => Self::with_addr(addr),
        };

        if let Some(extra) = args.next() {
            return Err(ConfigError::Usage(format!("unexpected argument '{}'\n{}", extra, USAGE)));
        }
        config.validate()?;
        Ok(Some(config))
    }

    /// Reject values the relay cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_addr.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "bind_addr",
                reason: "must not be empty",
            });
        }
        if self.outbound_queue == 0 {
            return Err(ConfigError::Invalid {
                field: "outbound_queue",
                reason: "must be at least 1",
            });
        }
        if self.max_dropped_lines == 0 {
            return Err(ConfigError::Invalid {
                field: "max_dropped_lines",
                reason: "must be at least 1",
            });
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "write_timeout_ms",
                reason: "must be positive",
            });
        }
        if self.max_line_length == 0 {
            return Err(ConfigError::Invalid {
                field: "max_line_length",
                reason: "must be positive",
            });
        }
        Ok(())
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
