//! Settings type definitions.
//!
//! Field names are camelCase on the wire. Every section is `#[serde(default)]`
//! so a settings file only needs the keys it changes.

use serde::{Deserialize, Serialize};

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HuddleSettings {
    /// Listener and connection limits.
    pub server: ServerSettings,
    /// Identity cookie attributes.
    pub identity: IdentitySettings,
    /// Log level and format.
    pub logging: LoggingSettings,
}

/// Listener, connection and liveness settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Capacity of each connection's outbound queue.
    pub max_send_queue: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Heartbeat ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a connection after this long without a pong.
    pub heartbeat_timeout_secs: u64,
    /// How long shutdown waits for connections to drain.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            max_connections: 10_000,
            max_send_queue: 256,
            max_message_size: 1024 * 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Attributes of the identity cookie handed to new clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentitySettings {
    /// Cookie carrying the identity token.
    pub cookie_name: String,
    /// Emit the `Secure` attribute.
    pub secure: bool,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            cookie_name: "connectionid".into(),
            secure: true,
        }
    }
}

/// Logging configuration. `RUST_LOG` takes precedence over `level`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (e.g. `info`, `huddle_server=debug`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
