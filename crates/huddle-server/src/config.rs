//! Server configuration.

use std::time::Duration;

use huddle_settings::HuddleSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the relay server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Capacity of each connection's outbound queue.
    pub max_send_queue: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Heartbeat interval.
    pub heartbeat_interval: Duration,
    /// Close a connection after this long without any inbound frame.
    pub heartbeat_timeout: Duration,
    /// How long shutdown waits for connections to drain.
    pub shutdown_timeout: Duration,
    /// Name of the identity cookie.
    pub cookie_name: String,
    /// Whether the identity cookie carries `Secure`.
    pub cookie_secure: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 10_000,
            max_send_queue: 256,
            max_message_size: 1024 * 1024,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            shutdown_timeout: Duration::from_secs(10),
            cookie_name: "connectionid".into(),
            cookie_secure: true,
        }
    }
}

impl From<&HuddleSettings> for ServerConfig {
    fn from(settings: &HuddleSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_connections: server.max_connections,
            max_send_queue: server.max_send_queue,
            max_message_size: server.max_message_size,
            heartbeat_interval: Duration::from_secs(server.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(server.heartbeat_timeout_secs),
            shutdown_timeout: Duration::from_secs(server.shutdown_timeout_secs),
            cookie_name: settings.identity.cookie_name.clone(),
            cookie_secure: settings.identity.secure,
        }
    }
}

impl ServerConfig {
    /// `host:port` string handed to the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_ephemeral() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn default_cookie() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.cookie_name, "connectionid");
        assert!(cfg.cookie_secure);
    }

    #[test]
    fn from_settings() {
        let mut settings = HuddleSettings::default();
        settings.server.port = 4242;
        settings.server.heartbeat_interval_secs = 5;
        settings.server.heartbeat_timeout_secs = 15;
        settings.identity.cookie_name = "hid".into();
        settings.identity.secure = false;

        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 4242);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(15));
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(cfg.cookie_name, "hid");
        assert!(!cfg.cookie_secure);
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
