//! # huddle-server
//!
//! Axum HTTP + `WebSocket` relay.
//!
//! - Handshake: identity from the `connectionid` cookie (minted and set when
//!   absent or malformed), room from the request path
//! - Rooms: per-identity membership, fan-out to every member but the sender,
//!   reclaimed once empty
//! - Liveness: writer-side pings and a heartbeat watchdog per connection
//! - `/health` and Prometheus `/metrics`
//! - Graceful shutdown via `CancellationToken` and a task tracker

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod room;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::{AdmitError, JoinError, SendError, ServerError};
pub use registry::RoomRegistry;
pub use room::{BroadcastReport, Room};
pub use server::{HuddleServer, ServerHandle};
pub use websocket::connection::{Connection, ConnectionState, SendOutcome};
pub use websocket::relay::Relay;
