//! WebSocket connection handling: per-connection state, heartbeat and the
//! relay loop that joins connections to rooms.

pub mod connection;
pub mod heartbeat;
pub mod relay;
