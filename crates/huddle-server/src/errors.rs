//! Server error types.

use huddle_core::CodecError;
use thiserror::Error;

/// Why a payload could not be queued for a connection.
///
/// Broadcasts log these and move on to the next recipient.
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection's outbound queue is full (slow reader).
    #[error("send queue full")]
    QueueFull,
    /// The socket writer has already gone away.
    #[error("connection writer is gone")]
    Disconnected,
    /// The payload could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl SendError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::Disconnected => "disconnected",
            Self::Codec(_) => "codec",
        }
    }
}

/// Why a connection could not be added to a room.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    /// The room was reclaimed by the registry and accepts no new members.
    #[error("room {0} was retired")]
    RoomRetired(String),
}

/// Why a handshake was refused before upgrading.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum AdmitError {
    /// Shutdown has begun; no new connections are accepted.
    #[error("server is shutting down")]
    ShuttingDown,
    /// The live connection limit has been reached.
    #[error("connection limit of {0} reached")]
    AtCapacity(usize),
}

impl AdmitError {
    /// Short classification string for logging/metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ShuttingDown => "shutting_down",
            Self::AtCapacity(_) => "at_capacity",
        }
    }
}

/// Errors starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The bound listener could not report its address.
    #[error("failed to read local address: {0}")]
    LocalAddr(std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_error_kinds() {
        assert_eq!(SendError::QueueFull.error_kind(), "queue_full");
        assert_eq!(SendError::Disconnected.error_kind(), "disconnected");
        let codec = huddle_core::Payload::from_text("nope").unwrap_err();
        assert_eq!(SendError::from(codec).error_kind(), "codec");
    }

    #[test]
    fn join_error_display() {
        let err = JoinError::RoomRetired("/lobby".into());
        assert_eq!(err.to_string(), "room /lobby was retired");
    }

    #[test]
    fn admit_error_reasons() {
        assert_eq!(AdmitError::ShuttingDown.reason(), "shutting_down");
        assert_eq!(AdmitError::AtCapacity(3).reason(), "at_capacity");
        assert_eq!(
            AdmitError::AtCapacity(3).to_string(),
            "connection limit of 3 reached"
        );
    }

    #[test]
    fn bind_error_display() {
        let err = ServerError::Bind {
            addr: "0.0.0.0:80".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("0.0.0.0:80"));
        assert!(err.to_string().contains("denied"));
    }
}
