//! Connection ids and room keys.
//!
//! Both are newtypes over `String` so a room key can never be passed where a
//! connection id is expected.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Process-unique id of one transport connection.
///
/// Two connections that present the same [`Identity`](crate::Identity)
/// (a reconnect racing its predecessor) still get distinct ids. Ids are
/// `conn_` followed by a UUID v7, so they sort by creation time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new time-ordered id.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a room: the request path of the handshake, verbatim.
///
/// No normalization is applied. `/lobby` and `/lobby/` are different rooms.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomKey(String);

impl RoomKey {
    /// Build a room key from a request path.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomKey {
    fn from(path: &str) -> Self {
        Self(path.to_owned())
    }
}

impl From<String> for RoomKey {
    fn from(path: String) -> Self {
        Self(path)
    }
}

impl AsRef<str> for RoomKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn connection_ids_sort_by_creation() {
        let ids: Vec<ConnectionId> = (0..50).map(|_| ConnectionId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() < w[1].as_str(), "not monotonic: {} >= {}", w[0], w[1]);
        }
    }

    #[test]
    fn room_key_is_verbatim() {
        let key = RoomKey::from("/Lobby/");
        assert_eq!(key.as_str(), "/Lobby/");
        assert_ne!(key, RoomKey::from("/lobby"));
        assert_ne!(RoomKey::from("/lobby/"), RoomKey::from("/lobby"));
    }

    #[test]
    fn room_key_serializes_as_string() {
        let key = RoomKey::new("/lobby");
        assert_eq!(serde_json::to_string(&key).unwrap(), r#""/lobby""#);
    }
}
