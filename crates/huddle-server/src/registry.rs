//! Process-wide map of room key to room.

use std::sync::Arc;

use dashmap::DashMap;
use huddle_core::{Identity, RoomKey};
use tracing::debug;

use crate::errors::JoinError;
use crate::metrics::ROOMS_ACTIVE;
use crate::room::Room;
use crate::websocket::connection::Connection;

/// Owns every live room.
///
/// Rooms are created on first join and removed once empty. Lock order is
/// registry shard, then room.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomKey, Arc<Room>>,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The room for `key`, creating it if absent.
    pub fn get_or_create(&self, key: &RoomKey) -> Arc<Room> {
        if let Some(room) = self.rooms.get(key) {
            return Arc::clone(room.value());
        }
        let room = self
            .rooms
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(room = %key, "room created");
                Arc::new(Room::new(key.clone()))
            })
            .value()
            .clone();
        self.record_room_count();
        room
    }

    /// Remove the room for `key` if it has no members.
    ///
    /// Emptiness is rechecked under the room lock while the registry entry is
    /// held, so a concurrent join either lands before removal (and the room
    /// stays) or sees the room retired and retries against a fresh one.
    pub fn release_if_empty(&self, key: &RoomKey) -> bool {
        let removed = self
            .rooms
            .remove_if(key, |_, room| room.try_retire())
            .is_some();
        if removed {
            debug!(room = %key, "room released");
            self.record_room_count();
        }
        removed
    }

    /// Add `connection` to the room named by its room key.
    pub fn join(&self, connection: &Arc<Connection>) -> Arc<Room> {
        loop {
            let room = self.get_or_create(connection.room_key());
            match room.join(connection.clone()) {
                Ok(()) => return room,
                Err(JoinError::RoomRetired(_)) => {
                    debug!(room = %connection.room_key(), "room retired during join, retrying");
                }
            }
        }
    }

    /// Remove `connection` from its room and reclaim the room if now empty.
    ///
    /// A connection that was already replaced by a newer one for the same
    /// identity leaves the room untouched.
    pub fn leave(&self, connection: &Arc<Connection>) -> bool {
        let key = connection.room_key();
        let Some(room) = self.get(key) else {
            return false;
        };
        let detached = room.detach(connection);
        let _ = self.release_if_empty(key);
        detached
    }

    /// Remove whichever connection holds `identity` in the room for `key`,
    /// and reclaim the room if that emptied it.
    ///
    /// Returns the removed connection. Unlike [`RoomRegistry::leave`] this
    /// evicts the current member even if it replaced an earlier connection.
    pub fn leave_identity(&self, key: &RoomKey, identity: &Identity) -> Option<Arc<Connection>> {
        let room = self.get(key)?;
        let removed = room.leave(identity);
        let _ = self.release_if_empty(key);
        removed
    }

    /// The room for `key`, if live.
    pub fn get(&self, key: &RoomKey) -> Option<Arc<Room>> {
        self.rooms.get(key).map(|room| Arc::clone(room.value()))
    }

    /// Whether a room exists for `key`.
    pub fn contains(&self, key: &RoomKey) -> bool {
        self.rooms.contains_key(key)
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of members across all rooms.
    pub fn connection_count(&self) -> usize {
        self.rooms.iter().map(|entry| entry.value().len()).sum()
    }

    /// Keys of all live rooms, sorted.
    pub fn room_keys(&self) -> Vec<RoomKey> {
        let mut keys: Vec<RoomKey> = self.rooms.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Close every connection in every room. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let rooms: Vec<Arc<Room>> = self.rooms.iter().map(|entry| entry.value().clone()).collect();
        rooms.iter().map(|room| room.close_all()).sum()
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_room_count(&self) {
        metrics::gauge!(ROOMS_ACTIVE).set(self.rooms.len() as f64);
    }
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("rooms", &self.rooms.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::{Frame, Payload};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn connect(room: &str, identity: &Identity) -> (Arc<Connection>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(8);
        let conn = Connection::new(identity.clone(), RoomKey::from(room), tx);
        (Arc::new(conn), rx)
    }

    #[test]
    fn get_or_create_returns_same_room() {
        let registry = RoomRegistry::new();
        let key = RoomKey::from("/a");
        let first = registry.get_or_create(&key);
        let second = registry.get_or_create(&key);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn release_if_empty_removes_empty_room() {
        let registry = RoomRegistry::new();
        let key = RoomKey::from("/a");
        let room = registry.get_or_create(&key);
        assert!(registry.release_if_empty(&key));
        assert!(!registry.contains(&key));
        assert!(room.is_retired());
        assert!(!registry.release_if_empty(&key));
    }

    #[test]
    fn release_if_empty_keeps_occupied_room() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = connect("/a", &Identity::random());
        let room = registry.join(&conn);
        assert!(!registry.release_if_empty(conn.room_key()));
        assert!(registry.contains(conn.room_key()));
        assert!(!room.is_retired());
    }

    #[test]
    fn join_after_retire_gets_fresh_room() {
        let registry = RoomRegistry::new();
        let key = RoomKey::from("/a");
        let stale = registry.get_or_create(&key);
        assert!(registry.release_if_empty(&key));

        let (conn, _rx) = connect("/a", &Identity::random());
        assert!(stale.join(conn.clone()).is_err());
        let fresh = registry.join(&conn);
        assert!(!Arc::ptr_eq(&stale, &fresh));
        assert!(fresh.contains(conn.identity()));
    }

    #[test]
    fn lobby_scenario() {
        let registry = RoomRegistry::new();
        let x = Identity::random();
        let y = Identity::random();
        let (cx, mut rx_x) = connect("/lobby", &x);
        let (cy, mut rx_y) = connect("/lobby", &y);

        let room = registry.join(&cx);
        let _ = registry.join(&cy);
        assert_eq!(registry.room_count(), 1);
        assert_eq!(room.len(), 2);

        let report = room.broadcast(&x, &Payload::from(json!({"type": "ping"})));
        assert_eq!(report.delivered, 1);
        assert_eq!(rx_y.try_recv().unwrap(), Frame::Text(r#"{"type":"ping"}"#.into()));
        assert!(rx_x.try_recv().is_err());

        let _ = cy.close();
        assert!(registry.leave(&cy));
        assert_eq!(room.identities(), vec![x.clone()]);
        assert!(registry.contains(&RoomKey::from("/lobby")));

        let _ = cx.close();
        assert!(registry.leave(&cx));
        assert!(!registry.contains(&RoomKey::from("/lobby")));
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn rooms_are_isolated() {
        let registry = RoomRegistry::new();
        let x = Identity::random();
        let (cx, _rx_x) = connect("/a", &x);
        let (cy, mut rx_y) = connect("/b", &Identity::random());
        let room_a = registry.join(&cx);
        let _ = registry.join(&cy);

        let report = room_a.broadcast(&x, &Payload::from(json!(1)));
        assert_eq!(report.delivered, 0);
        assert!(rx_y.try_recv().is_err());
        assert_eq!(registry.room_keys(), vec![RoomKey::from("/a"), RoomKey::from("/b")]);
    }

    #[test]
    fn stale_leave_does_not_evict_replacement() {
        let registry = RoomRegistry::new();
        let x = Identity::random();
        let (first, _rx1) = connect("/a", &x);
        let (second, _rx2) = connect("/a", &x);
        let _ = registry.join(&first);
        let room = registry.join(&second);
        assert!(!first.is_open());

        assert!(!registry.leave(&first));
        assert!(room.contains(&x));
        assert!(registry.contains(second.room_key()));
    }

    #[test]
    fn leave_identity_reclaims_emptied_room() {
        let registry = RoomRegistry::new();
        let x = Identity::random();
        let y = Identity::random();
        let (cx, _rx_x) = connect("/lobby", &x);
        let (cy, _rx_y) = connect("/lobby", &y);
        let room = registry.join(&cx);
        let _ = registry.join(&cy);
        let key = RoomKey::from("/lobby");

        let left = registry.leave_identity(&key, &y).unwrap();
        assert!(Arc::ptr_eq(&left, &cy));
        assert!(registry.contains(&key));

        let _ = registry.leave_identity(&key, &x).unwrap();
        assert!(!registry.contains(&key));
        assert!(room.is_retired());
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn leave_identity_for_absent_member_is_noop() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = connect("/a", &Identity::random());
        let _ = registry.join(&conn);
        assert!(registry.leave_identity(conn.room_key(), &Identity::random()).is_none());
        assert!(registry.contains(conn.room_key()));
        assert!(registry.leave_identity(&RoomKey::from("/b"), conn.identity()).is_none());
    }

    #[test]
    fn leave_unknown_room_is_noop() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = connect("/nowhere", &Identity::random());
        assert!(!registry.leave(&conn));
    }

    #[test]
    fn connection_count_and_close_all() {
        let registry = RoomRegistry::new();
        let (a, _ra) = connect("/a", &Identity::random());
        let (b, _rb) = connect("/a", &Identity::random());
        let (c, _rc) = connect("/b", &Identity::random());
        for conn in [&a, &b, &c] {
            let _ = registry.join(conn);
        }
        assert_eq!(registry.connection_count(), 3);
        assert_eq!(registry.close_all(), 3);
        assert!(!a.is_open() && !b.is_open() && !c.is_open());
    }

    #[test]
    fn concurrent_join_and_leave_never_lose_members() {
        let registry = Arc::new(RoomRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let (conn, _rx) = connect("/churn", &Identity::random());
                        let room = registry.join(&conn);
                        assert!(room.contains(conn.identity()));
                        assert!(registry.leave(&conn));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn member_survives_concurrent_churn() {
        let registry = Arc::new(RoomRegistry::new());
        let churners: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let (conn, _rx) = connect("/busy", &Identity::random());
                        let _ = registry.join(&conn);
                        let _ = registry.leave(&conn);
                    }
                })
            })
            .collect();

        let (stayer, _rx) = connect("/busy", &Identity::random());
        let _ = registry.join(&stayer);
        for handle in churners {
            handle.join().unwrap();
        }

        let room = registry.get(stayer.room_key()).unwrap();
        assert!(room.contains(stayer.identity()));
        assert!(!room.is_retired());
    }
}
