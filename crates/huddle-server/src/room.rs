//! Room membership and fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use huddle_core::{Identity, Payload, RoomKey};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::errors::{JoinError, SendError};
use crate::metrics::{MESSAGES_RELAYED_TOTAL, SEND_FAILURES_TOTAL};
use crate::websocket::connection::{Connection, SendOutcome};

/// Per-recipient tally of one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Payloads queued for a recipient.
    pub delivered: usize,
    /// Recipients that were no longer open.
    pub skipped: usize,
    /// Recipients whose send failed.
    pub failed: usize,
}

struct RoomInner {
    members: HashMap<Identity, Arc<Connection>>,
    retired: bool,
}

/// The set of connections that share one room key.
///
/// Membership is keyed by identity: at most one connection per identity.
/// The member lock is never held across an await.
pub struct Room {
    key: RoomKey,
    inner: Mutex<RoomInner>,
}

impl Room {
    /// Create an empty room.
    pub fn new(key: RoomKey) -> Self {
        Self {
            key,
            inner: Mutex::new(RoomInner {
                members: HashMap::new(),
                retired: false,
            }),
        }
    }

    /// Key of this room.
    pub fn key(&self) -> &RoomKey {
        &self.key
    }

    /// Add `connection` as the member for its identity.
    ///
    /// An existing member with the same identity is removed and closed.
    pub fn join(&self, connection: Arc<Connection>) -> Result<(), JoinError> {
        let replaced = {
            let mut inner = self.inner.lock();
            if inner.retired {
                return Err(JoinError::RoomRetired(self.key.to_string()));
            }
            inner
                .members
                .insert(connection.identity().clone(), connection.clone())
        };

        if let Some(old) = replaced {
            if !Arc::ptr_eq(&old, &connection) {
                debug!(
                    room = %self.key,
                    identity = %old.identity(),
                    old_conn = %old.id(),
                    new_conn = %connection.id(),
                    "identity rejoined, closing previous connection"
                );
                let _ = old.close();
            }
        }
        Ok(())
    }

    /// Remove the member for `identity`, returning it.
    ///
    /// This does not reclaim the room. Go through
    /// [`RoomRegistry::leave_identity`](crate::registry::RoomRegistry::leave_identity)
    /// so an emptied room is dropped from the registry.
    pub fn leave(&self, identity: &Identity) -> Option<Arc<Connection>> {
        self.inner.lock().members.remove(identity)
    }

    /// Remove `connection` only if it is still the member for its identity.
    pub fn detach(&self, connection: &Arc<Connection>) -> bool {
        let mut inner = self.inner.lock();
        match inner.members.get(connection.identity()) {
            Some(current) if Arc::ptr_eq(current, connection) => {
                let _ = inner.members.remove(connection.identity());
                true
            }
            _ => false,
        }
    }

    /// Deliver `payload` to every member except `sender`.
    ///
    /// The payload is encoded once. A send failure is logged and counted and
    /// delivery continues with the remaining members.
    pub fn broadcast(&self, sender: &Identity, payload: &Payload) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let frame = match payload.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(room = %self.key, error = %e, "failed to encode payload");
                return report;
            }
        };

        let inner = self.inner.lock();
        for (identity, member) in &inner.members {
            if identity == sender {
                continue;
            }
            match member.send_frame(frame.clone()) {
                Ok(SendOutcome::Queued) => report.delivered += 1,
                Ok(SendOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    log_send_failure(&self.key, member, &e);
                }
            }
        }
        drop(inner);

        metrics::counter!(MESSAGES_RELAYED_TOTAL).increment(report.delivered as u64);
        report
    }

    /// Snapshot of the current members.
    pub fn members(&self) -> Vec<Arc<Connection>> {
        self.inner.lock().members.values().cloned().collect()
    }

    /// Snapshot of the current member identities.
    pub fn identities(&self) -> Vec<Identity> {
        self.inner.lock().members.keys().cloned().collect()
    }

    /// Whether `identity` is a member.
    pub fn contains(&self, identity: &Identity) -> bool {
        self.inner.lock().members.contains_key(identity)
    }

    /// Member count.
    pub fn len(&self) -> usize {
        self.inner.lock().members.len()
    }

    /// Whether the room has no members.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().members.is_empty()
    }

    /// Whether the room was reclaimed and refuses joins.
    pub fn is_retired(&self) -> bool {
        self.inner.lock().retired
    }

    /// Retire the room if it is empty. Returns `true` if it is now retired.
    pub(crate) fn try_retire(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.members.is_empty() {
            inner.retired = true;
        }
        inner.retired
    }

    /// Close every member. Members stay until their own cleanup detaches them.
    pub fn close_all(&self) -> usize {
        let members = self.members();
        members.iter().filter(|conn| conn.close()).count()
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("key", &self.key)
            .field("members", &self.len())
            .finish_non_exhaustive()
    }
}

fn log_send_failure(room: &RoomKey, member: &Connection, error: &SendError) {
    warn!(
        room = %room,
        identity = %member.identity(),
        conn_id = %member.id(),
        error = %error,
        "failed to relay message"
    );
    metrics::counter!(SEND_FAILURES_TOTAL, "kind" => error.error_kind()).increment(1);
}
