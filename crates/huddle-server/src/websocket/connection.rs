//! WebSocket client connection state.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use huddle_core::{ConnectionId, Frame, Identity, Payload, RoomKey};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::errors::SendError;

/// Lifecycle of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Joined and relaying.
    Open = 0,
    /// The peer has gone; cleanup has not finished yet.
    Closing = 1,
    /// Closed. The socket writer has been told to release the transport.
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// What happened to a payload handed to [`Connection::send`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued for the socket writer.
    Queued,
    /// Dropped silently because the connection is no longer open.
    Skipped,
}

/// A connected WebSocket client.
///
/// The socket itself lives in the connection's writer task; this handle
/// reaches it through the outbound queue and the close signal.
pub struct Connection {
    id: ConnectionId,
    identity: Identity,
    room_key: RoomKey,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Frame>,
    state: AtomicU8,
    close_signal: CancellationToken,
    /// Whether the client has shown activity since the last heartbeat tick.
    is_alive: AtomicBool,
    connected_at: Instant,
    /// Count of payloads that could not be queued.
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Create an open connection.
    pub fn new(identity: Identity, room_key: RoomKey, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            id: ConnectionId::new(),
            identity,
            room_key,
            tx,
            state: AtomicU8::new(ConnectionState::Open as u8),
            close_signal: CancellationToken::new(),
            is_alive: AtomicBool::new(true),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Process-unique id of this connection.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Identity resolved at handshake.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Room this connection belongs to, fixed for its lifetime.
    pub fn room_key(&self) -> &RoomKey {
        &self.room_key
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the connection still accepts outbound payloads.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Encode `payload` and queue it for the client.
    pub fn send(&self, payload: &Payload) -> Result<SendOutcome, SendError> {
        if !self.is_open() {
            return Ok(SendOutcome::Skipped);
        }
        self.send_frame(payload.encode()?)
    }

    /// Queue an already encoded frame for the client.
    ///
    /// Never blocks: a full queue is reported as [`SendError::QueueFull`] and
    /// the frame is dropped.
    pub fn send_frame(&self, frame: Frame) -> Result<SendOutcome, SendError> {
        if !self.is_open() {
            return Ok(SendOutcome::Skipped);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(SendOutcome::Queued),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(SendError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(SendError::Disconnected)
            }
        }
    }

    /// Record that the peer has gone away. Returns `true` if the connection
    /// was open.
    pub fn mark_closing(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Close the connection.
    ///
    /// Idempotent: only the first call fires the close signal and returns
    /// `true`.
    pub fn close(&self) -> bool {
        let prev = self
            .state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if prev == ConnectionState::Closed as u8 {
            return false;
        }
        self.close_signal.cancel();
        true
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.close_signal.cancelled()
    }

    /// Owned handle on the close signal, for spawned tasks.
    pub fn close_signal(&self) -> CancellationToken {
        self.close_signal.clone()
    }

    /// Mark the connection as alive (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Total payloads dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("room_key", &self.room_key)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
