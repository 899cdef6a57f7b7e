//! Handshake and per-connection relay loop.
//!
//! Each accepted socket runs as a reader loop (socket → room broadcast) plus
//! a writer task (outbound queue → socket, periodic pings). The connection's
//! close signal ends both.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use huddle_core::{Frame, Identity, IdentityProvider, Payload, RoomKey};
use tokio::sync::mpsc;
use tokio::time;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::ServerConfig;
use crate::errors::AdmitError;
use crate::metrics::{
    IDENTITIES_MINTED_TOTAL, MESSAGES_REJECTED_TOTAL, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL, WS_REJECTED_TOTAL,
};
use crate::registry::RoomRegistry;
use crate::room::Room;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::Connection;
use crate::websocket::heartbeat::{HeartbeatResult, run_heartbeat};

/// How long the writer may spend flushing queued frames and the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Why a connection's reader loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent a close frame or the stream ended.
    ClientClosed,
    /// Reading from the socket failed.
    TransportError,
    /// No inbound frame within the heartbeat timeout.
    HeartbeatTimeout,
    /// Server shutdown began.
    Shutdown,
    /// Closed from elsewhere: replaced by a newer connection for the same
    /// identity, a failed write, or a server-wide close.
    Closed,
}

impl CloseReason {
    /// Short label for logging/metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Shutdown => "shutdown",
            Self::Closed => "closed",
        }
    }
}

/// A reserved slot in the live connection count, released on drop.
#[derive(Debug)]
pub struct Admission {
    live: Arc<AtomicUsize>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        let _ = self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Accepts WebSocket handshakes and runs each connection.
#[derive(Clone)]
pub struct Relay {
    config: Arc<ServerConfig>,
    registry: Arc<RoomRegistry>,
    identities: Arc<dyn IdentityProvider>,
    shutdown: Arc<ShutdownCoordinator>,
    live: Arc<AtomicUsize>,
}

impl Relay {
    /// Create a relay over an explicitly owned registry.
    pub fn new(
        config: Arc<ServerConfig>,
        registry: Arc<RoomRegistry>,
        identities: Arc<dyn IdentityProvider>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        Self {
            config,
            registry,
            identities,
            shutdown,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The room registry this relay joins connections into.
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// The shutdown coordinator shared with the server.
    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Connections admitted and not yet finished.
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Reserve a connection slot, or refuse the handshake.
    pub fn admit(&self) -> Result<Admission, AdmitError> {
        if self.shutdown.is_shutting_down() {
            return Err(AdmitError::ShuttingDown);
        }
        let max = self.config.max_connections;
        let _ = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .map_err(|_| AdmitError::AtCapacity(max))?;
        Ok(Admission {
            live: self.live.clone(),
        })
    }

    /// Stop accepting and close every live connection.
    ///
    /// Returns the number of connections closed.
    pub fn shutdown(&self) -> usize {
        self.shutdown.shutdown();
        let closed = self.registry.close_all();
        info!(closed, "relay shutting down");
        closed
    }

    /// Run one upgraded connection to completion.
    pub async fn serve(
        self,
        socket: WebSocket,
        identity: Identity,
        room_key: RoomKey,
        admission: Admission,
    ) {
        let (tx, rx) = mpsc::channel(self.config.max_send_queue);
        let connection = Arc::new(Connection::new(identity, room_key, tx));
        let span = info_span!(
            "connection",
            conn_id = %connection.id(),
            identity = %connection.identity(),
            room = %connection.room_key()
        );
        self.run(socket, connection, rx, admission)
            .instrument(span)
            .await;
    }

    async fn run(
        self,
        socket: WebSocket,
        connection: Arc<Connection>,
        rx: mpsc::Receiver<Frame>,
        _admission: Admission,
    ) {
        let room = self.registry.join(&connection);
        metrics::counter!(WS_CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        info!(members = room.len(), "connection joined room");

        let (ws_tx, ws_rx) = socket.split();
        let writer = tokio::spawn(
            write_loop(ws_tx, rx, connection.clone(), self.config.heartbeat_interval)
                .in_current_span(),
        );

        let reason = self.read_loop(&connection, &room, ws_rx).await;

        let _ = connection.close();
        let _ = self.registry.leave(&connection);
        if let Err(e) = writer.await {
            warn!(error = %e, "writer task failed");
        }

        metrics::counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        metrics::gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        info!(
            reason = reason.as_str(),
            age_ms = connection.age().as_millis(),
            dropped = connection.drop_count(),
            "connection closed"
        );
    }

    async fn read_loop(
        &self,
        connection: &Arc<Connection>,
        room: &Room,
        mut ws_rx: SplitStream<WebSocket>,
    ) -> CloseReason {
        let shutdown = self.shutdown.token();
        let heartbeat = run_heartbeat(
            connection.clone(),
            self.config.heartbeat_interval,
            self.config.heartbeat_timeout,
            connection.close_signal(),
        );
        tokio::pin!(heartbeat);

        loop {
            tokio::select! {
                () = connection.closed() => return CloseReason::Closed,
                () = shutdown.cancelled() => return CloseReason::Shutdown,
                result = &mut heartbeat => {
                    return match result {
                        HeartbeatResult::TimedOut => {
                            warn!("heartbeat timed out");
                            CloseReason::HeartbeatTimeout
                        }
                        HeartbeatResult::Cancelled => CloseReason::Closed,
                    };
                }
                msg = ws_rx.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => {
                            debug!(error = %e, "websocket read failed");
                            let _ = connection.mark_closing();
                            return CloseReason::TransportError;
                        }
                        None => {
                            let _ = connection.mark_closing();
                            return CloseReason::ClientClosed;
                        }
                    };
                    connection.mark_alive();
                    match msg {
                        Message::Text(text) => {
                            let len = text.len();
                            match Payload::from_utf8(Bytes::from(text)) {
                                Ok(payload) => fan_out(connection, room, &payload),
                                Err(e) => {
                                    warn!(error = %e, len, "dropping undecodable message");
                                    metrics::counter!(MESSAGES_REJECTED_TOTAL).increment(1);
                                }
                            }
                        }
                        Message::Binary(bytes) => fan_out(connection, room, &Payload::Binary(bytes)),
                        Message::Ping(_) | Message::Pong(_) => {}
                        Message::Close(_) => {
                            let _ = connection.mark_closing();
                            return CloseReason::ClientClosed;
                        }
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("live", &self.live_connections())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn fan_out(connection: &Connection, room: &Room, payload: &Payload) {
    let report = room.broadcast(connection.identity(), payload);
    debug!(
        delivered = report.delivered,
        skipped = report.skipped,
        failed = report.failed,
        "relayed message"
    );
}

/// Handshake for every non-reserved path.
///
/// The room is the request path. The identity comes from the identity
/// cookie when it holds a well-formed token; otherwise a new identity is
/// minted and set on the upgrade response.
pub async fn ws_handler(
    State(relay): State<Relay>,
    uri: Uri,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> Response {
    let admission = match relay.admit() {
        Ok(admission) => admission,
        Err(e) => {
            warn!(path = uri.path(), error = %e, "refusing connection");
            metrics::counter!(WS_REJECTED_TOTAL, "reason" => e.reason()).increment(1);
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    };

    let room_key = RoomKey::new(uri.path());
    let cookie_name = relay.config.cookie_name.clone();
    let resolved = relay
        .identities
        .resolve_token(jar.get(&cookie_name).map(Cookie::value));

    let jar = if resolved.minted {
        metrics::counter!(IDENTITIES_MINTED_TOTAL).increment(1);
        debug!(identity = %resolved.identity, room = %room_key, "minted identity");
        jar.add(
            Cookie::build((cookie_name, resolved.identity.to_string()))
                .same_site(SameSite::Strict)
                .secure(relay.config.cookie_secure)
                .build(),
        )
    } else {
        jar
    };

    let identity = resolved.identity;
    let tracker = relay.shutdown.tracker().clone();
    let upgrade = ws
        .max_message_size(relay.config.max_message_size)
        .on_upgrade(move |socket| {
            tracker.track_future(relay.serve(socket, identity, room_key, admission))
        });

    (jar, upgrade).into_response()
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Frame>,
    connection: Arc<Connection>,
    ping_interval: Duration,
) {
    let close = connection.close_signal();
    let mut ping = time::interval(ping_interval);
    ping.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            () = close.cancelled() => break,
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                let Some(msg) = into_message(frame) else { continue };
                if let Err(e) = sink.send(msg).await {
                    debug!(error = %e, "websocket write failed");
                    let _ = connection.close();
                    return;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                    debug!(error = %e, "websocket ping failed");
                    let _ = connection.close();
                    return;
                }
            }
        }
    }

    // Flush what was queued before the close, then say goodbye.
    let flush = async {
        while let Ok(frame) = rx.try_recv() {
            let Some(msg) = into_message(frame) else { continue };
            if sink.send(msg).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    };
    if time::timeout(CLOSE_GRACE, flush).await.is_err() {
        debug!("close flush timed out");
    }
}

/// Wrap a frame for the socket without copying its body. A text frame whose
/// body is not UTF-8 is dropped.
fn into_message(frame: Frame) -> Option<Message> {
    match frame {
        Frame::Text(body) => match Utf8Bytes::try_from(body) {
            Ok(text) => Some(Message::Text(text)),
            Err(e) => {
                warn!(error = %e, "dropping text frame with invalid UTF-8");
                None
            }
        },
        Frame::Binary(bytes) => Some(Message::Binary(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::RandomIdentityProvider;

    fn make_relay(max_connections: usize) -> Relay {
        let config = ServerConfig {
            max_connections,
            ..ServerConfig::default()
        };
        Relay::new(
            Arc::new(config),
            Arc::new(RoomRegistry::new()),
            Arc::new(RandomIdentityProvider),
            Arc::new(ShutdownCoordinator::new()),
        )
    }

    #[test]
    fn admission_counts_live_connections() {
        let relay = make_relay(2);
        let first = relay.admit().unwrap();
        let second = relay.admit().unwrap();
        assert_eq!(relay.live_connections(), 2);
        assert_eq!(relay.admit().unwrap_err(), AdmitError::AtCapacity(2));

        drop(first);
        assert_eq!(relay.live_connections(), 1);
        let _third = relay.admit().unwrap();
        drop(second);
        assert_eq!(relay.live_connections(), 1);
    }

    #[test]
    fn admission_refused_after_shutdown() {
        let relay = make_relay(10);
        assert_eq!(relay.shutdown(), 0);
        assert_eq!(relay.admit().unwrap_err(), AdmitError::ShuttingDown);
        assert_eq!(relay.live_connections(), 0);
    }

    #[test]
    fn shutdown_closes_joined_connections() {
        let relay = make_relay(10);
        let (tx, _rx) = mpsc::channel(4);
        let conn = Arc::new(Connection::new(Identity::random(), RoomKey::from("/a"), tx));
        let _ = relay.registry().join(&conn);

        assert_eq!(relay.shutdown(), 1);
        assert!(!conn.is_open());
        assert!(relay.shutdown_coordinator().is_shutting_down());
    }

    #[test]
    fn text_frames_stay_text() {
        let msg = into_message(Frame::from(r#"{"a":1}"#));
        assert!(matches!(msg, Some(Message::Text(ref t)) if t.as_str() == r#"{"a":1}"#));
        let msg = into_message(Frame::Binary(Bytes::from_static(b"\x01")));
        assert!(matches!(msg, Some(Message::Binary(ref b)) if b.as_ref() == b"\x01"));
    }

    #[test]
    fn text_frame_shares_the_encoded_buffer() {
        let body = Bytes::from_static(br#"{"k":1,"k":2}"#);
        let Some(Message::Text(text)) = into_message(Frame::Text(body.clone())) else {
            panic!("expected text message");
        };
        assert_eq!(Bytes::from(text).as_ptr(), body.as_ptr());
    }

    #[test]
    fn text_frame_with_invalid_utf8_is_dropped() {
        assert!(into_message(Frame::Text(Bytes::from_static(&[0xff]))).is_none());
    }

    #[test]
    fn close_reason_labels() {
        assert_eq!(CloseReason::ClientClosed.as_str(), "client_closed");
        assert_eq!(CloseReason::HeartbeatTimeout.as_str(), "heartbeat_timeout");
        assert_eq!(CloseReason::Shutdown.as_str(), "shutdown");
    }
}
