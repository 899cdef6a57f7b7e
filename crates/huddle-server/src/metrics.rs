//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Fails if a global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections accepted total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Handshakes refused total (counter, labels: reason).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Live rooms (gauge).
pub const ROOMS_ACTIVE: &str = "rooms_active";
/// Payloads queued for a recipient (counter).
pub const MESSAGES_RELAYED_TOTAL: &str = "messages_relayed_total";
/// Inbound frames dropped because they could not be decoded (counter).
pub const MESSAGES_REJECTED_TOTAL: &str = "messages_rejected_total";
/// Sends that failed during fan-out (counter, labels: kind).
pub const SEND_FAILURES_TOTAL: &str = "send_failures_total";
/// Identities minted for clients without a valid token (counter).
pub const IDENTITIES_MINTED_TOTAL: &str = "identities_minted_total";
