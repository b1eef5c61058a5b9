//! Prometheus Metrics Module
//!
//! Exposes relay metrics in Prometheus format. Every series carries a
//! `bridge` label so the primary and secondary relays can be told apart.
//!
//! # Metrics Categories
//!
//! - **Frames**: upstream frames received, frames fanned out, send failures
//! - **Commands**: command outcomes and queue depth
//! - **Connection**: upstream link state, reconnect attempts, exhaustion
//! - **Clients**: connected downstream clients
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder. Later calls return the
/// handle installed by the first.
///
/// # Errors
///
/// Returns `BuildError` if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Frame counters
    describe_counter!(
        "signal_relay_upstream_frames_total",
        "Frames received from the upstream source"
    );
    describe_counter!(
        "signal_relay_frames_broadcast_total",
        "Frames fanned out to downstream clients, by kind"
    );
    describe_counter!(
        "signal_relay_client_send_failures_total",
        "Per-client send failures during fan-out"
    );
    describe_counter!(
        "signal_relay_malformed_payloads_total",
        "Upstream payloads that could not be parsed for violations"
    );

    // Commands
    describe_counter!(
        "signal_relay_commands_total",
        "Client commands by outcome"
    );
    describe_gauge!(
        "signal_relay_command_queue_depth",
        "Commands waiting for the upstream link"
    );

    // Connection
    describe_gauge!(
        "signal_relay_upstream_connected",
        "Whether the upstream link is open (0 or 1)"
    );
    describe_counter!(
        "signal_relay_reconnects_total",
        "Upstream reconnection attempts scheduled"
    );
    describe_counter!(
        "signal_relay_reconnects_exhausted_total",
        "Times a bounded bridge gave up reconnecting"
    );

    // Clients
    describe_gauge!(
        "signal_relay_clients",
        "Connected downstream clients"
    );

    describe_histogram!(
        "signal_relay_fanout_seconds",
        "Time to fan one frame out to all clients"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// What a fan-out carried.
#[derive(Debug, Clone, Copy)]
pub enum BroadcastKind {
    /// Upstream payload, forwarded verbatim.
    Raw,
    /// Status event.
    Status,
}

impl BroadcastKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Status => "status",
        }
    }
}

/// Outcome of a client command.
#[derive(Debug, Clone, Copy)]
pub enum CommandOutcome {
    /// Sent to an open upstream link.
    Forwarded,
    /// Upstream send failed; not retried.
    SendFailed,
    /// Held until the link opens.
    Queued,
    /// Invalid shape; never queued.
    Rejected,
    /// Sent from the queue after the link opened.
    Flushed,
    /// Dropped from the queue because the link failed mid-flush.
    Discarded,
}

impl CommandOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Forwarded => "forwarded",
            Self::SendFailed => "send_failed",
            Self::Queued => "queued",
            Self::Rejected => "rejected",
            Self::Flushed => "flushed",
            Self::Discarded => "discarded",
        }
    }
}

/// Record a frame received from upstream.
pub fn record_upstream_frame(bridge: &'static str, kind: &'static str) {
    counter!(
        "signal_relay_upstream_frames_total",
        "bridge" => bridge,
        "kind" => kind
    )
    .increment(1);
}

/// Record a completed fan-out.
pub fn record_broadcast(bridge: &'static str, kind: BroadcastKind, failures: u64, elapsed: Duration) {
    counter!(
        "signal_relay_frames_broadcast_total",
        "bridge" => bridge,
        "kind" => kind.as_str()
    )
    .increment(1);
    if failures > 0 {
        counter!(
            "signal_relay_client_send_failures_total",
            "bridge" => bridge
        )
        .increment(failures);
    }
    histogram!(
        "signal_relay_fanout_seconds",
        "bridge" => bridge
    )
    .record(elapsed.as_secs_f64());
}

/// Record an upstream payload that did not parse.
pub fn record_malformed_payload(bridge: &'static str) {
    counter!(
        "signal_relay_malformed_payloads_total",
        "bridge" => bridge
    )
    .increment(1);
}

/// Record command outcomes.
pub fn record_commands(bridge: &'static str, outcome: CommandOutcome, count: u64) {
    counter!(
        "signal_relay_commands_total",
        "bridge" => bridge,
        "outcome" => outcome.as_str()
    )
    .increment(count);
}

/// Update the command queue depth.
#[allow(clippy::cast_precision_loss)]
pub fn set_queue_depth(bridge: &'static str, depth: usize) {
    gauge!(
        "signal_relay_command_queue_depth",
        "bridge" => bridge
    )
    .set(depth as f64);
}

/// Update the upstream connected flag.
pub fn set_upstream_connected(bridge: &'static str, connected: bool) {
    gauge!(
        "signal_relay_upstream_connected",
        "bridge" => bridge
    )
    .set(if connected { 1.0 } else { 0.0 });
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect(bridge: &'static str) {
    counter!(
        "signal_relay_reconnects_total",
        "bridge" => bridge
    )
    .increment(1);
}

/// Record that a bounded bridge stopped retrying.
pub fn record_reconnect_exhausted(bridge: &'static str) {
    counter!(
        "signal_relay_reconnects_exhausted_total",
        "bridge" => bridge
    )
    .increment(1);
}

/// Update the connected client count.
#[allow(clippy::cast_precision_loss)]
pub fn set_clients(bridge: &'static str, count: usize) {
    gauge!(
        "signal_relay_clients",
        "bridge" => bridge
    )
    .set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
