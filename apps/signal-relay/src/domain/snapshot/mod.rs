//! Status & Snapshot Store
//!
//! Last-known relay state kept so that late-joining clients can be brought
//! up to date immediately: the most recent connection status and the most
//! recent non-empty batch of violations seen upstream.
//!
//! Violation extraction is best effort. Upstream payloads are forwarded
//! unmodified whether or not they parse; extraction only feeds this store.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::frame::Frame;
use super::link::LinkState;

// =============================================================================
// Status
// =============================================================================

/// Connection status as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Upstream link is open.
    Connected,
    /// Upstream link is closed.
    #[default]
    Disconnected,
    /// Upstream link errored.
    Error,
}

impl ConnectionStatus {
    /// Collapse a link state to what a joining client is told.
    #[must_use]
    pub const fn from_link_state(state: LinkState) -> Self {
        match state {
            LinkState::Connected => Self::Connected,
            LinkState::Disconnected | LinkState::Connecting | LinkState::Failed => {
                Self::Disconnected
            }
        }
    }
}

/// One frequency flagged by the upstream detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Center frequency in MHz.
    #[serde(rename = "frequencyMHz")]
    pub frequency_mhz: f64,
    /// Normalized power, nominally 0..1.
    pub power: f64,
}

/// Status event sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    #[serde(rename = "type")]
    kind: &'static str,
    /// Connection status.
    pub status: ConnectionStatus,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Retained violations; only present in snapshots.
    #[serde(rename = "lastViolations", skip_serializing_if = "Option::is_none")]
    pub last_violations: Option<Arc<[Violation]>>,
}

impl StatusEvent {
    /// A transition event, stamped now.
    #[must_use]
    pub fn transition(status: ConnectionStatus) -> Self {
        Self {
            kind: "status",
            status,
            timestamp: Utc::now().timestamp_millis(),
            last_violations: None,
        }
    }

    /// A snapshot for a joining or asking client, stamped now.
    #[must_use]
    pub fn snapshot(status: ConnectionStatus, last_violations: impl Into<Arc<[Violation]>>) -> Self {
        Self {
            last_violations: Some(last_violations.into()),
            ..Self::transition(status)
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// Process-wide last-known state.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    status: ConnectionStatus,
    last_violations: Arc<[Violation]>,
}

impl SnapshotStore {
    /// Empty store: disconnected, no violations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest status.
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Latest non-empty violation batch.
    #[must_use]
    pub fn last_violations(&self) -> &[Violation] {
        &self.last_violations
    }

    /// Shared handle to the latest batch.
    #[must_use]
    pub fn shared_violations(&self) -> Arc<[Violation]> {
        Arc::clone(&self.last_violations)
    }

    /// Record a status transition.
    pub const fn record_status(&mut self, status: ConnectionStatus) {
        self.status = status;
    }

    /// Replace the retained batch if `batch` is non-empty.
    ///
    /// Returns whether the store changed. Batches are never merged.
    pub fn record_violations(&mut self, batch: Vec<Violation>) -> bool {
        if batch.is_empty() {
            return false;
        }
        self.last_violations = batch.into();
        true
    }
}

// =============================================================================
// Extraction
// =============================================================================

/// Upstream payload that is not JSON.
#[derive(Debug, thiserror::Error)]
#[error("payload is not JSON: {0}")]
pub struct PayloadError(#[from] serde_json::Error);

/// Pull violations out of an upstream frame.
///
/// Entries lacking a numeric `frequency_mhz` or `power` are skipped. A JSON
/// payload without a `violations` array yields an empty batch.
///
/// # Errors
///
/// Returns `PayloadError` if the frame does not hold JSON.
pub fn extract_violations(frame: &Frame) -> Result<Vec<Violation>, PayloadError> {
    let payload: Value = serde_json::from_slice(frame.as_bytes())?;

    let Some(entries) = payload.get("violations").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    Ok(entries
        .iter()
        .filter_map(|entry| {
            Some(Violation {
                frequency_mhz: entry.get("frequency_mhz")?.as_f64()?,
                power: entry.get("power")?.as_f64()?,
            })
        })
        .collect())
}

// =============================================================================
// Tests
// =============================================================================
