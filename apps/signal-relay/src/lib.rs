#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Signal Relay - Upstream-to-Observer WebSocket Bridge
//!
//! Holds one WebSocket connection to a signal-processing backend and fans
//! every frame it sends out to any number of observer clients. Observers
//! send commands back; the relay validates them, forwards them upstream,
//! and queues them while the backend is unreachable.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Relay state and message types
//!   - `frame`: Raw text/binary frames
//!   - `link`: Upstream link state machine
//!   - `command`: Client requests, commands, and the command queue
//!   - `snapshot`: Status events and the snapshot kept for late joiners
//!
//! - **Application**: Relay logic and port definitions
//!   - `ports`: Upstream, timer, and client sink interfaces
//!   - `services`: Relay controller, client registry, reconnect policy
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: WebSocket client and reconnect timer
//!   - `downstream`: Observer WebSocket server
//!   - `runtime`: One actor task per bridge
//!   - `config`: Configuration from environment
//!   - `health`: Health, status, and reconnect HTTP endpoints
//!
//! # Data Flow
//!
//! ```text
//!                  +-----------------+     +--------------+
//! Backend WS <---->|  Relay actor    |---->|  Observer    |---> Client 1
//!                  | (one per bridge)|<----|  WS server   |---> Client 2
//!                  +-----------------+     +--------------+---> Client N
//!                          |
//!                          v
//!                    stats (watch) ---> /health, /status, /metrics
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Relay types with no I/O.
pub mod domain;

/// Application layer - Relay logic and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::command::{Command, CommandName, CommandQueue, CommandRequest, CommandResponse};
pub use domain::frame::Frame;
pub use domain::link::{LinkFailure, LinkState, UpstreamLink};
pub use domain::snapshot::{ConnectionStatus, SnapshotStore, StatusEvent, Violation};

// Relay services
pub use application::services::{
    ReconnectConfig, ReconnectMode, ReconnectPolicy, RelayController, RelayStats,
};

// Infrastructure config
pub use infrastructure::config::{BridgeSettings, ConfigError, RelayConfig, ServerSettings};

// Runtime (for integration tests)
pub use infrastructure::runtime::{Bridge, RelayHandle, RelayRuntime};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
