//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the ports defined in the application layer,
//! plus the runtime that wires them into one running bridge.

/// Environment-driven configuration.
pub mod config;

/// Observer WebSocket server.
pub mod downstream;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Per-bridge relay actor and task wiring.
pub mod runtime;

/// Logging and OpenTelemetry tracing setup.
pub mod telemetry;

/// Upstream WebSocket client and reconnect timer.
pub mod upstream;
