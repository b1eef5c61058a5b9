//! Signal Relay Binary
//!
//! Starts every configured bridge and the health server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin signal-relay
//! ```
//!
//! # Environment Variables
//!
//! - `RELAY_UPSTREAM_URL`: Signal detector socket (default: `ws://localhost:8765`)
//! - `RELAY_LISTEN_PORT`: Observer port for the primary bridge (default: 8080)
//! - `RELAY_MAX_RECONNECT_ATTEMPTS`: 0 retries forever (default: 0)
//! - `WEBSDR_BRIDGE_ENABLED`: Run the secondary bridge (default: true)
//! - `WEBSDR_UPSTREAM_URL`: Secondary upstream (default: `ws://localhost:8766`)
//! - `WEBSDR_LISTEN_PORT`: Observer port for the secondary bridge (default: 8081)
//! - `WEBSDR_MAX_RECONNECT_ATTEMPTS`: (default: 10)
//! - `RELAY_RECONNECT_DELAY_MS`: Delay between reconnects (default: 5000)
//! - `RELAY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `RELAY_CLIENT_BUFFER`: Frames queued per observer before drops (default: 1024)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: signal-relay)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use signal_relay::infrastructure::health::{HealthServer, HealthServerState};
use signal_relay::infrastructure::runtime::Bridge;
use signal_relay::infrastructure::telemetry;
use signal_relay::{RelayConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
#[allow(clippy::expect_used)]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Signal Relay");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed; /metrics disabled");
    }

    let config = RelayConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let mut bridges = Vec::with_capacity(config.bridges.len());
    for settings in &config.bridges {
        let bridge = Bridge::start(settings, &shutdown_token)
            .await
            .with_context(|| format!("starting bridge {}", settings.name))?;
        bridges.push(bridge);
    }

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        bridges.iter().map(|bridge| bridge.handle.clone()).collect(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!(bridges = bridges.len(), "Signal relay ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        for bridge in bridges {
            bridge.join().await;
        }
        let _ = health_task.await;
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out; exiting with sessions still open"
        );
    }

    tracing::info!("Signal relay stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        bridges = config.bridges.len(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    for bridge in &config.bridges {
        tracing::debug!(
            bridge = bridge.name,
            required = bridge.required,
            upstream_url = %bridge.upstream_url,
            listen_port = bridge.listen_port,
            reconnect_delay_ms = u64::try_from(bridge.reconnect.delay.as_millis()).unwrap_or(u64::MAX),
            max_reconnect_attempts = bridge.reconnect.max_attempts,
            client_buffer = bridge.client_buffer,
            "Bridge configured"
        );
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
