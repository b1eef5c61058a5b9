//! Relay Runtime
//!
//! Runs one bridge: an actor task that owns the [`RelayController`] and
//! consumes [`RelayEvent`]s one at a time, plus the observer server that
//! feeds it. Everything else talks to the actor through a [`RelayHandle`]:
//! events go in over an unbounded channel, stats come out over a `watch`.
//!
//! ```text
//!  WsUpstream ─────┐
//!  reconnect timer ┼──► RelayEvent channel ──► actor (RelayController)
//!  observers ──────┤                                 │
//!  /api reconnect ─┘                         watch<RelayStats> ──► /health, /status
//! ```

use std::net::SocketAddr;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::RelayEvent;
use crate::application::services::{ReconnectPolicy, RelayController, RelayStats};
use crate::infrastructure::config::BridgeSettings;
use crate::infrastructure::downstream::{DownstreamServer, DownstreamServerError};
use crate::infrastructure::upstream::{TokioReconnectTimer, WsUpstream};

type WsRelay = RelayController<WsUpstream, TokioReconnectTimer>;

// =============================================================================
// Handle
// =============================================================================

/// Cloneable access to a running relay.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    name: &'static str,
    required: bool,
    events: mpsc::UnboundedSender<RelayEvent>,
    stats: watch::Receiver<RelayStats>,
}

impl RelayHandle {
    /// Bridge name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether overall health depends on this bridge.
    #[must_use]
    pub const fn required(&self) -> bool {
        self.required
    }

    /// Latest published stats.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        self.stats.borrow().clone()
    }

    /// Receiver for stats updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RelayStats> {
        self.stats.clone()
    }

    /// Sender into the relay's event loop.
    #[must_use]
    pub fn events(&self) -> mpsc::UnboundedSender<RelayEvent> {
        self.events.clone()
    }

    /// Ask the relay to reconnect now. Returns `false` if it has stopped.
    pub fn request_reconnect(&self) -> bool {
        self.events.send(RelayEvent::ReconnectRequested).is_ok()
    }
}

// =============================================================================
// Actor
// =============================================================================

/// The relay actor for one bridge.
pub struct RelayRuntime {
    controller: WsRelay,
    events: mpsc::UnboundedReceiver<RelayEvent>,
    stats: watch::Sender<RelayStats>,
}

impl RelayRuntime {
    /// Build the actor and its handle. Nothing runs until [`Self::run`].
    #[must_use]
    pub fn new(settings: &BridgeSettings) -> (Self, RelayHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let upstream = WsUpstream::new(settings.name, settings.upstream_url.clone(), events_tx.clone());
        let timer = TokioReconnectTimer::new(events_tx.clone());
        let controller = RelayController::new(
            settings.name,
            ReconnectPolicy::new(settings.reconnect),
            upstream,
            timer,
        );

        let (stats_tx, stats_rx) = watch::channel(controller.stats());

        let handle = RelayHandle {
            name: settings.name,
            required: settings.required,
            events: events_tx,
            stats: stats_rx,
        };
        let runtime = Self {
            controller,
            events: events_rx,
            stats: stats_tx,
        };
        (runtime, handle)
    }

    /// Connect and process events until cancelled, then shut the relay
    /// down.
    pub async fn run(mut self, cancel: CancellationToken) {
        let bridge = self.controller.bridge();
        tracing::info!(bridge, "Relay started");

        self.controller.connect();
        self.publish();

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    tracing::trace!(bridge, ?event, "Relay event");
                    self.controller.handle(event);
                    self.publish();
                }
            }
        }

        self.controller.shutdown();
        self.publish();
    }

    /// Publish only when something changed, so watchers are not woken for
    /// every relayed frame.
    fn publish(&self) {
        let next = self.controller.stats();
        self.stats.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

// =============================================================================
// Bridge
// =============================================================================

/// A started bridge: relay actor plus observer server.
#[derive(Debug)]
pub struct Bridge {
    /// Handle to the relay.
    pub handle: RelayHandle,
    /// Observer server address.
    pub local_addr: SocketAddr,
    /// Relay actor task.
    pub relay_task: JoinHandle<()>,
    /// Observer server task.
    pub server_task: JoinHandle<()>,
}

impl Bridge {
    /// Bind the observer port and spawn both tasks.
    ///
    /// # Errors
    ///
    /// Returns `DownstreamServerError::BindFailed` if the port is taken.
    pub async fn start(
        settings: &BridgeSettings,
        cancel: &CancellationToken,
    ) -> Result<Self, DownstreamServerError> {
        let server =
            DownstreamServer::bind(settings.name, settings.listen_port, settings.client_buffer).await?;
        let local_addr = server.local_addr();
        let (runtime, handle) = RelayRuntime::new(settings);

        tracing::info!(
            bridge = settings.name,
            upstream = %settings.upstream_url,
            listen = %local_addr,
            required = settings.required,
            max_reconnect_attempts = settings.reconnect.max_attempts,
            "Starting bridge"
        );

        let relay_task = tokio::spawn(runtime.run(cancel.clone()));

        let name = settings.name;
        let events = handle.events();
        let server_cancel = cancel.clone();
        let server_task = tokio::spawn(async move {
            if let Err(e) = server.run(events, server_cancel).await {
                tracing::error!(bridge = name, error = %e, "Observer server error");
            }
        });

        Ok(Self {
            handle,
            local_addr,
            relay_task,
            server_task,
        })
    }

    /// Wait for both tasks to finish.
    pub async fn join(self) {
        let bridge = self.handle.name();
        for (task, result) in [
            ("relay", self.relay_task.await),
            ("server", self.server_task.await),
        ] {
            if let Err(e) = result {
                tracing::error!(bridge, task, error = %e, "Bridge task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::application::services::ReconnectConfig;
    use crate::infrastructure::config::DEFAULT_CLIENT_BUFFER;
    use crate::application::services::testing::FakeClient;
    use crate::domain::link::LinkState;

    fn unreachable_bridge(max_attempts: u32) -> BridgeSettings {
        BridgeSettings {
            name: "test",
            required: true,
            upstream_url: "ws://127.0.0.1:1".to_string(),
            listen_port: 0,
            reconnect: ReconnectConfig::bounded(Duration::from_millis(10), max_attempts),
            client_buffer: DEFAULT_CLIENT_BUFFER,
        }
    }

    #[tokio::test]
    async fn bounded_bridge_gives_up_and_stays_down() {
        let (runtime, handle) = RelayRuntime::new(&unreachable_bridge(2));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(runtime.run(cancel.clone()));

        let mut stats = handle.subscribe();
        let exhausted = tokio::time::timeout(
            Duration::from_secs(5),
            stats.wait_for(|s| s.reconnect_exhausted),
        )
        .await
        .expect("bridge never gave up")
        .unwrap()
        .clone();

        assert_eq!(exhausted.reconnect_attempts, 2);
        assert!(!exhausted.upstream_open);
        assert_eq!(exhausted.link_state, LinkState::Failed.as_str());

        cancel.cancel();
        task.await.unwrap();
        assert!(!handle.request_reconnect());
    }

    #[test]
    fn watchers_are_woken_only_by_changes() {
        let (mut runtime, handle) = RelayRuntime::new(&unreachable_bridge(0));
        let mut stats = handle.subscribe();
        stats.borrow_and_update();

        runtime.publish();
        assert!(!stats.has_changed().unwrap());

        runtime.controller.register(FakeClient::open(1));
        runtime.publish();
        assert!(stats.has_changed().unwrap());
        assert_eq!(stats.borrow_and_update().clients, 1);
    }

    #[tokio::test]
    async fn shutdown_publishes_final_stats() {
        let (runtime, handle) = RelayRuntime::new(&unreachable_bridge(0));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(runtime.run(cancel.clone()));

        cancel.cancel();
        task.await.unwrap();

        let stats = handle.stats();
        assert_eq!(stats.link_state, "disconnected");
        assert!(!stats.reconnect_pending);
    }
}
