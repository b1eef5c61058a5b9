//! Relay Controller
//!
//! The relay aggregate: upstream link, client registry, command queue and
//! snapshot store, owned by one controller and mutated only through
//! [`RelayController::handle`]. The runtime feeds it one [`RelayEvent`] at
//! a time, so every handler runs to completion before the next starts and
//! none of the state needs locking.
//!
//! ```text
//! upstream ──Frame──► extract violations ──► snapshot
//!                 └─────────────────────────► fan-out ──► clients
//! clients ──command──► forward (connected) ──► upstream
//!                  └─► queue (otherwise) ──flush on open──┘
//! ```

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::application::ports::{
    ClientId, RelayEvent, ReconnectTimer, SharedClient, TimerTicket, TransportError, UpstreamEvent,
    UpstreamPort,
};
use crate::application::services::reconnect::{ReconnectMode, ReconnectPolicy};
use crate::application::services::registry::ClientRegistry;
use crate::domain::command::{ClientRequest, Command, CommandQueue, CommandRequest, CommandResponse};
use crate::domain::frame::Frame;
use crate::domain::link::{Generation, LinkFailure, LinkState, UpstreamLink};
use crate::domain::snapshot::{
    ConnectionStatus, SnapshotStore, StatusEvent, Violation, extract_violations,
};
use crate::infrastructure::metrics::{self, BroadcastKind, CommandOutcome};

// =============================================================================
// Stats
// =============================================================================

/// Read-only view of one relay, published after every event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    /// Bridge name.
    pub bridge: &'static str,
    /// Last status broadcast to clients.
    pub status: ConnectionStatus,
    /// Upstream link state.
    pub link_state: &'static str,
    /// Whether the upstream socket is open.
    pub upstream_open: bool,
    /// Registered clients.
    pub clients: usize,
    /// Commands waiting for the link.
    pub queue_depth: usize,
    /// Reconnect attempts since the last open.
    pub reconnect_attempts: u32,
    /// Bounded or unbounded retries.
    pub reconnect_mode: ReconnectMode,
    /// Whether a reconnect is armed.
    pub reconnect_pending: bool,
    /// Whether a bounded bridge gave up.
    pub reconnect_exhausted: bool,
    /// Latest non-empty violation batch.
    pub last_violations: Arc<[Violation]>,
}

// =============================================================================
// Controller
// =============================================================================

/// Owns all relay state for one bridge.
pub struct RelayController<U, T> {
    bridge: &'static str,
    link: UpstreamLink,
    registry: ClientRegistry,
    queue: CommandQueue,
    snapshot: SnapshotStore,
    policy: ReconnectPolicy,
    upstream: U,
    timer: T,
    pending_ticket: Option<TimerTicket>,
    next_ticket: TimerTicket,
    exhausted: bool,
}

impl<U: UpstreamPort, T: ReconnectTimer> RelayController<U, T> {
    /// Create a controller. Nothing connects until [`Self::connect`].
    #[must_use]
    pub fn new(bridge: &'static str, policy: ReconnectPolicy, upstream: U, timer: T) -> Self {
        Self {
            bridge,
            link: UpstreamLink::new(),
            registry: ClientRegistry::new(),
            queue: CommandQueue::new(),
            snapshot: SnapshotStore::new(),
            policy,
            upstream,
            timer,
            pending_ticket: None,
            next_ticket: 1,
            exhausted: false,
        }
    }

    /// Bridge name.
    #[must_use]
    pub const fn bridge(&self) -> &'static str {
        self.bridge
    }

    /// Upstream link state.
    #[must_use]
    pub const fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Commands waiting for the link.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Registered clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Last-known status and violations.
    #[must_use]
    pub const fn snapshot(&self) -> &SnapshotStore {
        &self.snapshot
    }

    /// Current stats.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            bridge: self.bridge,
            status: self.snapshot.status(),
            link_state: self.link.state().as_str(),
            upstream_open: self.link.is_open(),
            clients: self.registry.len(),
            queue_depth: self.queue.len(),
            reconnect_attempts: self.link.reconnect_attempts(),
            reconnect_mode: self.policy.config().mode(),
            reconnect_pending: self.pending_ticket.is_some(),
            reconnect_exhausted: self.exhausted,
            last_violations: self.snapshot.shared_violations(),
        }
    }

    /// Dispatch one event.
    pub fn handle(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Upstream(UpstreamEvent::Opened { generation }) => self.on_open(generation),
            RelayEvent::Upstream(UpstreamEvent::Frame { generation, frame }) => {
                self.on_frame(generation, &frame);
            }
            RelayEvent::Upstream(UpstreamEvent::Ended {
                generation,
                failure,
            }) => self.on_ended(generation, &failure),
            RelayEvent::ClientConnected(client) => self.register(client),
            RelayEvent::ClientDisconnected(id) => self.unregister(id),
            RelayEvent::ClientFrame { client, frame } => self.on_client_frame(client, &frame),
            RelayEvent::ReconnectDue(ticket) => self.on_reconnect_due(ticket),
            RelayEvent::ReconnectRequested => self.request_reconnect(),
        }
    }

    // =========================================================================
    // Upstream Connector
    // =========================================================================

    /// Start a connection attempt unless one is already in flight or open.
    pub fn connect(&mut self) {
        match self.link.begin_connect() {
            Ok(generation) => {
                tracing::info!(bridge = self.bridge, generation, "Connecting to upstream");
                self.upstream.connect(generation);
            }
            Err(e) => {
                tracing::debug!(bridge = self.bridge, reason = %e, "Connect ignored");
            }
        }
    }

    fn on_open(&mut self, generation: Generation) {
        if let Err(e) = self.link.opened(generation) {
            tracing::debug!(bridge = self.bridge, reason = %e, "Ignoring open event");
            return;
        }

        self.cancel_reconnect();
        self.exhausted = false;
        tracing::info!(bridge = self.bridge, generation, "Upstream connected");

        self.flush_queue();
        self.publish_status(ConnectionStatus::Connected);
    }

    fn on_frame(&mut self, generation: Generation, frame: &Frame) {
        if generation != self.link.generation() || !self.link.is_open() {
            tracing::trace!(bridge = self.bridge, generation, "Dropping frame from stale connection");
            return;
        }
        metrics::record_upstream_frame(self.bridge, frame.kind());

        match extract_violations(frame) {
            Ok(batch) => {
                let count = batch.len();
                if self.snapshot.record_violations(batch) {
                    tracing::debug!(bridge = self.bridge, count, "Retained violation batch");
                }
            }
            Err(e) => {
                metrics::record_malformed_payload(self.bridge);
                tracing::debug!(bridge = self.bridge, error = %e, "Forwarding unparsed payload");
            }
        }

        self.broadcast(frame, BroadcastKind::Raw);
    }

    fn on_ended(&mut self, generation: Generation, failure: &LinkFailure) {
        let state = match self.link.ended(generation, failure) {
            Ok(state) => state,
            Err(e) => {
                tracing::debug!(bridge = self.bridge, reason = %e, "Ignoring end event");
                return;
            }
        };

        if failure.is_error() {
            tracing::warn!(bridge = self.bridge, generation, error = %failure, "Upstream link failed");
        } else {
            tracing::info!(bridge = self.bridge, generation, reason = %failure, "Upstream link closed");
        }

        let status = if state == LinkState::Failed {
            ConnectionStatus::Error
        } else {
            ConnectionStatus::Disconnected
        };
        self.publish_status(status);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let attempts = self.link.reconnect_attempts();
        let Some(delay) = self.policy.next_delay(attempts) else {
            if !self.exhausted {
                self.exhausted = true;
                metrics::record_reconnect_exhausted(self.bridge);
                tracing::warn!(
                    bridge = self.bridge,
                    attempts,
                    "Reconnect attempts exhausted, waiting for an explicit reconnect"
                );
            }
            return;
        };

        let attempt = self.link.record_reconnect_attempt();
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.pending_ticket = Some(ticket);
        self.timer.arm(ticket, delay);

        metrics::record_reconnect(self.bridge);
        tracing::info!(
            bridge = self.bridge,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnect scheduled"
        );
    }

    fn on_reconnect_due(&mut self, ticket: TimerTicket) {
        if self.pending_ticket != Some(ticket) {
            tracing::trace!(bridge = self.bridge, ticket, "Ignoring superseded reconnect timer");
            return;
        }
        self.pending_ticket = None;
        self.connect();
    }

    /// Operator-triggered reconnect. Clears the attempt counter, so a
    /// bounded bridge that gave up starts retrying again.
    pub fn request_reconnect(&mut self) {
        tracing::info!(bridge = self.bridge, state = %self.link.state(), "Reconnect requested");
        self.link.reset_attempts();
        self.exhausted = false;
        self.cancel_reconnect();
        self.connect();
    }

    fn cancel_reconnect(&mut self) {
        if self.pending_ticket.take().is_some() {
            self.timer.cancel();
        }
    }

    // =========================================================================
    // Client Registry & Fan-out
    // =========================================================================

    /// Add a client and send it the current snapshot.
    pub fn register(&mut self, client: SharedClient) {
        let id = client.id();
        if !self.registry.register(client) {
            tracing::warn!(bridge = self.bridge, client_id = id, "Client id registered twice");
        }
        metrics::set_clients(self.bridge, self.registry.len());
        tracing::info!(
            bridge = self.bridge,
            client_id = id,
            clients = self.registry.len(),
            "Client connected"
        );

        self.send_snapshot(id);
    }

    /// Remove a client. Unknown ids are ignored.
    pub fn unregister(&mut self, id: ClientId) {
        if self.registry.unregister(id).is_some() {
            metrics::set_clients(self.bridge, self.registry.len());
            tracing::info!(
                bridge = self.bridge,
                client_id = id,
                clients = self.registry.len(),
                "Client disconnected"
            );
        }
    }

    fn send_snapshot(&self, id: ClientId) {
        let event = StatusEvent::snapshot(
            ConnectionStatus::from_link_state(self.link.state()),
            self.snapshot.shared_violations(),
        );
        self.reply(id, &event);
    }

    fn reply<M: Serialize>(&self, id: ClientId, message: &M) {
        let result = Frame::json(message)
            .map_err(TransportError::from)
            .and_then(|frame| self.registry.send_to(id, frame));
        if let Err(e) = result {
            tracing::warn!(bridge = self.bridge, client_id = id, error = %e, "Reply to client failed");
        }
    }

    fn publish_status(&mut self, status: ConnectionStatus) {
        self.snapshot.record_status(status);
        metrics::set_upstream_connected(self.bridge, self.link.is_open());

        match Frame::json(&StatusEvent::transition(status)) {
            Ok(frame) => self.broadcast(&frame, BroadcastKind::Status),
            Err(e) => tracing::error!(bridge = self.bridge, error = %e, "Failed to encode status"),
        }
    }

    fn broadcast(&self, frame: &Frame, kind: BroadcastKind) {
        let started = Instant::now();
        let report = self.registry.broadcast(frame);
        metrics::record_broadcast(
            self.bridge,
            kind,
            u64::try_from(report.failed).unwrap_or(u64::MAX),
            started.elapsed(),
        );
    }

    // =========================================================================
    // Command Queue & Forwarder
    // =========================================================================

    fn on_client_frame(&mut self, client: ClientId, frame: &Frame) {
        match ClientRequest::parse(frame) {
            Ok(ClientRequest::GetStatus) => self.send_snapshot(client),
            Ok(ClientRequest::Command(request)) => {
                self.submit(client, &request);
            }
            Err(e) => {
                tracing::warn!(bridge = self.bridge, client_id = client, error = %e, "Dropping client message");
            }
        }
    }

    /// Route a command request and acknowledge it to `origin`.
    ///
    /// Returns the acknowledged outcome: `true` only when the command was
    /// handed to an open upstream link. Queued commands are acknowledged
    /// `false` immediately and get no further reply once flushed.
    pub fn submit(&mut self, origin: ClientId, request: &CommandRequest) -> bool {
        let success = self.route(request);
        self.reply(origin, &CommandResponse::new(request, success));
        success
    }

    fn route(&mut self, request: &CommandRequest) -> bool {
        let command = match request.to_command() {
            Ok(command) => command,
            Err(e) => {
                metrics::record_commands(self.bridge, CommandOutcome::Rejected, 1);
                tracing::warn!(bridge = self.bridge, request_type = %request.request_type, error = %e, "Rejected command");
                return false;
            }
        };

        if !self.link.is_open() {
            self.queue.push(command);
            metrics::record_commands(self.bridge, CommandOutcome::Queued, 1);
            metrics::set_queue_depth(self.bridge, self.queue.len());
            tracing::info!(
                bridge = self.bridge,
                queue_depth = self.queue.len(),
                "Upstream not connected, command queued"
            );
            return false;
        }

        match self.forward(&command) {
            Ok(()) => {
                metrics::record_commands(self.bridge, CommandOutcome::Forwarded, 1);
                tracing::debug!(bridge = self.bridge, command = %command.name(), "Command forwarded");
                true
            }
            Err(e) => {
                metrics::record_commands(self.bridge, CommandOutcome::SendFailed, 1);
                tracing::warn!(bridge = self.bridge, command = %command.name(), error = %e, "Command send failed");
                false
            }
        }
    }

    fn forward(&mut self, command: &Command) -> Result<(), TransportError> {
        let frame = command.to_upstream_frame()?;
        self.upstream.send(frame)
    }

    /// Drain the queue in order. A failed send ends the flush and the rest
    /// of the batch is dropped.
    fn flush_queue(&mut self) {
        let pending = self.queue.drain();
        if pending.is_empty() {
            return;
        }
        let total = pending.len();
        let mut flushed = 0;

        for command in &pending {
            if let Err(e) = self.forward(command) {
                tracing::warn!(
                    bridge = self.bridge,
                    command = %command.name(),
                    discarded = total - flushed,
                    error = %e,
                    "Flush interrupted, discarding remaining commands"
                );
                break;
            }
            flushed += 1;
        }

        metrics::record_commands(self.bridge, CommandOutcome::Flushed, flushed as u64);
        if flushed < total {
            metrics::record_commands(self.bridge, CommandOutcome::Discarded, (total - flushed) as u64);
        }
        metrics::set_queue_depth(self.bridge, 0);
        tracing::info!(bridge = self.bridge, flushed, total, "Flushed queued commands");
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Cancel the reconnect timer, close the upstream link and ask every
    /// client to close after its pending frames.
    pub fn shutdown(&mut self) {
        self.cancel_reconnect();
        if self.link.state().is_live() {
            self.upstream.close();
        }
        self.link.close();

        let dropped = self.queue.clear();
        if dropped > 0 {
            metrics::record_commands(self.bridge, CommandOutcome::Discarded, dropped as u64);
            tracing::info!(bridge = self.bridge, dropped, "Discarded queued commands on shutdown");
        }

        self.registry.close_all();
        metrics::set_upstream_connected(self.bridge, false);
        tracing::info!(bridge = self.bridge, clients = self.registry.len(), "Relay stopped");
    }
}

impl<U, T> std::fmt::Debug for RelayController<U, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayController")
            .field("bridge", &self.bridge)
            .field("link", &self.link)
            .field("registry", &self.registry)
            .field("queue", &self.queue.len())
            .field("pending_ticket", &self.pending_ticket)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
