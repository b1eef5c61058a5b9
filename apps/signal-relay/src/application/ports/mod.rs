//! Port Interfaces
//!
//! Seams between the relay core and the transports it drives. The core
//! never touches a socket or a timer directly; adapters in the
//! infrastructure layer implement these traits, and tests substitute
//! fakes.
//!
//! ## Driven Ports (Outbound)
//!
//! - `UpstreamPort`: the single connection to the upstream source
//! - `ClientSink`: one downstream observer connection
//! - `ReconnectTimer`: the single pending reconnect delay
//!
//! ## Driver Events (Inbound)
//!
//! - `RelayEvent`: everything adapters report back, handled one at a time

use std::sync::Arc;
use std::time::Duration;

use crate::domain::frame::Frame;
use crate::domain::link::{Generation, LinkFailure};

/// Transport-assigned identifier of a downstream client.
pub type ClientId = u64;

/// Identifies one arming of the reconnect timer.
pub type TimerTicket = u64;

/// A send that did not reach the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection is closed or closing.
    #[error("transport closed")]
    Closed,
    /// The client's outbound queue is full; the frame was dropped.
    #[error("send queue full")]
    Full,
    /// No connection is open.
    #[error("not connected")]
    NotConnected,
    /// The frame could not be encoded.
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encode(e.to_string())
    }
}

// =============================================================================
// Driven Ports
// =============================================================================

/// The connection to the upstream source.
///
/// `connect` is fire-and-forget: the outcome comes back as
/// [`UpstreamEvent`]s tagged with the same generation.
#[cfg_attr(test, mockall::automock)]
pub trait UpstreamPort: Send {
    /// Open a fresh connection, dropping any previous one.
    fn connect(&mut self, generation: Generation);

    /// Hand a frame to the open connection.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if no connection can accept the frame.
    fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the connection, if any. No event is reported for it.
    fn close(&mut self);
}

/// One downstream observer connection.
pub trait ClientSink: Send + Sync {
    /// Transport-assigned id.
    fn id(&self) -> ClientId;

    /// Whether the transport still accepts frames.
    fn is_open(&self) -> bool;

    /// Queue a frame for the client.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` if the client is going away, or
    /// `TransportError::Full` if it is not keeping up.
    fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Close after any frames already queued. Must not block, even when
    /// the queue is full.
    fn close(&self);
}

/// Shared handle to a client.
pub type SharedClient = Arc<dyn ClientSink>;

/// The reconnect delay. At most one arming is pending at a time.
#[cfg_attr(test, mockall::automock)]
pub trait ReconnectTimer: Send {
    /// Fire `ticket` after `delay`, replacing any pending arming.
    fn arm(&mut self, ticket: TimerTicket, delay: Duration);

    /// Drop the pending arming, if any.
    fn cancel(&mut self);
}

// =============================================================================
// Driver Events
// =============================================================================

/// What the upstream adapter reports.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// The connection opened.
    Opened {
        /// Connection generation.
        generation: Generation,
    },
    /// A frame arrived.
    Frame {
        /// Connection generation.
        generation: Generation,
        /// The frame, untouched.
        frame: Frame,
    },
    /// The connection ended. Reported exactly once per generation.
    Ended {
        /// Connection generation.
        generation: Generation,
        /// Why it ended.
        failure: LinkFailure,
    },
}

/// Everything the relay reacts to.
pub enum RelayEvent {
    /// Upstream connection activity.
    Upstream(UpstreamEvent),
    /// A client connected.
    ClientConnected(SharedClient),
    /// A client's connection ended.
    ClientDisconnected(ClientId),
    /// A client sent a frame.
    ClientFrame {
        /// Sender.
        client: ClientId,
        /// The frame as received.
        frame: Frame,
    },
    /// The reconnect timer fired.
    ReconnectDue(TimerTicket),
    /// An operator asked for an immediate reconnect.
    ReconnectRequested,
}

impl std::fmt::Debug for RelayEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upstream(event) => f.debug_tuple("Upstream").field(event).finish(),
            Self::ClientConnected(client) => {
                f.debug_tuple("ClientConnected").field(&client.id()).finish()
            }
            Self::ClientDisconnected(id) => f.debug_tuple("ClientDisconnected").field(id).finish(),
            Self::ClientFrame { client, frame } => f
                .debug_struct("ClientFrame")
                .field("client", client)
                .field("len", &frame.len())
                .finish(),
            Self::ReconnectDue(ticket) => f.debug_tuple("ReconnectDue").field(ticket).finish(),
            Self::ReconnectRequested => f.write_str("ReconnectRequested"),
        }
    }
}
