//! Upstream Link State Machine
//!
//! Tracks the lifecycle of the single connection to the upstream signal
//! source. Each connection attempt gets a fresh generation number; events
//! tagged with an older generation belong to a superseded connection and
//! are rejected, so at most one link is ever live.
//!
//! ```text
//!                 begin_connect()            opened()
//! Disconnected ─────────────────► Connecting ─────────► Connected
//!      ▲  ▲                           │                     │
//!      │  └──────── closed() ─────────┴──────── closed() ───┘
//!      │
//!      └── begin_connect() ── Failed ◄── failed() ── (Connecting | Connected)
//! ```

use std::fmt;

// =============================================================================
// Types
// =============================================================================

/// Identifier of one upstream connection attempt.
pub type Generation = u64;

/// Connection state of the upstream link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No connection and none in flight.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The socket is open.
    Connected,
    /// The last connection errored.
    Failed,
}

impl LinkState {
    /// Whether a connection is open or being opened.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }

    /// Lowercase name for logs and status reporting.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an upstream connection ended.
///
/// All three variants take the same reconnect path; none is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFailure {
    /// The socket never opened.
    ConnectFailure(String),
    /// The socket opened, then errored.
    TransportError(String),
    /// The peer closed the socket, gracefully or not.
    RemoteClose {
        /// Close code, when the peer sent one.
        code: Option<u16>,
        /// Close reason, possibly empty.
        reason: String,
    },
}

impl LinkFailure {
    /// Whether this failure counts as an error rather than a plain close.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        !matches!(self, Self::RemoteClose { .. })
    }
}

impl fmt::Display for LinkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailure(e) => write!(f, "connect failed: {e}"),
            Self::TransportError(e) => write!(f, "transport error: {e}"),
            Self::RemoteClose { code: Some(code), reason } => {
                write!(f, "closed by peer ({code}): {reason}")
            }
            Self::RemoteClose { code: None, reason } => write!(f, "closed by peer: {reason}"),
        }
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// The event belongs to a connection that is no longer current.
    #[error("stale generation {got} (current {current})")]
    StaleGeneration {
        /// Generation carried by the event.
        got: Generation,
        /// Generation of the current connection.
        current: Generation,
    },
    /// The transition is not allowed from the current state.
    #[error("cannot {action} while {from}")]
    InvalidTransition {
        /// State the link was in.
        from: LinkState,
        /// Attempted transition.
        action: &'static str,
    },
}

// =============================================================================
// Upstream Link
// =============================================================================

/// The singleton upstream link.
#[derive(Debug, Default)]
pub struct UpstreamLink {
    state: LinkState,
    generation: Generation,
    reconnect_attempts: u32,
}

impl UpstreamLink {
    /// Create a disconnected link.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Generation of the most recent connection attempt.
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// Reconnect attempts since the last successful open.
    #[must_use]
    pub const fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Whether the socket is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, LinkState::Connected)
    }

    /// Start a new connection attempt.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if a connection is already live.
    pub fn begin_connect(&mut self) -> Result<Generation, TransitionError> {
        if self.state.is_live() {
            return Err(TransitionError::InvalidTransition {
                from: self.state,
                action: "connect",
            });
        }
        self.generation += 1;
        self.state = LinkState::Connecting;
        Ok(self.generation)
    }

    /// The connection for `generation` opened. Resets the attempt counter.
    ///
    /// # Errors
    ///
    /// Returns `StaleGeneration` for superseded connections and
    /// `InvalidTransition` unless the link is connecting.
    pub fn opened(&mut self, generation: Generation) -> Result<(), TransitionError> {
        self.check_generation(generation)?;
        if self.state != LinkState::Connecting {
            return Err(TransitionError::InvalidTransition {
                from: self.state,
                action: "open",
            });
        }
        self.state = LinkState::Connected;
        self.reconnect_attempts = 0;
        Ok(())
    }

    /// The connection for `generation` ended with `failure`.
    ///
    /// Moves to `Failed` for errors and `Disconnected` for remote closes.
    ///
    /// # Errors
    ///
    /// Returns `StaleGeneration` for superseded connections and
    /// `InvalidTransition` if the link was not live.
    pub fn ended(
        &mut self,
        generation: Generation,
        failure: &LinkFailure,
    ) -> Result<LinkState, TransitionError> {
        self.check_generation(generation)?;
        if !self.state.is_live() {
            return Err(TransitionError::InvalidTransition {
                from: self.state,
                action: "end",
            });
        }
        self.state = if failure.is_error() {
            LinkState::Failed
        } else {
            LinkState::Disconnected
        };
        Ok(self.state)
    }

    /// Close locally, e.g. on shutdown. Pending events of the current
    /// generation become stale.
    pub const fn close(&mut self) {
        self.state = LinkState::Disconnected;
        self.generation += 1;
    }

    /// Count one more reconnect attempt and return the new total.
    pub const fn record_reconnect_attempt(&mut self) -> u32 {
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        self.reconnect_attempts
    }

    /// Forget previous attempts, for an explicit operator reconnect.
    pub const fn reset_attempts(&mut self) {
        self.reconnect_attempts = 0;
    }

    const fn check_generation(&self, generation: Generation) -> Result<(), TransitionError> {
        if generation == self.generation {
            Ok(())
        } else {
            Err(TransitionError::StaleGeneration {
                got: generation,
                current: self.generation,
            })
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
