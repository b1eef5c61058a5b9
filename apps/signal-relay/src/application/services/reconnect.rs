//! Reconnection Policy
//!
//! Fixed-delay retry schedule for the upstream link. A policy is either
//! unbounded (always retries) or bounded by a maximum attempt count, after
//! which the relay stays down until an explicit reconnect is requested.
//!
//! The attempt counter itself lives on the upstream link so that a
//! successful open resets it in the same transition.

use std::time::Duration;

/// Default delay between attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before every attempt.
    pub delay: Duration,
    /// Maximum number of attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: 0, // Unlimited
        }
    }
}

impl ReconnectConfig {
    /// Unbounded retries every `delay`.
    #[must_use]
    pub const fn unbounded(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: 0,
        }
    }

    /// At most `max_attempts` retries every `delay`.
    #[must_use]
    pub const fn bounded(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }

    /// Which variant this is.
    #[must_use]
    pub const fn mode(&self) -> ReconnectMode {
        if self.max_attempts == 0 {
            ReconnectMode::Unbounded
        } else {
            ReconnectMode::Bounded
        }
    }
}

/// Whether retries ever stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectMode {
    /// Stops after the configured maximum.
    Bounded,
    /// Never stops.
    Unbounded,
}

/// Decides whether, and after how long, to retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    /// Policy configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Delay before the next attempt, given how many were already made.
    ///
    /// Returns `None` once the maximum has been reached.
    #[must_use]
    pub const fn next_delay(&self, attempts_so_far: u32) -> Option<Duration> {
        if self.should_retry(attempts_so_far) {
            Some(self.config.delay)
        } else {
            None
        }
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self, attempts_so_far: u32) -> bool {
        self.config.max_attempts == 0 || attempts_so_far < self.config.max_attempts
    }
}
