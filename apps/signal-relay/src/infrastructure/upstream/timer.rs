//! Reconnect Timer
//!
//! [`ReconnectTimer`] backed by a spawned `tokio::time::sleep`. Arming
//! aborts any pending sleep first, so at most one ticket is ever in flight.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::application::ports::{ReconnectTimer, RelayEvent, TimerTicket};

/// Delivers `ReconnectDue` to the relay's event channel.
#[derive(Debug)]
pub struct TokioReconnectTimer {
    events: mpsc::UnboundedSender<RelayEvent>,
    pending: Option<JoinHandle<()>>,
}

impl TokioReconnectTimer {
    /// Create an unarmed timer.
    #[must_use]
    pub const fn new(events: mpsc::UnboundedSender<RelayEvent>) -> Self {
        Self {
            events,
            pending: None,
        }
    }
}

impl ReconnectTimer for TokioReconnectTimer {
    fn arm(&mut self, ticket: TimerTicket, delay: Duration) {
        self.cancel();
        let events = self.events.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(RelayEvent::ReconnectDue(ticket));
        }));
    }

    fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

impl Drop for TokioReconnectTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TokioReconnectTimer::new(tx);
        timer.arm(3, Duration::from_millis(5000));

        tokio::time::sleep(Duration::from_millis(4999)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(matches!(rx.recv().await, Some(RelayEvent::ReconnectDue(3))));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_pending_ticket() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TokioReconnectTimer::new(tx);
        timer.arm(1, Duration::from_secs(5));
        timer.arm(2, Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(matches!(rx.recv().await, Some(RelayEvent::ReconnectDue(2))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TokioReconnectTimer::new(tx);
        timer.arm(1, Duration::from_secs(5));
        timer.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
