//! Client Registry & Fan-out
//!
//! Membership of downstream observers and delivery of one frame to all of
//! them. Members are added on connect and removed by their own close
//! handler; the fan-out loop only skips members that are no longer open
//! and never removes anyone itself. A failed send to one member is logged
//! and does not stop delivery to the rest.

use std::collections::BTreeMap;

use crate::application::ports::{ClientId, SharedClient, TransportError};
use crate::domain::frame::Frame;

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Members the frame was handed to.
    pub delivered: usize,
    /// Members skipped because they were not open.
    pub skipped: usize,
    /// Members whose send failed.
    pub failed: usize,
}

/// Set of connected clients, iterated in join order.
#[derive(Default)]
pub struct ClientRegistry {
    members: BTreeMap<ClientId, SharedClient>,
}

impl ClientRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client. Returns `false` if its id was already registered.
    pub fn register(&mut self, client: SharedClient) -> bool {
        self.members.insert(client.id(), client).is_none()
    }

    /// Remove a client. Removing an unknown id is not an error.
    pub fn unregister(&mut self, id: ClientId) -> Option<SharedClient> {
        self.members.remove(&id)
    }

    /// Number of members, open or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether there are no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, id: ClientId) -> bool {
        self.members.contains_key(&id)
    }

    /// Send to a single member.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::NotConnected` for an unknown id, or the
    /// member's own send error.
    pub fn send_to(&self, id: ClientId, frame: Frame) -> Result<(), TransportError> {
        let client = self.members.get(&id).ok_or(TransportError::NotConnected)?;
        client.send(frame)
    }

    /// Deliver `frame` to every open member.
    pub fn broadcast(&self, frame: &Frame) -> FanoutReport {
        let mut report = FanoutReport::default();

        for (id, client) in &self.members {
            if !client.is_open() {
                report.skipped += 1;
                continue;
            }
            match client.send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TransportError::Full) => {
                    report.failed += 1;
                    tracing::debug!(client_id = id, "Client not keeping up, frame dropped");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(client_id = id, error = %e, "Send to client failed");
                }
            }
        }

        report
    }

    /// Ask every member to close once its queued frames are written.
    pub fn close_all(&self) {
        for client in self.members.values() {
            client.close();
        }
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("members", &self.members.keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::application::ports::ClientSink;
    use crate::application::services::testing::FakeClient;

    #[test]
    fn register_and_unregister() {
        let mut registry = ClientRegistry::new();
        assert!(registry.register(FakeClient::open(1)));
        assert!(registry.register(FakeClient::open(2)));
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister(1).is_some());
        assert!(!registry.contains(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = ClientRegistry::new();
        registry.register(FakeClient::open(1));
        assert!(registry.unregister(1).is_some());
        assert!(registry.unregister(1).is_none());
        assert!(registry.unregister(99).is_none());
    }

    #[test]
    fn duplicate_id_is_reported() {
        let mut registry = ClientRegistry::new();
        assert!(registry.register(FakeClient::open(7)));
        assert!(!registry.register(FakeClient::open(7)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn broadcast_reaches_open_members_only() {
        let mut registry = ClientRegistry::new();
        let open_a = FakeClient::open(1);
        let closed = FakeClient::closed(2);
        let open_b = FakeClient::open(3);
        for client in [&open_a, &closed, &open_b] {
            registry.register(Arc::clone(client) as SharedClient);
        }

        let frame = Frame::text(r#"{"freqs":[1,2,3]}"#);
        let report = registry.broadcast(&frame);

        assert_eq!(
            report,
            FanoutReport {
                delivered: 2,
                skipped: 1,
                failed: 0
            }
        );
        assert_eq!(open_a.frames(), vec![frame.clone()]);
        assert_eq!(open_b.frames(), vec![frame]);
        assert!(closed.frames().is_empty());
        // Skipped members stay registered until their own close handler runs.
        assert!(registry.contains(2));
    }

    #[test]
    fn failing_member_does_not_abort_fanout() {
        let mut registry = ClientRegistry::new();
        let first = FakeClient::open(1);
        let broken = FakeClient::failing(2);
        let last = FakeClient::open(3);
        for client in [&first, &broken, &last] {
            registry.register(Arc::clone(client) as SharedClient);
        }

        let report = registry.broadcast(&Frame::text("x"));

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(first.frames().len(), 1);
        assert_eq!(last.frames().len(), 1);
    }

    #[test]
    fn stalled_member_drops_frames_while_others_keep_receiving() {
        let mut registry = ClientRegistry::new();
        let stalled = FakeClient::bounded(1, 2);
        let healthy = FakeClient::open(2);
        registry.register(Arc::clone(&stalled) as SharedClient);
        registry.register(Arc::clone(&healthy) as SharedClient);

        let reports: Vec<FanoutReport> = (0..5)
            .map(|i| registry.broadcast(&Frame::text(i.to_string())))
            .collect();

        assert_eq!(stalled.frames().len(), 2);
        assert_eq!(healthy.frames().len(), 5);
        assert_eq!(reports.iter().map(|r| r.failed).sum::<usize>(), 3);
        assert!(stalled.is_open());
    }

    #[test]
    fn send_to_unknown_client() {
        let registry = ClientRegistry::new();
        assert_eq!(
            registry.send_to(5, Frame::text("x")),
            Err(TransportError::NotConnected)
        );
    }

    #[test]
    fn close_all_closes_every_member() {
        let mut registry = ClientRegistry::new();
        let a = FakeClient::open(1);
        let b = FakeClient::open(2);
        registry.register(Arc::clone(&a) as SharedClient);
        registry.register(Arc::clone(&b) as SharedClient);

        registry.close_all();

        assert!(a.was_closed());
        assert!(b.was_closed());
    }
}
