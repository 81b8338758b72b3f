//! Presence and relay router for Rendezvous.
//!
//! The router owns the identity registry and the outbound queue of every
//! live connection. Each registry mutation and the presence broadcast it
//! triggers happen under one lock, so clients always observe presence sets
//! in mutation order.

use crate::connection::{ConnectionId, Inbox, Outbound};
use crate::message::{ForwardOutcome, Inbound, Signal};
use crate::presence::{Presence, Registration};
use dashmap::DashMap;
use rendezvous_protocol::{ClientEvent, ServerEvent, SignalKind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Router configuration.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// Drop signals whose `from` differs from the sender's registered identity.
    pub enforce_sender_identity: bool,
}

/// What the router did with an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The connection registered an identity.
    Registered(Registration),
    /// A signal was forwarded (or dropped).
    Forwarded(SignalKind, ForwardOutcome),
}

/// The central presence and relay router.
pub struct Router {
    /// Outbound queues of live connections.
    connections: DashMap<ConnectionId, Outbound>,
    /// Identity registry. Held while broadcasting presence.
    presence: Mutex<Presence>,
    /// Configuration.
    config: RouterConfig,
}

impl Router {
    /// Create a new router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a new router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!("Creating router with config: {:?}", config);
        Self {
            connections: DashMap::new(),
            presence: Mutex::new(Presence::new()),
            config,
        }
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            connection_count: self.connections.len(),
            registered_count: self.lock_presence().count(),
        }
    }

    /// Track a new connection and return its outbound queue.
    ///
    /// Nothing is broadcast until the connection registers.
    pub fn connect(&self, connection_id: &ConnectionId) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(connection_id.clone(), tx);
        debug!(connection = %connection_id, "Connection tracked");
        rx
    }

    /// Register `identity` for a connection and broadcast presence.
    pub fn register(&self, connection_id: &ConnectionId, identity: &str) -> Registration {
        let mut presence = self.lock_presence();
        let change = presence.register(connection_id, identity);

        info!(
            connection = %connection_id,
            identity = %identity,
            displaced = ?change.displaced,
            "Registered"
        );

        self.broadcast_presence(&presence);
        change
    }

    /// Forward a signal to the connection registered for its recipient.
    ///
    /// Undeliverable signals are dropped silently.
    pub fn forward(&self, connection_id: &ConnectionId, signal: Signal) -> ForwardOutcome {
        let target = {
            let presence = self.lock_presence();

            if self.config.enforce_sender_identity
                && !presence.holds(connection_id, &signal.from)
            {
                debug!(
                    connection = %connection_id,
                    from = %signal.from,
                    "Dropping signal with unverified sender"
                );
                return ForwardOutcome::SenderMismatch;
            }

            match presence.lookup(&signal.to) {
                Some(target) => target.clone(),
                None => {
                    debug!(
                        kind = signal.kind.inbound_event(),
                        from = %signal.from,
                        to = %signal.to,
                        "Recipient not registered, dropping"
                    );
                    return ForwardOutcome::UnknownRecipient;
                }
            }
        };

        let kind = signal.kind;
        let (from, to) = (signal.from.clone(), signal.to.clone());
        let delivered = self
            .connections
            .get(&target)
            .map(|tx| tx.send(Arc::new(signal.into_delivery())).is_ok())
            .unwrap_or(false);

        if delivered {
            debug!(kind = kind.inbound_event(), from = %from, to = %to, "Forwarded");
            ForwardOutcome::Delivered
        } else {
            debug!(kind = kind.inbound_event(), to = %to, "Recipient connection gone");
            ForwardOutcome::RecipientGone
        }
    }

    /// Route an inbound event from a connection.
    pub fn dispatch(&self, connection_id: &ConnectionId, event: ClientEvent) -> Dispatch {
        match Inbound::from(event) {
            Inbound::Register(identity) => {
                Dispatch::Registered(self.register(connection_id, &identity))
            }
            Inbound::Signal(signal) => {
                let kind = signal.kind;
                Dispatch::Forwarded(kind, self.forward(connection_id, signal))
            }
        }
    }

    /// Drop a connection and release every identity it owns.
    ///
    /// Presence is broadcast to the remaining connections only if an
    /// identity was actually removed. Returns the removed identities.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> Vec<String> {
        self.connections.remove(connection_id);

        let mut presence = self.lock_presence();
        let removed = presence.remove_connection(connection_id);

        if removed.is_empty() {
            debug!(connection = %connection_id, "Disconnected without registration");
        } else {
            info!(connection = %connection_id, identities = ?removed, "Unregistered on disconnect");
            self.broadcast_presence(&presence);
        }

        removed
    }

    /// Current presence set, sorted.
    #[must_use]
    pub fn presence(&self) -> Vec<String> {
        self.lock_presence().identities()
    }

    /// Resolve an identity to its connection.
    #[must_use]
    pub fn lookup(&self, identity: &str) -> Option<ConnectionId> {
        self.lock_presence().lookup(identity).cloned()
    }

    /// Get the identities owned by a connection, oldest first.
    #[must_use]
    pub fn identities_of(&self, connection_id: &ConnectionId) -> Vec<String> {
        self.lock_presence().identities_of(connection_id).to_vec()
    }

    /// Check if a connection is tracked.
    #[must_use]
    pub fn is_connected(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Send the presence set to every live connection.
    ///
    /// Callers hold the presence lock; sends never block.
    fn broadcast_presence(&self, presence: &Presence) -> usize {
        let event = Arc::new(ServerEvent::Users(presence.identities()));
        let count = self
            .connections
            .iter()
            .filter(|entry| entry.value().send(Arc::clone(&event)).is_ok())
            .count();
        trace!(recipients = count, members = presence.count(), "Broadcast presence");
        count
    }

    // Every mutation leaves both indices consistent, so a poisoned lock is safe to reuse.
    fn lock_presence(&self) -> MutexGuard<'_, Presence> {
        self.presence.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Router statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    /// Number of live connections.
    pub connection_count: usize,
    /// Number of registered identities.
    pub registered_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn drain(rx: &mut Inbox) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push((*event).clone());
        }
        events
    }

    fn users(names: &[&str]) -> ServerEvent {
        ServerEvent::Users(names.iter().map(|n| n.to_string()).collect())
    }

    #[test]
    fn test_router_call_scenario() {
        let router = Router::new();
        let a = ConnectionId::from("conn-a");
        let b = ConnectionId::from("conn-b");
        let mut rx_a = router.connect(&a);
        let mut rx_b = router.connect(&b);

        router.register(&a, "alice");
        router.register(&b, "bob");

        assert_eq!(drain(&mut rx_a), vec![users(&["alice"]), users(&["alice", "bob"])]);
        assert_eq!(drain(&mut rx_b), vec![users(&["alice"]), users(&["alice", "bob"])]);

        let offer = json!({"type": "offer", "sdp": "v=0"});
        let outcome = router.forward(&a, Signal::new(SignalKind::Offer, "alice", "bob", offer.clone()));
        assert_eq!(outcome, ForwardOutcome::Delivered);
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::CallOffer {
                from: "alice".into(),
                offer
            }]
        );
        assert!(drain(&mut rx_a).is_empty());

        assert_eq!(router.disconnect(&b), vec!["bob"]);
        assert_eq!(drain(&mut rx_a), vec![users(&["alice"])]);
    }

    #[test]
    fn test_router_forward_unknown_recipient() {
        let router = Router::new();
        let a = ConnectionId::from("conn-a");
        let b = ConnectionId::from("conn-b");
        let mut rx_a = router.connect(&a);
        let mut rx_b = router.connect(&b);
        router.register(&a, "alice");
        router.register(&b, "bob");
        drain(&mut rx_a);
        drain(&mut rx_b);

        let outcome = router.forward(&a, Signal::new(SignalKind::Offer, "alice", "carol", json!("x")));

        assert_eq!(outcome, ForwardOutcome::UnknownRecipient);
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_router_forward_each_kind() {
        let router = Router::new();
        let a = ConnectionId::from("conn-a");
        let b = ConnectionId::from("conn-b");
        let _rx_a = router.connect(&a);
        let mut rx_b = router.connect(&b);
        router.register(&b, "bob");
        drain(&mut rx_b);

        for event in [
            ClientEvent::answer("alice", "bob", json!({"sdp": "a"})),
            ClientEvent::candidate("alice", "bob", json!({"candidate": "c", "sdpMLineIndex": 0})),
            ClientEvent::end_call("alice", "bob"),
        ] {
            let Inbound::Signal(signal) = Inbound::from(event.clone()) else {
                panic!("expected a relayed event");
            };
            assert_eq!(
                router.dispatch(&a, event),
                Dispatch::Forwarded(signal.kind, ForwardOutcome::Delivered)
            );
        }

        assert_eq!(
            drain(&mut rx_b),
            vec![
                ServerEvent::CallAnswer {
                    from: "alice".into(),
                    answer: json!({"sdp": "a"})
                },
                ServerEvent::IceCandidate {
                    from: "alice".into(),
                    candidate: json!({"candidate": "c", "sdpMLineIndex": 0})
                },
                ServerEvent::CallEnded {
                    from: "alice".into()
                },
            ]
        );
    }

    #[test]
    fn test_router_register_twice_same_connection() {
        let router = Router::new();
        let a = ConnectionId::from("conn-a");
        let mut rx_a = router.connect(&a);

        router.register(&a, "alice");
        router.register(&a, "alice");

        assert_eq!(router.presence(), vec!["alice"]);
        assert_eq!(drain(&mut rx_a), vec![users(&["alice"]), users(&["alice"])]);
    }

    #[test]
    fn test_router_register_takeover() {
        let router = Router::new();
        let a = ConnectionId::from("conn-a");
        let b = ConnectionId::from("conn-b");
        let mut rx_a = router.connect(&a);
        let mut rx_b = router.connect(&b);

        router.register(&a, "alice");
        let change = router.register(&b, "alice");
        assert_eq!(change.displaced, Some(a.clone()));
        assert_eq!(router.lookup("alice"), Some(b.clone()));
        drain(&mut rx_a);
        drain(&mut rx_b);

        // Signals for alice now reach the newer connection only.
        router.forward(&a, Signal::new(SignalKind::EndCall, "x", "alice", json!(null)));
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);

        // The displaced connection leaving does not touch alice.
        assert!(router.disconnect(&a).is_empty());
        assert_eq!(router.presence(), vec!["alice"]);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_router_second_identity_stays_routable() {
        let router = Router::new();
        let a = ConnectionId::from("conn-a");
        let b = ConnectionId::from("conn-b");
        let mut rx_a = router.connect(&a);
        let mut rx_b = router.connect(&b);

        router.register(&a, "alice");
        router.register(&a, "alicia");
        assert_eq!(router.presence(), vec!["alice", "alicia"]);
        assert_eq!(drain(&mut rx_b), vec![users(&["alice"]), users(&["alice", "alicia"])]);
        drain(&mut rx_a);

        let offer = json!({"sdp": "v=0"});
        for identity in ["alice", "alicia"] {
            let outcome = router.forward(&b, Signal::new(SignalKind::Offer, "bob", identity, offer.clone()));
            assert_eq!(outcome, ForwardOutcome::Delivered);
        }
        assert_eq!(drain(&mut rx_a).len(), 2);

        // Leaving releases both names in one broadcast.
        assert_eq!(router.disconnect(&a), vec!["alice", "alicia"]);
        assert_eq!(drain(&mut rx_b), vec![users(&[])]);
    }

    #[test]
    fn test_router_disconnect_unregistered_is_silent() {
        let router = Router::new();
        let a = ConnectionId::from("conn-a");
        let b = ConnectionId::from("conn-b");
        let mut rx_a = router.connect(&a);
        let _rx_b = router.connect(&b);
        router.register(&a, "alice");
        drain(&mut rx_a);

        assert!(router.disconnect(&b).is_empty());
        assert!(router.disconnect(&b).is_empty());
        assert!(drain(&mut rx_a).is_empty());
        assert!(!router.is_connected(&b));
    }

    #[test]
    fn test_router_recipient_gone() {
        let router = Router::new();
        let a = ConnectionId::from("conn-a");
        let b = ConnectionId::from("conn-b");
        let _rx_a = router.connect(&a);
        let rx_b = router.connect(&b);
        router.register(&b, "bob");
        drop(rx_b);

        let outcome = router.forward(&a, Signal::new(SignalKind::Offer, "alice", "bob", json!({})));
        assert_eq!(outcome, ForwardOutcome::RecipientGone);
    }

    #[test]
    fn test_router_enforce_sender_identity() {
        let router = Router::with_config(RouterConfig {
            enforce_sender_identity: true,
        });
        let a = ConnectionId::from("conn-a");
        let b = ConnectionId::from("conn-b");
        let _rx_a = router.connect(&a);
        let mut rx_b = router.connect(&b);
        router.register(&a, "alice");
        router.register(&b, "bob");
        drain(&mut rx_b);

        let spoofed = router.forward(&a, Signal::new(SignalKind::Offer, "mallory", "bob", json!({})));
        assert_eq!(spoofed, ForwardOutcome::SenderMismatch);
        assert!(drain(&mut rx_b).is_empty());

        let genuine = router.forward(&a, Signal::new(SignalKind::Offer, "alice", "bob", json!({})));
        assert!(genuine.is_delivered());
    }

    #[test]
    fn test_router_trusts_sender_by_default() {
        let router = Router::new();
        let a = ConnectionId::from("conn-a");
        let b = ConnectionId::from("conn-b");
        let _rx_a = router.connect(&a);
        let mut rx_b = router.connect(&b);
        router.register(&b, "bob");
        drain(&mut rx_b);

        // Unregistered sender claiming any name still gets through.
        let outcome = router.forward(&a, Signal::new(SignalKind::EndCall, "mallory", "bob", json!(null)));
        assert!(outcome.is_delivered());
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::CallEnded {
                from: "mallory".into()
            }]
        );
    }

    #[test]
    fn test_router_stats() {
        let router = Router::new();
        let a = ConnectionId::from("conn-a");
        let b = ConnectionId::from("conn-b");
        let _rx_a = router.connect(&a);
        let _rx_b = router.connect(&b);
        router.register(&a, "alice");

        assert_eq!(
            router.stats(),
            RouterStats {
                connection_count: 2,
                registered_count: 1
            }
        );
        assert_eq!(router.identities_of(&a), vec!["alice"]);
        assert!(router.identities_of(&b).is_empty());
    }

    #[test]
    fn test_router_concurrent_registrations_converge() {
        let router = Arc::new(Router::new());
        let ids: Vec<ConnectionId> = (0..16).map(|i| ConnectionId::new(format!("conn-{i}"))).collect();
        let mut inboxes: Vec<Inbox> = ids.iter().map(|id| router.connect(id)).collect();

        let handles: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let router = Arc::clone(&router);
                let id = id.clone();
                std::thread::spawn(move || {
                    router.register(&id, &format!("user-{i}"));
                    if i % 4 == 0 {
                        router.disconnect(&id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let expected: BTreeSet<String> = (0..16)
            .filter(|i| i % 4 != 0)
            .map(|i| format!("user-{i}"))
            .collect();
        let final_set: BTreeSet<String> = router.presence().into_iter().collect();
        assert_eq!(final_set, expected);

        // Every remaining connection's last broadcast is the final set.
        for (i, rx) in inboxes.iter_mut().enumerate() {
            if i % 4 == 0 {
                continue;
            }
            match drain(rx).pop() {
                Some(ServerEvent::Users(list)) => {
                    assert_eq!(list.into_iter().collect::<BTreeSet<_>>(), expected);
                }
                other => panic!("expected users broadcast, got {:?}", other),
            }
        }
    }
}
