//! Presence tracking for Rendezvous.
//!
//! Presence maps participant identities to the connection that registered
//! them. Both directions are indexed so that a disconnect finds its
//! identities without scanning. An identity belongs to at most one
//! connection; a connection may hold several identities if it registers
//! more than once under different names.

use crate::connection::ConnectionId;
use std::collections::HashMap;
use tracing::debug;

/// What changed when an identity was registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    /// Connection that previously owned the identity, if it was another one.
    pub displaced: Option<ConnectionId>,
}

/// Identity registry.
#[derive(Debug, Default)]
pub struct Presence {
    /// Identity to owning connection.
    by_identity: HashMap<String, ConnectionId>,
    /// Connection to the identities it owns, in registration order.
    by_connection: HashMap<ConnectionId, Vec<String>>,
}

impl Presence {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of registered identities.
    #[must_use]
    pub fn count(&self) -> usize {
        self.by_identity.len()
    }

    /// Check if presence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }

    /// Check if an identity is registered.
    #[must_use]
    pub fn is_present(&self, identity: &str) -> bool {
        self.by_identity.contains_key(identity)
    }

    /// Resolve an identity to its connection.
    #[must_use]
    pub fn lookup(&self, identity: &str) -> Option<&ConnectionId> {
        self.by_identity.get(identity)
    }

    /// Get the identities owned by a connection, oldest first.
    #[must_use]
    pub fn identities_of(&self, connection_id: &ConnectionId) -> &[String] {
        self.by_connection
            .get(connection_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Check if `connection_id` owns `identity`.
    #[must_use]
    pub fn holds(&self, connection_id: &ConnectionId, identity: &str) -> bool {
        self.by_identity.get(identity) == Some(connection_id)
    }

    /// Register `identity` for `connection_id`.
    ///
    /// A previous owner of the identity silently loses it. Identities the
    /// connection registered before are kept.
    pub fn register(
        &mut self,
        connection_id: &ConnectionId,
        identity: impl Into<String>,
    ) -> Registration {
        let identity = identity.into();
        let mut change = Registration::default();

        match self
            .by_identity
            .insert(identity.clone(), connection_id.clone())
        {
            Some(owner) if &owner == connection_id => return change,
            Some(owner) => {
                self.release(&owner, &identity);
                debug!(connection = %owner, identity = %identity, "Presence: identity taken over");
                change.displaced = Some(owner);
            }
            None => {}
        }

        self.by_connection
            .entry(connection_id.clone())
            .or_default()
            .push(identity);
        change
    }

    /// Remove every identity `connection_id` owns.
    ///
    /// Returns the removed identities, oldest first.
    pub fn remove_connection(&mut self, connection_id: &ConnectionId) -> Vec<String> {
        let identities = self.by_connection.remove(connection_id).unwrap_or_default();
        for identity in &identities {
            self.by_identity.remove(identity);
            debug!(connection = %connection_id, identity = %identity, "Presence: member left");
        }
        identities
    }

    /// Snapshot of registered identities, sorted.
    #[must_use]
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.by_identity.keys().cloned().collect();
        identities.sort_unstable();
        identities
    }

    // Drop `identity` from the reverse entry of `owner`.
    fn release(&mut self, owner: &ConnectionId, identity: &str) {
        if let Some(owned) = self.by_connection.get_mut(owner) {
            owned.retain(|held| held != identity);
            if owned.is_empty() {
                self.by_connection.remove(owner);
            }
        }
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        self.by_identity.len() == self.by_connection.values().map(Vec::len).sum::<usize>()
            && self
                .by_identity
                .iter()
                .all(|(identity, conn)| self.identities_of(conn).contains(identity))
    }
}
