//! Presence registry.
//!
//! The registry maps each identity to its single live connection and is the
//! source of truth for "is this user reachable right now". It is an owned
//! object, constructed with the relay and shared by `Arc`.
//!
//! Every operation touches exactly one `DashMap` entry under that shard's
//! lock, so `register`, `lookup` and `unregister` are atomic with respect to
//! each other for a given identity.

use crate::connection::{ConnectionHandle, ConnectionId};
use dashmap::DashMap;
use rtc_protocol::{ServerEvent, UserId};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Snapshot row describing one present user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub connection_id: u64,
    /// When the current connection was admitted.
    pub connected_at: u64,
}

/// Identity to live-connection map.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: DashMap<UserId, ConnectionHandle>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for its user, unconditionally replacing any
    /// existing entry.
    ///
    /// Returns the superseded handle, if there was one.
    pub fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let user = handle.user().clone();
        let connection = handle.id();
        let previous = self.entries.insert(user.clone(), handle);

        match &previous {
            Some(old) => info!(
                user = %user,
                connection = %connection,
                superseded = %old.id(),
                "Presence: connection replaced"
            ),
            None => debug!(user = %user, connection = %connection, "Presence: registered"),
        }

        previous
    }

    /// Resolve a user to their live connection.
    #[must_use]
    pub fn lookup(&self, user: &UserId) -> Option<ConnectionHandle> {
        self.entries.get(user).map(|entry| entry.value().clone())
    }

    /// Remove the entry for the handle's user, but only if it is still this
    /// exact connection.
    ///
    /// A disconnect from a superseded connection leaves the newer one alone.
    /// Returns `true` if an entry was removed.
    pub fn unregister(&self, handle: &ConnectionHandle) -> bool {
        let removed = self
            .entries
            .remove_if(handle.user(), |_, current| current.id() == handle.id())
            .is_some();

        if removed {
            debug!(user = %handle.user(), connection = %handle.id(), "Presence: unregistered");
        } else {
            debug!(
                user = %handle.user(),
                connection = %handle.id(),
                "Presence: stale unregister ignored"
            );
        }

        removed
    }

    /// Check if a user currently has a live connection.
    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.entries.contains_key(user)
    }

    /// The connection id currently registered for a user.
    #[must_use]
    pub fn connection_of(&self, user: &UserId) -> Option<ConnectionId> {
        self.entries.get(user).map(|entry| entry.id())
    }

    /// Number of present users.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Check if nobody is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of all present users.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Serializable snapshot of current presence.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        let mut rows: Vec<PresenceEntry> = self
            .entries
            .iter()
            .map(|entry| PresenceEntry {
                user_id: entry.key().clone(),
                connection_id: entry.id().get(),
                connected_at: entry.connected_at(),
            })
            .collect();
        rows.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        rows
    }

    /// Deliver an event to a user if they are present.
    ///
    /// Returns `true` if the event was queued on a live connection.
    pub fn send_to(&self, user: &UserId, event: ServerEvent) -> bool {
        match self.lookup(user) {
            Some(handle) => handle.send(event),
            None => {
                trace!(user = %user, event = event.kind(), "Target not present");
                false
            }
        }
    }

    /// Deliver an event to every registered connection.
    ///
    /// Returns the number of connections the event was queued on.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        let event = Arc::new(event);
        // Collect first so no shard lock is held while sending.
        let targets: Vec<ConnectionHandle> =
            self.entries.iter().map(|entry| entry.value().clone()).collect();

        let delivered = targets
            .iter()
            .filter(|handle| handle.send_shared(Arc::clone(&event)))
            .count();

        trace!(event = event.kind(), recipients = delivered, "Broadcast");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::new(id)
    }

    #[test]
    fn test_register_lookup_unregister() {
        let registry = PresenceRegistry::new();
        let (handle, _rx) = ConnectionHandle::new(user("alice"));

        assert!(registry.register(handle.clone()).is_none());
        assert!(registry.is_online(&user("alice")));
        assert_eq!(registry.lookup(&user("alice")), Some(handle.clone()));

        assert!(registry.unregister(&handle));
        assert!(registry.lookup(&user("alice")).is_none());

        // Second close is a no-op.
        assert!(!registry.unregister(&handle));
    }

    #[test]
    fn test_register_overwrites_previous_handle() {
        let registry = PresenceRegistry::new();
        let (old, _rx1) = ConnectionHandle::new(user("alice"));
        let (new, _rx2) = ConnectionHandle::new(user("alice"));

        registry.register(old.clone());
        let superseded = registry.register(new.clone());

        assert_eq!(superseded, Some(old));
        assert_eq!(registry.lookup(&user("alice")), Some(new));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_stale_unregister_keeps_newer_connection() {
        let registry = PresenceRegistry::new();
        let (old, _rx1) = ConnectionHandle::new(user("alice"));
        let (new, _rx2) = ConnectionHandle::new(user("alice"));

        registry.register(old.clone());
        registry.register(new.clone());

        assert!(!registry.unregister(&old));
        assert_eq!(registry.connection_of(&user("alice")), Some(new.id()));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_connection() {
        let registry = PresenceRegistry::new();
        let (alice, mut alice_rx) = ConnectionHandle::new(user("alice"));
        let (bob, mut bob_rx) = ConnectionHandle::new(user("bob"));
        registry.register(alice);
        registry.register(bob);

        let count = registry.broadcast(ServerEvent::user_status(user("carol"), true));
        assert_eq!(count, 2);

        assert!(alice_rx.try_recv().is_ok());
        assert!(bob_rx.try_recv().is_ok());
    }

    #[test]
    fn test_send_to_absent_user() {
        let registry = PresenceRegistry::new();
        assert!(!registry.send_to(&user("ghost"), ServerEvent::pong(None)));
    }

    #[test]
    fn test_snapshot_sorted() {
        let registry = PresenceRegistry::new();
        let (bob, _rx1) = ConnectionHandle::new(user("bob"));
        let (alice, _rx2) = ConnectionHandle::new(user("alice"));
        registry.register(bob);
        registry.register(alice);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].user_id, user("alice"));
        assert_eq!(registry.online_users().len(), 2);
    }

    #[test]
    fn test_concurrent_register_unregister() {
        let registry = Arc::new(PresenceRegistry::new());
        let mut threads = Vec::new();

        for i in 0..8 {
            let registry = Arc::clone(&registry);
            threads.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    let (handle, _rx) = ConnectionHandle::new(UserId::new(format!("user-{}", i % 4)));
                    registry.register(handle.clone());
                    registry.unregister(&handle);
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }

        // Every entry left behind must be a handle some thread registered last.
        assert!(registry.count() <= 4);
    }
}
