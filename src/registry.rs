//! Registry of open inbound connections.
//!
//! Each accepted connection registers itself for its lifetime so the hub can
//! report which peers are currently feeding it. Entries are removed by a
//! guard when the connection task ends, including on panic.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;

/// Identifier assigned to an inbound connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Source index and peer of a live connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionEntry {
    /// Index of the accepting source.
    pub source: usize,
    /// Remote peer address.
    pub peer: SocketAddr,
}

/// Concurrent map of live inbound connections keyed by [`ConnectionId`].
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    entries: DashMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    /// Register a connection and return a guard that removes it on drop.
    pub fn register(self: &Arc<Self>, source: usize, peer: SocketAddr) -> RegistrationGuard {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.insert(id, ConnectionEntry { source, peer });
        RegistrationGuard {
            registry: Arc::clone(self),
            id,
        }
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// True when no connection is open.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Snapshot of live connections ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(ConnectionId, ConnectionEntry)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }
}

/// Keeps a connection registered while alive.
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
}

impl RegistrationGuard {
    /// Identifier of the registered connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) { self.registry.entries.remove(&self.id); }
}
