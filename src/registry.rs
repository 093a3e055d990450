//! The set of subscribers currently receiving snapshots.
//!
//! The registry holds the only sending half of each subscriber's queue, so a
//! handle leaving the registry always closes its queue and a handle in the
//! registry always has an open one.

use crate::types::Snapshot;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// The hub's side of a subscriber: its identity and queue sender.
#[derive(Debug)]
pub struct ClientHandle {
    id: ClientId,
    queue: mpsc::Sender<Snapshot>,
}

impl ClientHandle {
    /// Create a handle with a fresh identity and a queue of `capacity`
    /// snapshots. The receiver is drained by the transport layer and yields
    /// `None` once the handle is unregistered or evicted.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Snapshot>) {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ClientId::next(),
            queue,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }
}

/// Registered subscribers, keyed by identity.
#[derive(Debug, Default)]
pub struct Registry {
    clients: HashMap<ClientId, ClientHandle>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handle. A handle whose identity is already present is ignored.
    pub fn register(&mut self, handle: ClientHandle) -> bool {
        match self.clients.entry(handle.id) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    /// Remove a handle and close its queue. Unknown identities are ignored.
    pub fn unregister(&mut self, id: ClientId) -> bool {
        self.clients.remove(&id).is_some()
    }

    /// Queue `snapshot` for every client without blocking.
    ///
    /// Clients whose queue is full, or whose receiver is gone, are removed
    /// and their queue closed. Returns the number of evicted clients.
    pub fn broadcast(&mut self, snapshot: &Snapshot) -> usize {
        let before = self.clients.len();

        self.clients
            .retain(|id, handle| match handle.queue.try_send(snapshot.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(client = %id, "Client queue full, evicting");
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(client = %id, "Client queue closed, removing");
                    false
                }
            });

        before - self.clients.len()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Registered identities in ascending order.
    #[cfg(test)]
    pub(crate) fn ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = self.clients.keys().copied().collect();
        ids.sort();
        ids
    }
}
