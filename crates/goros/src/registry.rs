use crate::peer::Peer;
use dashmap::DashMap;
use goro_common::PeerId;
use std::sync::Arc;

/// Concurrent identity → peer table.
///
/// Holds at most one peer per identity: inserting over an existing entry
/// returns the displaced predecessor for the caller to close (reconnect
/// takeover). Removal is instance-guarded so a predecessor's teardown can
/// never evict its replacement.
#[derive(Default)]
pub struct PeerRegistry {
    peers: DashMap<PeerId, Arc<Peer>>,
}

impl PeerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    /// Stores `peer` under its identity, returning any displaced entry.
    #[must_use]
    pub fn insert(&self, peer: Arc<Peer>) -> Option<Arc<Peer>> {
        self.peers.insert(*peer.id(), peer)
    }

    /// Removes the entry for `id` only if it is this exact peer instance.
    pub fn remove_if_same(&self, id: &PeerId, peer: &Arc<Peer>) {
        self.peers.remove_if(id, |_, current| Arc::ptr_eq(current, peer));
    }

    /// Looks up the current peer for `id`.
    #[must_use]
    pub fn get(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.peers.get(id).map(|entry| entry.value().clone())
    }

    /// Number of registered peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns `true` if no peers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
