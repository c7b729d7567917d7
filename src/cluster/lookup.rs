//! Server Lookup
//!
//! Concurrent routing table mapping server identity and network address to
//! server descriptors. Consumed by the raft transport when resolving peer
//! IDs to dialable addresses.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::server::ServerDescriptor;

/// Address resolution capability handed to the consensus transport.
pub trait ServerAddressProvider: Send + Sync {
    /// Resolve a server ID to its transport address. `None` means the
    /// address is currently unknown, not that the lookup failed.
    fn server_addr(&self, id: &str) -> Option<String>;
}

#[derive(Default)]
struct Indexes {
    by_address: HashMap<String, Arc<ServerDescriptor>>,
    by_id: HashMap<String, Arc<ServerDescriptor>>,
}

/// Bidirectional index over the live cluster servers.
///
/// Both indices are guarded by a single reader/writer lock so entries appear
/// and disappear atomically in both.
#[derive(Default)]
pub struct ServerLookup {
    inner: RwLock<Indexes>,
}

impl ServerLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a server by both address and ID; last writer wins.
    ///
    /// A re-join under the same ID with a new address (or a new ID claiming
    /// an existing address) clears the superseded index entry so a
    /// descriptor stays reachable by address exactly when reachable by ID.
    pub fn add_server(&self, server: ServerDescriptor) {
        let server = Arc::new(server);
        let mut inner = self.inner.write().unwrap();

        if let Some(prev) = inner.by_id.get(&server.id).cloned() {
            if prev.address != server.address {
                inner.by_address.remove(&prev.address);
            }
        }
        if let Some(prev) = inner.by_address.get(&server.address).cloned() {
            if prev.id != server.id {
                inner.by_id.remove(&prev.id);
            }
        }

        inner
            .by_address
            .insert(server.address.clone(), Arc::clone(&server));
        inner.by_id.insert(server.id.clone(), server);
    }

    /// Remove a server from both indices; no-op when absent.
    pub fn remove_server(&self, server: &ServerDescriptor) {
        let mut inner = self.inner.write().unwrap();
        inner.by_address.remove(&server.address);
        inner.by_id.remove(&server.id);
    }

    /// Address for a server ID, or `None` when currently unknown.
    pub fn address_for(&self, id: &str) -> Option<String> {
        let inner = self.inner.read().unwrap();
        inner.by_id.get(id).map(|s| s.address.clone())
    }

    /// Descriptor registered at an address.
    pub fn descriptor_for(&self, address: &str) -> Option<Arc<ServerDescriptor>> {
        let inner = self.inner.read().unwrap();
        inner.by_address.get(address).cloned()
    }

    /// Snapshot of all known servers (not a live view).
    pub fn all_servers(&self) -> Vec<Arc<ServerDescriptor>> {
        let inner = self.inner.read().unwrap();
        inner.by_address.values().cloned().collect()
    }

    /// Number of known servers.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ServerAddressProvider for ServerLookup {
    fn server_addr(&self, id: &str) -> Option<String> {
        self.address_for(id)
    }
}
