//! Node Registry
//!
//! Role-partitioned lists of known node endpoints. Each role has its own
//! lock so registration traffic on one role never contends with the
//! others, and callers iterate over snapshots so no lock is ever held
//! across a remote call.

use parking_lot::Mutex;
use tokio::sync::broadcast;

use parley_common::prelude::*;

/// Registry change event
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// An endpoint registered under a role
    Registered { role: NodeRole, endpoint: Endpoint },
    /// An endpoint was removed (sweep eviction or explicit removal)
    Evicted { role: NodeRole, endpoint: Endpoint },
}

/// Thread-safe registry of node endpoints, partitioned by role.
///
/// Registrations are process-lifetime only: a coordinator restart loses
/// all entries and nodes must re-register. Duplicate registrations are
/// allowed; callers are responsible for not double-registering.
pub struct NodeRegistry {
    chat_nodes: Mutex<Vec<Endpoint>>,
    data_ops_nodes: Mutex<Vec<Endpoint>>,
    data_participants: Mutex<Vec<Endpoint>>,
    event_tx: broadcast::Sender<RegistryEvent>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            chat_nodes: Mutex::new(Vec::new()),
            data_ops_nodes: Mutex::new(Vec::new()),
            data_participants: Mutex::new(Vec::new()),
            event_tx,
        }
    }

    fn lane(&self, role: NodeRole) -> &Mutex<Vec<Endpoint>> {
        match role {
            NodeRole::ChatRoom => &self.chat_nodes,
            NodeRole::DataOps => &self.data_ops_nodes,
            NodeRole::DataParticipant => &self.data_participants,
        }
    }

    /// Append an endpoint under the role's lock. Never rejects.
    pub fn register(&self, role: NodeRole, endpoint: Endpoint) {
        self.lane(role).lock().push(endpoint.clone());
        debug!(%endpoint, %role, "endpoint registered");
        let _ = self.event_tx.send(RegistryEvent::Registered { role, endpoint });
    }

    /// Consistent copy of the current endpoint list for a role, in
    /// registration order.
    pub fn snapshot(&self, role: NodeRole) -> Vec<Endpoint> {
        self.lane(role).lock().clone()
    }

    /// Remove an endpoint by value equality. All duplicate registrations
    /// of the endpoint go with it. Returns whether anything was removed.
    pub fn remove(&self, role: NodeRole, endpoint: &Endpoint) -> bool {
        let removed = {
            let mut nodes = self.lane(role).lock();
            let before = nodes.len();
            nodes.retain(|e| e != endpoint);
            nodes.len() != before
        };
        if removed {
            let _ = self.event_tx.send(RegistryEvent::Evicted {
                role,
                endpoint: endpoint.clone(),
            });
        }
        removed
    }

    pub fn len(&self, role: NodeRole) -> usize {
        self.lane(role).lock().len()
    }

    pub fn is_empty(&self, role: NodeRole) -> bool {
        self.len(role) == 0
    }

    /// Subscribe to registry change events
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
