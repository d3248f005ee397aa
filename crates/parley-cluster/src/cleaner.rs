//! Failure Detector
//!
//! Keeps the registry's liveness assumption approximately accurate:
//! periodically probes every registered endpoint and evicts the ones that
//! do not answer within the probe timeout. Also runs on demand before a
//! reestablish placement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parley_common::prelude::*;

use crate::registry::NodeRegistry;
use crate::transport::NodeRpc;

const ALL_ROLES: [NodeRole; 3] = [
    NodeRole::ChatRoom,
    NodeRole::DataOps,
    NodeRole::DataParticipant,
];

/// Probes registered endpoints and evicts unreachable ones.
pub struct Cleaner {
    registry: Arc<NodeRegistry>,
    rpc: Arc<dyn NodeRpc>,
    config: SweepConfig,
    shutdown: AtomicBool,
}

impl Cleaner {
    pub fn new(registry: Arc<NodeRegistry>, rpc: Arc<dyn NodeRpc>, config: SweepConfig) -> Self {
        Self {
            registry,
            rpc,
            config,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Probe every endpoint registered under `role` and evict the
    /// unreachable ones. Probes run concurrently, each bounded by the
    /// probe timeout so one dead node cannot stall the sweep. Returns the
    /// number of evicted endpoints.
    pub async fn sweep(&self, role: NodeRole) -> usize {
        let snapshot = self.registry.snapshot(role);
        if snapshot.is_empty() {
            return 0;
        }

        let probes = snapshot.into_iter().map(|ep| {
            let rpc = self.rpc.clone();
            let timeout = self.config.probe_timeout;
            async move {
                let alive = match tokio::time::timeout(timeout, rpc.ping(&ep)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        debug!(endpoint = %ep, error = %e, "probe failed");
                        false
                    }
                    Err(_) => {
                        debug!(endpoint = %ep, "probe timed out");
                        false
                    }
                };
                (ep, alive)
            }
        });

        let results = futures::future::join_all(probes).await;

        let mut evicted = 0;
        for (ep, alive) in results {
            if !alive && self.registry.remove(role, &ep) {
                warn!(endpoint = %ep, %role, "evicted unreachable node");
                evicted += 1;
            }
        }
        evicted
    }

    /// Sweep all three roles.
    pub async fn sweep_all(&self) -> usize {
        let mut evicted = 0;
        for role in ALL_ROLES {
            evicted += self.sweep(role).await;
        }
        evicted
    }

    /// Run the periodic sweep loop until [`Cleaner::stop`] is called.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.interval);
        while !self.shutdown.load(Ordering::SeqCst) {
            interval.tick().await;
            let evicted = self.sweep_all().await;
            if evicted > 0 {
                info!(evicted, "registry sweep complete");
            }
        }
    }

    /// Stop the sweep loop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryRpc;

    fn setup() -> (Arc<NodeRegistry>, Arc<InMemoryRpc>, Cleaner) {
        let registry = Arc::new(NodeRegistry::new());
        let rpc = Arc::new(InMemoryRpc::new());
        let cleaner = Cleaner::new(
            registry.clone(),
            rpc.clone(),
            SweepConfig {
                interval: std::time::Duration::from_secs(60),
                probe_timeout: std::time::Duration::from_millis(100),
            },
        );
        (registry, rpc, cleaner)
    }

    #[tokio::test]
    async fn test_sweep_evicts_unreachable() {
        let (registry, rpc, cleaner) = setup();

        for i in 1..=3 {
            let ep = Endpoint::new(format!("chat-{}", i), 9000);
            rpc.add_node(ep.clone());
            registry.register(NodeRole::ChatRoom, ep);
        }
        rpc.set_reachable(&Endpoint::new("chat-2", 9000), false);

        let evicted = cleaner.sweep(NodeRole::ChatRoom).await;
        assert_eq!(evicted, 1);

        let remaining = registry.snapshot(NodeRole::ChatRoom);
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|e| e.host != "chat-2"));
    }

    #[tokio::test]
    async fn test_sweep_keeps_reachable() {
        let (registry, rpc, cleaner) = setup();

        let ep = Endpoint::new("data-1", 8000);
        rpc.add_node(ep.clone());
        registry.register(NodeRole::DataOps, ep);

        assert_eq!(cleaner.sweep(NodeRole::DataOps).await, 0);
        assert_eq!(registry.len(NodeRole::DataOps), 1);
    }

    #[tokio::test]
    async fn test_sweep_all_covers_every_role() {
        let (registry, rpc, cleaner) = setup();

        // One dead endpoint per role; never registered with the fake
        registry.register(NodeRole::ChatRoom, Endpoint::new("dead-chat", 9000));
        registry.register(NodeRole::DataOps, Endpoint::new("dead-ops", 8000));
        registry.register(NodeRole::DataParticipant, Endpoint::new("dead-part", 8001));

        let live = Endpoint::new("chat-1", 9000);
        rpc.add_node(live.clone());
        registry.register(NodeRole::ChatRoom, live);

        assert_eq!(cleaner.sweep_all().await, 3);
        assert_eq!(registry.len(NodeRole::ChatRoom), 1);
        assert!(registry.is_empty(NodeRole::DataOps));
        assert!(registry.is_empty(NodeRole::DataParticipant));
    }
}
