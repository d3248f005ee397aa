//! Chatroom Placement
//!
//! Locates the chat node hosting a room and selects the least-loaded node
//! for new rooms: fewest connected users first, ties broken by fewest
//! hosted rooms, then registration order. Lookup and placement both walk
//! the registry snapshot in registration order, so behavior is
//! deterministic for a fixed snapshot.
//!
//! Reestablishment is serialized through a dedicated lock so two clients
//! recovering the same room cannot both observe "not found" and create it
//! twice.

use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

use parley_common::prelude::*;

use crate::cleaner::Cleaner;
use crate::registry::NodeRegistry;
use crate::transport::NodeRpc;

/// Result of a placement attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementOutcome {
    /// The room was created on the returned node
    Created(RoomLocation),
    /// Some node already hosts the room; nothing was mutated
    AlreadyExists(RoomLocation),
}

/// Chatroom lookup, placement, and reestablishment.
pub struct Placement {
    registry: Arc<NodeRegistry>,
    rpc: Arc<dyn NodeRpc>,
    cleaner: Arc<Cleaner>,
    reestablish_lock: AsyncMutex<()>,
}

impl Placement {
    pub fn new(registry: Arc<NodeRegistry>, rpc: Arc<dyn NodeRpc>, cleaner: Arc<Cleaner>) -> Self {
        Self {
            registry,
            rpc,
            cleaner,
            reestablish_lock: AsyncMutex::new(()),
        }
    }

    /// Find the chat node currently hosting `name`, in registration
    /// order. Unreachable nodes are skipped, never treated as "not
    /// hosting".
    pub async fn find_host(&self, name: &str) -> Option<(Endpoint, RoomLocation)> {
        for ep in self.registry.snapshot(NodeRole::ChatRoom) {
            let names = match self.rpc.chatroom_names(&ep).await {
                Ok(names) => names,
                Err(e) => {
                    debug!(endpoint = %ep, error = %e, "chat node unreachable during lookup; skipping");
                    continue;
                }
            };
            if !names.iter().any(|n| n == name) {
                continue;
            }
            match self.rpc.load(&ep).await {
                Ok(load) => return Some((ep, RoomLocation::from(&load))),
                Err(e) => {
                    warn!(endpoint = %ep, error = %e, "host found but load query failed; skipping");
                }
            }
        }
        None
    }

    /// Create `name` on the least-loaded chat node, or report the node
    /// that already hosts it. On a create failure the whole operation
    /// fails and no node records the room.
    pub async fn create_or_locate(&self, name: &str) -> Result<PlacementOutcome> {
        if let Some((_, location)) = self.find_host(name).await {
            return Ok(PlacementOutcome::AlreadyExists(location));
        }

        let candidates = self.registry.snapshot(NodeRole::ChatRoom);
        let loads = futures::future::join_all(candidates.iter().map(|ep| {
            let rpc = self.rpc.clone();
            let ep = ep.clone();
            async move {
                let load = rpc.load(&ep).await;
                (ep, load)
            }
        }))
        .await;

        let mut ranked: Vec<(Endpoint, ChatNodeLoad)> = Vec::new();
        for (ep, load) in loads {
            match load {
                Ok(load) => ranked.push((ep, load)),
                Err(e) => {
                    debug!(endpoint = %ep, error = %e, "chat node unreachable during placement; skipping");
                }
            }
        }
        if ranked.is_empty() {
            return Err(PlacementError::NoCapacity.into());
        }

        // Stable sort keeps registration order as the final tie-break
        ranked.sort_by_key(|(_, load)| (load.users, load.chatrooms));
        let (target, load) = &ranked[0];

        self.rpc.create_chatroom(target, name).await?;
        info!(room = name, node = %target, "placed chatroom");
        Ok(PlacementOutcome::Created(RoomLocation::from(load)))
    }

    /// Recover a room whose host became unreachable. Only one
    /// reestablishment proceeds at a time system-wide; the registry is
    /// swept first so a dead host cannot shadow the placement. Losing the
    /// race to another client is success: the winner's location is
    /// returned.
    pub async fn reestablish(&self, name: &str) -> Result<RoomLocation> {
        let _guard = self.reestablish_lock.lock().await;
        self.cleaner.sweep(NodeRole::ChatRoom).await;

        match self.create_or_locate(name).await? {
            PlacementOutcome::Created(location) => {
                info!(room = name, "reestablished chatroom");
                Ok(location)
            }
            PlacementOutcome::AlreadyExists(location) => {
                debug!(room = name, "chatroom already reestablished by a concurrent client");
                Ok(location)
            }
        }
    }

    /// Union of the room names hosted by reachable chat nodes, first-seen
    /// order, deduplicated.
    pub async fn list_rooms(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for ep in self.registry.snapshot(NodeRole::ChatRoom) {
            match self.rpc.chatroom_names(&ep).await {
                Ok(names) => {
                    for name in names {
                        if !seen.contains(&name) {
                            seen.push(name);
                        }
                    }
                }
                Err(e) => {
                    debug!(endpoint = %ep, error = %e, "chat node unreachable during listing; skipping");
                }
            }
        }
        seen
    }
}
