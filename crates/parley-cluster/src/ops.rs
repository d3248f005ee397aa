//! Client Operations
//!
//! The coordinator's client-facing surface. Each mutating operation
//! validates its input, consults the data nodes for existence and
//! authorization, and drives a transaction through the two-phase-commit
//! engine; reads are answered by the first reachable data node. Domain
//! failures come back as structured replies, never as errors.

use parking_lot::Mutex;
use std::sync::Arc;

use parley_common::prelude::*;

use crate::coordinator::TxnCoordinator;
use crate::placement::{Placement, PlacementOutcome};
use crate::registry::NodeRegistry;
use crate::transport::NodeRpc;
use crate::two_phase::TwoPhaseEngine;

/// Answer from the first reachable data node, or `NoNode` when the whole
/// role is unreachable.
enum DataAnswer<T> {
    Answered(T),
    NoNode,
}

/// Client-facing operation handlers.
pub struct Operations {
    registry: Arc<NodeRegistry>,
    coordinator: Arc<TxnCoordinator>,
    engine: Arc<TwoPhaseEngine>,
    placement: Arc<Placement>,
    rpc: Arc<dyn NodeRpc>,
    /// Port this coordinator serves clients on, handed back to
    /// registering nodes.
    client_port: u16,
}

impl Operations {
    pub fn new(
        registry: Arc<NodeRegistry>,
        coordinator: Arc<TxnCoordinator>,
        engine: Arc<TwoPhaseEngine>,
        placement: Arc<Placement>,
        rpc: Arc<dyn NodeRpc>,
        client_port: u16,
    ) -> Self {
        Self {
            registry,
            coordinator,
            engine,
            placement,
            rpc,
            client_port,
        }
    }

    // ========================================================================
    // Node registration
    // ========================================================================

    /// Register a data node's query and participant endpoints.
    pub fn register_data_node(&self, host: &str, ops_port: u16, participant_port: u16) -> u16 {
        self.registry.register(
            NodeRole::DataOps,
            Endpoint::with_service(host, ops_port, "data-ops"),
        );
        self.registry.register(
            NodeRole::DataParticipant,
            Endpoint::with_service(host, participant_port, "data-participant"),
        );
        info!(host, ops_port, participant_port, "data node registered");
        self.client_port
    }

    /// Register a chat node's operations endpoint.
    pub fn register_chat_node(&self, host: &str, port: u16) -> u16 {
        self.registry
            .register(NodeRole::ChatRoom, Endpoint::with_service(host, port, "chatroom"));
        info!(host, port, "chat node registered");
        self.client_port
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub async fn register_user(&self, username: &str, password: &str) -> OpReply {
        if let Err(e) = validate_name("username", username) {
            return OpReply::fail(e.to_string());
        }
        if let Err(e) = validate_name("password", password) {
            return OpReply::fail(e.to_string());
        }

        match self.query_user_exists(username).await {
            DataAnswer::Answered(true) => return OpReply::fail("User already exists"),
            DataAnswer::Answered(false) => {}
            DataAnswer::NoNode => {
                return OpReply::fail("No data node reachable; try again later")
            }
        }

        let txn = self.coordinator.begin(TxnOp::CreateUser, username, password);
        let participants = self.registry.snapshot(NodeRole::DataParticipant);
        match self.engine.run(&txn, &participants).await {
            Ok(()) => OpReply::ok(format!("User {} registered", username)),
            Err(e) => {
                warn!(username, error = %e, "registerUser transaction failed");
                OpReply::fail("Could not register user; try again")
            }
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> OpReply {
        if let Err(e) = validate_name("username", username) {
            return OpReply::fail(e.to_string());
        }
        if let Err(e) = validate_name("password", password) {
            return OpReply::fail(e.to_string());
        }

        for ep in self.registry.snapshot(NodeRole::DataOps) {
            match self.rpc.verify_credentials(&ep, username, password).await {
                Ok(true) => return OpReply::ok("Login successful"),
                Ok(false) => return OpReply::fail("Invalid username or password"),
                Err(e) => {
                    debug!(endpoint = %ep, error = %e, "data node unreachable during login; skipping");
                }
            }
        }
        OpReply::fail("No data node reachable; try again later")
    }

    // ========================================================================
    // Chatrooms
    // ========================================================================

    pub async fn create_chatroom(&self, name: &str, owner: &str) -> OpReply {
        if let Err(e) = validate_name("chatroom name", name) {
            return OpReply::fail(e.to_string());
        }
        if let Err(e) = validate_name("owner", owner) {
            return OpReply::fail(e.to_string());
        }

        match self.query_room_owner(name).await {
            DataAnswer::Answered(Some(_)) => {
                return OpReply::fail(format!("Chatroom {} already exists", name))
            }
            DataAnswer::Answered(None) => {}
            DataAnswer::NoNode => {
                return OpReply::fail("No data node reachable; try again later")
            }
        }

        let txn = self.coordinator.begin(TxnOp::CreateChatroom, name, owner);
        let participants = self.registry.snapshot(NodeRole::DataParticipant);

        // The chat-node placement is the side effect: it happens only
        // after every reached participant voted yes, and doCommit is only
        // issued once it succeeded.
        let placed: Arc<Mutex<Option<RoomLocation>>> = Arc::new(Mutex::new(None));
        let placement = self.placement.clone();
        let slot = placed.clone();
        let result = self
            .engine
            .run_with_side_effect(&txn, &participants, || async move {
                match placement.create_or_locate(name).await? {
                    PlacementOutcome::Created(location) => {
                        *slot.lock() = Some(location);
                        Ok(())
                    }
                    PlacementOutcome::AlreadyExists(_) => {
                        Err(PlacementError::AlreadyHosted(name.to_string()).into())
                    }
                }
            })
            .await;

        match result {
            Ok(()) => match placed.lock().take() {
                Some(location) => {
                    OpReply::ok_at(format!("Chatroom {} created", name), location)
                }
                None => {
                    error!(room = name, "commit succeeded but no placement was recorded");
                    OpReply::fail("Could not create chatroom; try again")
                }
            },
            Err(Error::Placement(PlacementError::AlreadyHosted(_))) => {
                OpReply::fail(format!("Chatroom {} already exists", name))
            }
            Err(Error::Placement(PlacementError::NoCapacity)) => {
                OpReply::fail("No chat node available to host the room")
            }
            Err(e) => {
                warn!(room = name, error = %e, "createChatroom transaction failed");
                OpReply::fail("Could not create chatroom; try again")
            }
        }
    }

    pub async fn delete_chatroom(&self, name: &str, requester: &str) -> OpReply {
        if let Err(e) = validate_name("chatroom name", name) {
            return OpReply::fail(e.to_string());
        }
        if let Err(e) = validate_name("requester", requester) {
            return OpReply::fail(e.to_string());
        }

        let owner = match self.query_room_owner(name).await {
            DataAnswer::Answered(Some(owner)) => owner,
            DataAnswer::Answered(None) => {
                return OpReply::fail(format!("Chatroom {} does not exist", name))
            }
            DataAnswer::NoNode => {
                return OpReply::fail("No data node reachable; try again later")
            }
        };
        if owner != requester {
            return OpReply::fail("Not the chatroom owner; delete refused");
        }

        // Resolve the host before the round; tearing it down is the side
        // effect. A room whose host already died still has its metadata
        // cleared.
        let host = self.placement.find_host(name).await.map(|(ep, _)| ep);

        let txn = self.coordinator.begin(TxnOp::DeleteChatroom, name, requester);
        let participants = self.registry.snapshot(NodeRole::DataParticipant);
        let rpc = self.rpc.clone();
        let result = self
            .engine
            .run_with_side_effect(&txn, &participants, || async move {
                match host {
                    Some(ep) => rpc.delete_chatroom(&ep, name).await,
                    None => {
                        warn!(room = name, "no chat node hosts the room; nothing to tear down");
                        Ok(())
                    }
                }
            })
            .await;

        match result {
            Ok(()) => OpReply::ok(format!("Chatroom {} deleted", name)),
            Err(e) => {
                warn!(room = name, error = %e, "deleteChatroom transaction failed");
                OpReply::fail("Could not delete chatroom; try again")
            }
        }
    }

    pub async fn get_chatroom(&self, name: &str) -> OpReply {
        if let Err(e) = validate_name("chatroom name", name) {
            return OpReply::fail(e.to_string());
        }
        match self.placement.find_host(name).await {
            Some((_, location)) => {
                OpReply::ok_at(format!("Chatroom {} found", name), location)
            }
            None => OpReply::fail(format!("Chatroom {} not found", name)),
        }
    }

    pub async fn list_chatrooms(&self) -> Vec<String> {
        self.placement.list_rooms().await
    }

    pub async fn reestablish_chatroom(&self, name: &str) -> OpReply {
        if let Err(e) = validate_name("chatroom name", name) {
            return OpReply::fail(e.to_string());
        }
        match self.placement.reestablish(name).await {
            Ok(location) => {
                OpReply::ok_at(format!("Chatroom {} reestablished", name), location)
            }
            Err(e) => {
                warn!(room = name, error = %e, "reestablishChatroom failed");
                OpReply::fail("Could not reestablish chatroom; try again")
            }
        }
    }

    // ========================================================================
    // Data-node queries
    // ========================================================================

    /// First reachable data node's answer is authoritative; unreachable
    /// nodes are skipped, never treated as "not found".
    async fn query_user_exists(&self, username: &str) -> DataAnswer<bool> {
        for ep in self.registry.snapshot(NodeRole::DataOps) {
            match self.rpc.user_exists(&ep, username).await {
                Ok(exists) => return DataAnswer::Answered(exists),
                Err(e) => {
                    debug!(endpoint = %ep, error = %e, "data node unreachable during lookup; skipping");
                }
            }
        }
        DataAnswer::NoNode
    }

    async fn query_room_owner(&self, name: &str) -> DataAnswer<Option<String>> {
        for ep in self.registry.snapshot(NodeRole::DataOps) {
            match self.rpc.chatroom_owner(&ep, name).await {
                Ok(owner) => return DataAnswer::Answered(owner),
                Err(e) => {
                    debug!(endpoint = %ep, error = %e, "data node unreachable during lookup; skipping");
                }
            }
        }
        DataAnswer::NoNode
    }
}
