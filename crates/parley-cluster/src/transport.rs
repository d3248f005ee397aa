//! Node RPC Transport
//!
//! Remote calls from the coordinator to chat and data nodes. `TcpRpc` is
//! the production client, issuing one framed request/response exchange
//! per call with bounded connect and request timeouts. `InMemoryRpc`
//! backs the tests with scripted node behavior and call recording.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;

use parley_common::prelude::*;

use crate::wire::{read_frame, write_frame, NodeRequest, NodeResponse};

/// Remote interface of chat and data nodes, as seen from the coordinator.
///
/// Every method takes the target endpoint explicitly; implementations
/// bound each call so an unreachable node can never hang the caller.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Cheap reachability probe
    async fn ping(&self, ep: &Endpoint) -> Result<()>;

    // Participant interface (data nodes)
    async fn can_commit(&self, ep: &Endpoint, txn: &Transaction) -> Result<Vote>;
    async fn do_commit(&self, ep: &Endpoint, txn: &Transaction) -> Result<()>;
    async fn do_abort(&self, ep: &Endpoint, txn: &Transaction) -> Result<()>;

    // Query interface (data nodes)
    async fn user_exists(&self, ep: &Endpoint, username: &str) -> Result<bool>;
    async fn verify_credentials(&self, ep: &Endpoint, username: &str, password: &str)
        -> Result<bool>;
    async fn chatroom_owner(&self, ep: &Endpoint, name: &str) -> Result<Option<String>>;

    // Chat node interface
    async fn create_chatroom(&self, ep: &Endpoint, name: &str) -> Result<()>;
    async fn delete_chatroom(&self, ep: &Endpoint, name: &str) -> Result<()>;
    async fn load(&self, ep: &Endpoint) -> Result<ChatNodeLoad>;
    async fn chatroom_names(&self, ep: &Endpoint) -> Result<Vec<String>>;
}

// ============================================================================
// TCP client
// ============================================================================

/// Production client: one TCP connection and one framed exchange per call.
pub struct TcpRpc {
    config: RpcConfig,
}

impl TcpRpc {
    pub fn new(config: RpcConfig) -> Self {
        Self { config }
    }

    pub fn with_default_config() -> Self {
        Self::new(RpcConfig::default())
    }

    async fn call(&self, ep: &Endpoint, req: NodeRequest) -> Result<NodeResponse> {
        let mut stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(ep.addr()),
        )
        .await
        .map_err(|_| Error::timeout(format!("connecting to {}", ep)))?
        .map_err(|e| Error::network(format!("connect to {}: {}", ep, e)))?;

        let exchange = async {
            write_frame(&mut stream, &req, self.config.max_frame_size).await?;
            read_frame::<_, NodeResponse>(&mut stream, self.config.max_frame_size).await
        };

        tokio::time::timeout(self.config.request_timeout, exchange)
            .await
            .map_err(|_| Error::timeout(format!("request to {}", ep)))?
    }

    fn unexpected(ep: &Endpoint, resp: NodeResponse) -> Error {
        Error::network(format!("unexpected response from {}: {:?}", ep, resp))
    }
}

#[async_trait]
impl NodeRpc for TcpRpc {
    async fn ping(&self, ep: &Endpoint) -> Result<()> {
        match self.call(ep, NodeRequest::Ping).await? {
            NodeResponse::Pong => Ok(()),
            other => Err(Self::unexpected(ep, other)),
        }
    }

    async fn can_commit(&self, ep: &Endpoint, txn: &Transaction) -> Result<Vote> {
        match self.call(ep, NodeRequest::CanCommit { txn: txn.clone() }).await? {
            NodeResponse::Voted(vote) => Ok(vote),
            other => Err(Self::unexpected(ep, other)),
        }
    }

    async fn do_commit(&self, ep: &Endpoint, txn: &Transaction) -> Result<()> {
        match self.call(ep, NodeRequest::DoCommit { txn: txn.clone() }).await? {
            NodeResponse::Ack => Ok(()),
            other => Err(Self::unexpected(ep, other)),
        }
    }

    async fn do_abort(&self, ep: &Endpoint, txn: &Transaction) -> Result<()> {
        match self.call(ep, NodeRequest::DoAbort { txn: txn.clone() }).await? {
            NodeResponse::Ack => Ok(()),
            other => Err(Self::unexpected(ep, other)),
        }
    }

    async fn user_exists(&self, ep: &Endpoint, username: &str) -> Result<bool> {
        let req = NodeRequest::UserExists {
            username: username.to_string(),
        };
        match self.call(ep, req).await? {
            NodeResponse::Exists(exists) => Ok(exists),
            other => Err(Self::unexpected(ep, other)),
        }
    }

    async fn verify_credentials(
        &self,
        ep: &Endpoint,
        username: &str,
        password: &str,
    ) -> Result<bool> {
        let req = NodeRequest::VerifyCredentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        match self.call(ep, req).await? {
            NodeResponse::Exists(valid) => Ok(valid),
            other => Err(Self::unexpected(ep, other)),
        }
    }

    async fn chatroom_owner(&self, ep: &Endpoint, name: &str) -> Result<Option<String>> {
        let req = NodeRequest::ChatroomOwner {
            name: name.to_string(),
        };
        match self.call(ep, req).await? {
            NodeResponse::Owner(owner) => Ok(owner),
            other => Err(Self::unexpected(ep, other)),
        }
    }

    async fn create_chatroom(&self, ep: &Endpoint, name: &str) -> Result<()> {
        let req = NodeRequest::CreateChatroom {
            name: name.to_string(),
        };
        match self.call(ep, req).await? {
            NodeResponse::Status { ok: true } => Ok(()),
            NodeResponse::Status { ok: false } => Err(Error::internal(format!(
                "chat node {} refused to create chatroom {}",
                ep, name
            ))),
            other => Err(Self::unexpected(ep, other)),
        }
    }

    async fn delete_chatroom(&self, ep: &Endpoint, name: &str) -> Result<()> {
        let req = NodeRequest::DeleteChatroom {
            name: name.to_string(),
        };
        match self.call(ep, req).await? {
            NodeResponse::Status { ok: true } => Ok(()),
            NodeResponse::Status { ok: false } => Err(Error::internal(format!(
                "chat node {} refused to delete chatroom {}",
                ep, name
            ))),
            other => Err(Self::unexpected(ep, other)),
        }
    }

    async fn load(&self, ep: &Endpoint) -> Result<ChatNodeLoad> {
        match self.call(ep, NodeRequest::Load).await? {
            NodeResponse::Load(load) => Ok(load),
            other => Err(Self::unexpected(ep, other)),
        }
    }

    async fn chatroom_names(&self, ep: &Endpoint) -> Result<Vec<String>> {
        match self.call(ep, NodeRequest::ChatroomNames).await? {
            NodeResponse::Names(names) => Ok(names),
            other => Err(Self::unexpected(ep, other)),
        }
    }
}

// ============================================================================
// In-memory fake for testing
// ============================================================================

/// Scripted behavior of a single fake node
#[derive(Debug, Clone)]
pub struct FakeNode {
    /// Unreachable nodes fail every call with a network error
    pub reachable: bool,
    /// Vote returned by `can_commit`
    pub vote: Vote,
    /// Delay before `do_commit` acknowledges
    pub ack_delay: Option<Duration>,
    /// When set, `do_commit` fails after any delay
    pub fail_commit: bool,
    /// When set, `create_chatroom` is refused
    pub fail_create: bool,
    /// Data-node state: username -> password
    pub users: HashMap<String, String>,
    /// Data-node state: chatroom -> owner
    pub room_owners: HashMap<String, String>,
    /// Chat-node state: hosted rooms
    pub rooms: Vec<String>,
    /// Chat-node state: connected user count
    pub connected_users: usize,
    /// Chat-node state: advertised TCP port for chat text
    pub tcp_port: u16,
}

impl FakeNode {
    pub fn new() -> Self {
        Self {
            reachable: true,
            vote: Vote::Yes,
            ack_delay: None,
            fail_commit: false,
            fail_create: false,
            users: HashMap::new(),
            room_owners: HashMap::new(),
            rooms: Vec::new(),
            connected_users: 0,
            tcp_port: 0,
        }
    }
}

impl Default for FakeNode {
    fn default() -> Self {
        Self::new()
    }
}

/// A recorded RPC, for assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcCall {
    Ping(Endpoint),
    CanCommit(Endpoint, TxnId),
    DoCommit(Endpoint, TxnId),
    DoAbort(Endpoint, TxnId),
    UserExists(Endpoint, String),
    VerifyCredentials(Endpoint, String),
    ChatroomOwner(Endpoint, String),
    CreateChatroom(Endpoint, String),
    DeleteChatroom(Endpoint, String),
    Load(Endpoint),
    ChatroomNames(Endpoint),
}

/// In-memory transport for testing. Every endpoint maps to a [`FakeNode`]
/// whose reachability, votes, and commit behavior the test scripts.
/// `do_commit` applies the transaction to the fake's data-node state so
/// register-then-login style flows round-trip.
pub struct InMemoryRpc {
    nodes: DashMap<Endpoint, FakeNode>,
    calls: Mutex<Vec<RpcCall>>,
}

impl InMemoryRpc {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Register a fake node with default behavior
    pub fn add_node(&self, ep: Endpoint) {
        self.nodes.insert(ep, FakeNode::new());
    }

    /// Mutate a fake node's scripted behavior or state
    pub fn with_node<F>(&self, ep: &Endpoint, f: F)
    where
        F: FnOnce(&mut FakeNode),
    {
        if let Some(mut node) = self.nodes.get_mut(ep) {
            f(&mut node);
        }
    }

    pub fn set_reachable(&self, ep: &Endpoint, reachable: bool) {
        self.with_node(ep, |n| n.reachable = reachable);
    }

    pub fn set_vote(&self, ep: &Endpoint, vote: Vote) {
        self.with_node(ep, |n| n.vote = vote);
    }

    pub fn set_ack_delay(&self, ep: &Endpoint, delay: Duration) {
        self.with_node(ep, |n| n.ack_delay = Some(delay));
    }

    /// Snapshot of a fake node's state
    pub fn node(&self, ep: &Endpoint) -> Option<FakeNode> {
        self.nodes.get(ep).map(|n| n.clone())
    }

    /// Every call recorded so far
    pub fn calls(&self) -> Vec<RpcCall> {
        self.calls.lock().clone()
    }

    pub fn count_calls<F>(&self, pred: F) -> usize
    where
        F: Fn(&RpcCall) -> bool,
    {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: RpcCall) {
        self.calls.lock().push(call);
    }

    fn unreachable_err(ep: &Endpoint) -> Error {
        Error::network(format!("{} unreachable", ep))
    }

    /// Look up a node, failing like a refused connection when it is
    /// missing or scripted unreachable.
    fn check_reachable(&self, ep: &Endpoint) -> Result<()> {
        match self.nodes.get(ep) {
            Some(node) if node.reachable => Ok(()),
            _ => Err(Self::unreachable_err(ep)),
        }
    }
}

impl Default for InMemoryRpc {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeRpc for InMemoryRpc {
    async fn ping(&self, ep: &Endpoint) -> Result<()> {
        self.record(RpcCall::Ping(ep.clone()));
        self.check_reachable(ep)
    }

    async fn can_commit(&self, ep: &Endpoint, txn: &Transaction) -> Result<Vote> {
        self.record(RpcCall::CanCommit(ep.clone(), txn.id));
        self.check_reachable(ep)?;
        Ok(self.nodes.get(ep).map(|n| n.vote).unwrap_or(Vote::No))
    }

    async fn do_commit(&self, ep: &Endpoint, txn: &Transaction) -> Result<()> {
        self.record(RpcCall::DoCommit(ep.clone(), txn.id));
        self.check_reachable(ep)?;

        // Copy scripted behavior out so no map entry is held across awaits
        let (delay, fail) = match self.nodes.get(ep) {
            Some(node) => (node.ack_delay, node.fail_commit),
            None => return Err(Self::unreachable_err(ep)),
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(Error::network(format!("doCommit failed at {}", ep)));
        }

        if let Some(mut node) = self.nodes.get_mut(ep) {
            match txn.op {
                TxnOp::CreateUser => {
                    node.users.insert(txn.key.clone(), txn.value.clone());
                }
                TxnOp::CreateChatroom => {
                    node.room_owners.insert(txn.key.clone(), txn.value.clone());
                }
                TxnOp::DeleteChatroom => {
                    node.room_owners.remove(&txn.key);
                }
            }
        }
        Ok(())
    }

    async fn do_abort(&self, ep: &Endpoint, txn: &Transaction) -> Result<()> {
        self.record(RpcCall::DoAbort(ep.clone(), txn.id));
        self.check_reachable(ep)
    }

    async fn user_exists(&self, ep: &Endpoint, username: &str) -> Result<bool> {
        self.record(RpcCall::UserExists(ep.clone(), username.to_string()));
        self.check_reachable(ep)?;
        Ok(self
            .nodes
            .get(ep)
            .map(|n| n.users.contains_key(username))
            .unwrap_or(false))
    }

    async fn verify_credentials(
        &self,
        ep: &Endpoint,
        username: &str,
        password: &str,
    ) -> Result<bool> {
        self.record(RpcCall::VerifyCredentials(ep.clone(), username.to_string()));
        self.check_reachable(ep)?;
        Ok(self
            .nodes
            .get(ep)
            .and_then(|n| n.users.get(username).map(|p| p == password))
            .unwrap_or(false))
    }

    async fn chatroom_owner(&self, ep: &Endpoint, name: &str) -> Result<Option<String>> {
        self.record(RpcCall::ChatroomOwner(ep.clone(), name.to_string()));
        self.check_reachable(ep)?;
        Ok(self.nodes.get(ep).and_then(|n| n.room_owners.get(name).cloned()))
    }

    async fn create_chatroom(&self, ep: &Endpoint, name: &str) -> Result<()> {
        self.record(RpcCall::CreateChatroom(ep.clone(), name.to_string()));
        self.check_reachable(ep)?;
        let mut node = self
            .nodes
            .get_mut(ep)
            .ok_or_else(|| Self::unreachable_err(ep))?;
        if node.fail_create {
            return Err(Error::internal(format!(
                "chat node {} refused to create chatroom {}",
                ep, name
            )));
        }
        node.rooms.push(name.to_string());
        Ok(())
    }

    async fn delete_chatroom(&self, ep: &Endpoint, name: &str) -> Result<()> {
        self.record(RpcCall::DeleteChatroom(ep.clone(), name.to_string()));
        self.check_reachable(ep)?;
        if let Some(mut node) = self.nodes.get_mut(ep) {
            node.rooms.retain(|r| r != name);
        }
        Ok(())
    }

    async fn load(&self, ep: &Endpoint) -> Result<ChatNodeLoad> {
        self.record(RpcCall::Load(ep.clone()));
        self.check_reachable(ep)?;
        let node = self
            .nodes
            .get(ep)
            .ok_or_else(|| Self::unreachable_err(ep))?;
        Ok(ChatNodeLoad {
            chatrooms: node.rooms.len(),
            users: node.connected_users,
            host: ep.host.clone(),
            tcp_port: node.tcp_port,
            ops_port: ep.port,
        })
    }

    async fn chatroom_names(&self, ep: &Endpoint) -> Result<Vec<String>> {
        self.record(RpcCall::ChatroomNames(ep.clone()));
        self.check_reachable(ep)?;
        Ok(self.nodes.get(ep).map(|n| n.rooms.clone()).unwrap_or_default())
    }
}
