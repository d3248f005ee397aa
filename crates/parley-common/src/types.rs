//! Core types for Parley

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};

/// Character reserved by the chat-text wire encoding. Disallowed in
/// usernames, passwords, and chatroom names.
pub const RESERVED_SEPARATOR: char = ':';

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a distributed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// A remotely callable service instance. Identity is (host, port); the
/// service label only shows up in logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub service: Option<String>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            service: None,
        }
    }

    pub fn with_service(host: impl Into<String>, port: u16, service: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            service: Some(service.into()),
        }
    }

    /// `host:port` form for connecting
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Roles
// ============================================================================

/// The three registry partitions a node endpoint can belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// Chatroom-hosting node
    ChatRoom,
    /// Data node, query interface
    DataOps,
    /// Data node, two-phase-commit participant interface
    DataParticipant,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::ChatRoom => write!(f, "chatroom"),
            NodeRole::DataOps => write!(f, "data-ops"),
            NodeRole::DataParticipant => write!(f, "data-participant"),
        }
    }
}

// ============================================================================
// Transactions
// ============================================================================

/// Kind of mutating operation carried by a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnOp {
    CreateUser,
    CreateChatroom,
    DeleteChatroom,
}

impl fmt::Display for TxnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnOp::CreateUser => write!(f, "CREATE_USER"),
            TxnOp::CreateChatroom => write!(f, "CREATE_CHATROOM"),
            TxnOp::DeleteChatroom => write!(f, "DELETE_CHATROOM"),
        }
    }
}

/// One mutating operation as shipped to participants. `key`/`value` hold
/// the operation payload: username/password for CreateUser,
/// chatroom-name/owner for the chatroom operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxnId,
    pub op: TxnOp,
    pub key: String,
    pub value: String,
}

impl Transaction {
    pub fn new(id: TxnId, op: TxnOp, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id,
            op,
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A participant's answer in the vote phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Vote {
    Yes,
    No,
}

/// Coordinator-side decision state for a transaction. `Na` doubles as the
/// "no decision yet" sentinel returned for unknown transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Yes,
    No,
    Na,
}

// ============================================================================
// Chat nodes
// ============================================================================

/// Load report from a chat node, used for placement decisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatNodeLoad {
    pub chatrooms: usize,
    pub users: usize,
    pub host: String,
    pub tcp_port: u16,
    pub ops_port: u16,
}

/// Where a client connects to reach a hosted chatroom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomLocation {
    pub host: String,
    pub tcp_port: u16,
    pub ops_port: u16,
}

impl From<&ChatNodeLoad> for RoomLocation {
    fn from(load: &ChatNodeLoad) -> Self {
        Self {
            host: load.host.clone(),
            tcp_port: load.tcp_port,
            ops_port: load.ops_port,
        }
    }
}

impl fmt::Display for RoomLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tcp:{} ops:{}", self.host, self.tcp_port, self.ops_port)
    }
}

// ============================================================================
// Client-facing replies
// ============================================================================

/// Outcome of a client-facing operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpStatus {
    Ok,
    Fail,
}

/// Structured reply for every client-facing operation. Domain failures are
/// reported here, never as a dropped connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpReply {
    pub status: OpStatus,
    pub message: String,
    pub location: Option<RoomLocation>,
}

impl OpReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: OpStatus::Ok,
            message: message.into(),
            location: None,
        }
    }

    pub fn ok_at(message: impl Into<String>, location: RoomLocation) -> Self {
        Self {
            status: OpStatus::Ok,
            message: message.into(),
            location: Some(location),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: OpStatus::Fail,
            message: message.into(),
            location: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == OpStatus::Ok
    }
}

/// Reject names and credentials that are empty or contain the reserved
/// separator character.
pub fn validate_name(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::validation(format!("{} must not be empty", kind)));
    }
    if value.contains(RESERVED_SEPARATOR) {
        return Err(Error::validation(format!(
            "{} must not contain '{}'",
            kind, RESERVED_SEPARATOR
        )));
    }
    Ok(())
}
