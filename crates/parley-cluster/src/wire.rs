//! Wire Protocol
//!
//! Bincode-framed request/reply messages exchanged between the
//! coordinator, the chat and data nodes, and clients. A frame is a u32
//! big-endian length prefix followed by the bincode payload.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use parley_common::prelude::*;

/// Requests the coordinator sends to chat and data nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeRequest {
    /// Reachability probe
    Ping,

    // Participant interface (data nodes)
    CanCommit { txn: Transaction },
    DoCommit { txn: Transaction },
    DoAbort { txn: Transaction },

    // Query interface (data nodes)
    UserExists { username: String },
    VerifyCredentials { username: String, password: String },
    ChatroomOwner { name: String },

    // Chat node interface
    CreateChatroom { name: String },
    DeleteChatroom { name: String },
    Load,
    ChatroomNames,
}

/// Replies from chat and data nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeResponse {
    Pong,
    Voted(Vote),
    Ack,
    Exists(bool),
    Owner(Option<String>),
    Status { ok: bool },
    Load(ChatNodeLoad),
    Names(Vec<String>),
}

/// Requests clients and registering nodes send to the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientRequest {
    RegisterUser { username: String, password: String },
    Login { username: String, password: String },
    CreateChatroom { name: String, owner: String },
    DeleteChatroom { name: String, requester: String },
    GetChatroom { name: String },
    ListChatrooms,
    ReestablishChatroom { name: String },
    RegisterDataNode { host: String, ops_port: u16, participant_port: u16 },
    RegisterChatNode { host: String, port: u16 },
}

/// Coordinator replies to clients and registering nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientReply {
    Op(OpReply),
    Rooms(Vec<String>),
    Registered { operations_port: u16 },
}

/// Write one length-prefixed bincode frame.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T, max_frame_size: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(msg).map_err(|e| Error::Serialization(e.to_string()))?;
    if payload.len() > max_frame_size {
        return Err(Error::Serialization(format!(
            "frame of {} bytes exceeds limit of {}",
            payload.len(),
            max_frame_size
        )));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed bincode frame.
pub async fn read_frame<R, T>(reader: &mut R, max_frame_size: usize) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    let len = reader.read_u32().await? as usize;
    if len > max_frame_size {
        return Err(Error::Serialization(format!(
            "incoming frame of {} bytes exceeds limit of {}",
            len, max_frame_size
        )));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    bincode::deserialize(&buf).map_err(|e| Error::Serialization(e.to_string()))
}
