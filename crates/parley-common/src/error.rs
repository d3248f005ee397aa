//! Error types for Parley

use thiserror::Error;

/// Result type alias using Parley's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Parley
#[derive(Error, Debug)]
pub enum Error {
    // Transaction errors
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    // Placement errors
    #[error("Placement error: {0}")]
    Placement(#[from] PlacementError),

    // Remote call failures
    #[error("Network error: {0}")]
    Network(String),

    // Bounded waits that expired
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // Client input rejected before any remote work
    #[error("Validation error: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Not found
    #[error("{0} not found: {1}")]
    NotFound(String, String),

    // Already exists
    #[error("{0} already exists: {1}")]
    AlreadyExists(String, String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("no reachable participant for transaction {0}")]
    NoParticipants(u64),

    #[error("a participant voted no on transaction {0}")]
    Rejected(u64),

    #[error("a participant was unreachable during the vote for transaction {0}")]
    QuorumIncomplete(u64),

    #[error("commit acknowledgments timed out for transaction {0}")]
    CommitTimeout(u64),

    #[error("commit wait already registered for transaction {0}")]
    WaitInProgress(u64),
}

#[derive(Error, Debug)]
pub enum PlacementError {
    #[error("chatroom already hosted: {0}")]
    AlreadyHosted(String),

    #[error("no chat node has capacity")]
    NoCapacity,

    #[error("chatroom not hosted anywhere: {0}")]
    NotHosted(String),
}

impl Error {
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound(kind.into(), name.into())
    }

    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::AlreadyExists(kind.into(), name.into())
    }

    /// True for failures caused by an unreachable or misbehaving remote
    /// endpoint. Callers use this to decide skip-and-log versus surfacing.
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Timeout(_) | Error::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_found("Chatroom", "lobby");
        assert_eq!(err.to_string(), "Chatroom not found: lobby");

        let err = Error::Transaction(TransactionError::Rejected(7));
        assert_eq!(
            err.to_string(),
            "Transaction error: a participant voted no on transaction 7"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_remote());
    }

    #[test]
    fn test_is_remote() {
        assert!(Error::network("down").is_remote());
        assert!(Error::timeout("slow").is_remote());
        assert!(!Error::validation("bad name").is_remote());
        assert!(!Error::Placement(PlacementError::NoCapacity).is_remote());
    }
}
