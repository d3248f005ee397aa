//! # Parley Common
//!
//! Common types, errors, and configuration shared across all Parley crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::{Error, Result};
pub use types::*;

/// Re-export commonly used external types
pub mod prelude {
    pub use super::config::*;
    pub use super::error::{Error, PlacementError, Result, TransactionError};
    pub use super::types::*;
    pub use async_trait::async_trait;
    pub use tracing::{debug, error, info, trace, warn};
}
