//! # Parley Cluster
//!
//! Cluster management for the Parley coordinator providing:
//! - Role-partitioned node registry
//! - Reachability sweeps and dead-node eviction
//! - Two-phase commit across data-node participants
//! - Chatroom placement and load balancing
//! - Client-facing operation handlers

pub mod cleaner;
pub mod coordinator;
pub mod ops;
pub mod placement;
pub mod registry;
pub mod transport;
pub mod two_phase;
pub mod wire;

// Re-exports from registry
pub use registry::{NodeRegistry, RegistryEvent};

// Re-exports from cleaner
pub use cleaner::Cleaner;

// Re-exports from coordinator
pub use coordinator::TxnCoordinator;

// Re-exports from two_phase
pub use two_phase::TwoPhaseEngine;

// Re-exports from placement
pub use placement::{Placement, PlacementOutcome};

// Re-exports from ops
pub use ops::Operations;

// Re-exports from transport
pub use transport::{FakeNode, InMemoryRpc, NodeRpc, RpcCall, TcpRpc};

// Re-exports from wire
pub use wire::{read_frame, write_frame, ClientReply, ClientRequest, NodeRequest, NodeResponse};
