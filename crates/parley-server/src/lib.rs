//! # Parley Server
//!
//! The coordinator binary's service layer: a framed TCP loop exposing the
//! client and node-registration surface over the wire protocol.

pub mod service;

pub use service::serve;
