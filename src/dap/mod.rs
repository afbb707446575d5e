//! Debug Adapter Protocol (DAP) implementation
//!
//! Client side of DAP: framing, message types and a sequential request
//! client for adapter subprocesses.

pub mod client;
pub mod codec;
pub mod types;

pub use client::DapClient;
pub use types::*;
