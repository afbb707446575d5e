//! Runtime Inspector - variable inspection for paused debug sessions
//!
//! This library normalizes variable listing, expansion, assignment and
//! evaluation across Debug Adapter Protocol (DAP) runtimes, with cycle
//! detection, memory budgets and per-operation locking.

pub mod cli;
pub mod commands;
pub mod common;
pub mod dap;
pub mod inspect;
pub mod runtime;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use inspect::{InspectError, InspectResult, InspectionService, RuntimeAdapter};
