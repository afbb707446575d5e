//! Scripted sessions and scenario tests
//!
//! [`ScriptedChannel`] stands in for a live adapter. The scenario runner
//! reads YAML descriptions of a paused debuggee and drives the inspection
//! core against it, asserting on structured results.

mod channel;
mod config;
mod runner;

pub use channel::{Call, ScriptedChannel, ScriptedChannelBuilder, LOCAL_SCOPE_REF};
pub use config::*;
pub use runner::{build_channel, load_scenario, run_loaded, run_scenario, TestResult};
