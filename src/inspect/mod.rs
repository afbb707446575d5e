//! Variable inspection core
//!
//! Everything here runs against a [`DebugChannel`] and never against a
//! concrete adapter process, so the same code serves live sessions and
//! scripted tests.

pub mod adapter;
pub mod budget;
pub mod capabilities;
pub mod channel;
pub mod error;
pub mod expand;
pub mod factory;
pub mod lock;
pub mod mutation;
pub mod service;
pub mod sink;
pub mod variable;

pub use adapter::{RuntimeAdapter, SessionEvent, TRAVERSAL_KEY};
pub use budget::{BudgetLimits, BudgetStatus, MemoryBudget};
pub use capabilities::CapabilityDescriptor;
pub use channel::{DapChannel, DebugChannel, SessionInfo};
pub use error::{ErrorCode, InspectError, InspectResult, Suggestion};
pub use factory::AdapterFactory;
pub use lock::OperationLockManager;
pub use service::InspectionService;
pub use sink::{JsonlFileSink, VariableSink};
pub use variable::{
    ChildrenParams, EnhancedVariable, EvaluateOutcome, ListVariablesParams, ScopeFilter,
    ScopeKind, SetVariableOutcome, SetVariableParams, StreamOutcome, StreamParams,
    TruncationReason, VariableListing,
};
