//! Test scenario configuration types
//!
//! Defines the data structures for deserializing YAML test scenarios. A
//! scenario describes a paused debuggee (threads, frames, scopes and nested
//! variables) and a sequence of inspection steps with expectations.

use std::collections::HashMap;

use serde::Deserialize;

use crate::common::config::BudgetOverride;
use crate::inspect::variable::ScopeFilter;

/// A complete test scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct TestScenario {
    /// Name of the test scenario
    pub name: String,
    /// Optional description of what the test verifies
    pub description: Option<String>,
    /// Session type the scripted session reports (e.g. "pwa-node", "debugpy")
    pub session_type: String,
    /// Overrides for the inspection defaults
    #[serde(default)]
    pub inspection: InspectionOverrides,
    /// Memory budget override for this session
    pub budget: Option<BudgetOverride>,
    /// The paused program the steps run against
    pub debuggee: DebuggeeConfig,
    /// The sequence of test steps to execute
    pub steps: Vec<TestStep>,
}

/// Partial inspection settings; unset fields keep their defaults
#[derive(Deserialize, Debug, Default)]
pub struct InspectionOverrides {
    pub max_depth: Option<usize>,
    pub max_children: Option<usize>,
    pub include_expensive: Option<bool>,
    pub lock_timeout_secs: Option<u64>,
    pub max_identity_failures: Option<u32>,
}

/// Scripted debuggee state
#[derive(Deserialize, Debug, Default)]
pub struct DebuggeeConfig {
    #[serde(default)]
    pub threads: Vec<ThreadConfig>,
    /// Fixed results for exact expressions
    #[serde(default)]
    pub evaluate: HashMap<String, String>,
    /// Pairs of references that denote the same object
    #[serde(default)]
    pub aliases: HashMap<i64, i64>,
    /// Request verbs that always fail
    #[serde(default)]
    pub fail: Vec<String>,
    /// Latency added to every request, in milliseconds
    pub delay_ms: Option<u64>,
}

#[derive(Deserialize, Debug)]
pub struct ThreadConfig {
    pub id: i64,
    #[serde(default = "default_thread_name")]
    pub name: String,
    #[serde(default)]
    pub frames: Vec<FrameConfig>,
}

fn default_thread_name() -> String {
    "main".to_string()
}

#[derive(Deserialize, Debug)]
pub struct FrameConfig {
    pub id: i64,
    pub name: String,
    /// Source path; frames without one count as framework code
    pub source: Option<String>,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub scopes: Vec<ScopeConfig>,
}

#[derive(Deserialize, Debug)]
pub struct ScopeConfig {
    pub name: String,
    /// Explicit reference; assigned automatically when omitted
    #[serde(rename = "ref")]
    pub reference: Option<i64>,
    #[serde(default)]
    pub expensive: bool,
    pub presentation_hint: Option<String>,
    #[serde(default)]
    pub variables: Vec<VariableConfig>,
}

/// A variable and, recursively, its children
#[derive(Deserialize, Debug)]
pub struct VariableConfig {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    /// Explicit reference. A variable with a reference and no children
    /// points at a container defined elsewhere, which is how cycles are
    /// written.
    #[serde(rename = "ref")]
    pub reference: Option<i64>,
    pub evaluate_name: Option<String>,
    pub named: Option<i64>,
    pub indexed: Option<i64>,
    /// Presentation hint kind, e.g. "property"
    pub kind: Option<String>,
    /// Presentation hint attributes, e.g. ["hasSideEffects"]
    #[serde(default)]
    pub attributes: Vec<String>,
    pub lazy: Option<bool>,
    #[serde(default)]
    pub children: Vec<VariableConfig>,
}

/// A single test step in the execution flow
#[derive(Deserialize, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// List the variables of the paused frame
    ListVariables {
        #[serde(default)]
        params: ListParams,
        #[serde(default)]
        expect: ListExpectation,
    },
    /// Fetch one page of a container's children
    GetChildren {
        reference: i64,
        start: Option<usize>,
        count: Option<usize>,
        filter: Option<String>,
        #[serde(default)]
        expect: ChildrenExpectation,
    },
    /// Change a variable's value
    SetVariable {
        name: String,
        value: String,
        reference: Option<i64>,
        frame_id: Option<i64>,
        #[serde(default)]
        expect: SetExpectation,
    },
    /// Evaluate an expression
    Evaluate {
        expression: String,
        frame_id: Option<i64>,
        #[serde(default)]
        expect: EvaluateExpectation,
    },
    /// Deliver a session lifecycle event
    Event {
        /// stopped, continued, stack_item_changed, breakpoints_changed,
        /// invalidated or terminated
        event: String,
        thread_id: Option<i64>,
        /// Also drop every reference on the debuggee side, as a real
        /// adapter does when execution resumes
        #[serde(default)]
        forget_references: bool,
    },
    /// Issue the same listing several times at once
    Concurrent {
        count: usize,
        #[serde(default)]
        params: ListParams,
        /// How many of the calls must come back `E_BUSY`
        busy: Option<usize>,
        /// How many of the calls must succeed
        succeeded: Option<usize>,
    },
}

/// Listing parameters as written in YAML
#[derive(Deserialize, Debug, Default, Clone)]
pub struct ListParams {
    pub max_depth: Option<usize>,
    pub max_children: Option<usize>,
    pub include_expensive: Option<bool>,
    #[serde(default)]
    pub scope: ScopeFilter,
    pub thread_id: Option<i64>,
    pub frame_id: Option<i64>,
}

/// Expectations shared by every step
#[derive(Deserialize, Debug, Default)]
pub struct CommonExpectation {
    /// Expected error code (e.g. "E_BUSY"); the step must fail with it
    pub error: Option<String>,
    /// Exact number of channel calls per verb made by this step
    #[serde(default)]
    pub calls: HashMap<String, usize>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ListExpectation {
    #[serde(flatten)]
    pub common: CommonExpectation,
    /// Number of top-level variables across every listed scope
    pub top_level: Option<usize>,
    pub budget_exhausted: Option<bool>,
    /// A streaming suggestion must (or must not) be attached
    pub suggestion: Option<bool>,
    #[serde(default)]
    pub scopes: Vec<ScopeAssertion>,
    #[serde(default)]
    pub variables: Vec<VariableAssertion>,
}

/// Assertion for one scope of a listing
#[derive(Deserialize, Debug)]
pub struct ScopeAssertion {
    pub name: String,
    /// Whether the scope is listed at all (default: true)
    pub present: Option<bool>,
    pub kind: Option<String>,
    pub expensive: Option<bool>,
    pub writable: Option<bool>,
    /// The scope failed to load and carries error text
    pub error: Option<bool>,
}

/// Assertion for a variable, addressed by a dotted path of names
#[derive(Deserialize, Debug)]
pub struct VariableAssertion {
    pub path: String,
    /// Whether the variable appears at all (default: true)
    pub present: Option<bool>,
    /// Expected value (exact match)
    pub value: Option<String>,
    /// Expected value substring (partial match)
    pub value_contains: Option<String>,
    /// Expected type name
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub truncated: Option<bool>,
    /// Expected truncation reason (maxDepth, budget)
    pub reason: Option<String>,
    pub cycle: Option<bool>,
    pub lazy: Option<bool>,
    pub expandable: Option<bool>,
    /// Number of expanded children present
    pub children: Option<usize>,
    pub total_children: Option<usize>,
    pub evaluate_name: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ChildrenExpectation {
    #[serde(flatten)]
    pub common: CommonExpectation,
    pub count: Option<usize>,
    /// Names in order
    pub names: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default)]
pub struct SetExpectation {
    #[serde(flatten)]
    pub common: CommonExpectation,
    pub value: Option<String>,
    /// Mutation tier that must have succeeded (setVariable, setExpression, evaluate)
    pub tier: Option<String>,
    /// The evaluate call the last tier sent, if any
    pub assignment: Option<String>,
}

/// Expectations for an evaluate result
#[derive(Deserialize, Debug, Default)]
pub struct EvaluateExpectation {
    #[serde(flatten)]
    pub common: CommonExpectation,
    /// Expected result value
    pub result: Option<String>,
    /// Expected result substring
    pub result_contains: Option<String>,
    /// Expected type name
    #[serde(rename = "type")]
    pub type_name: Option<String>,
}
