//! Inspection parameters and results

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dap::{Variable, VariablesFilter};

use super::budget::BudgetStatus;
use super::error::Suggestion;

/// Why a variable's subtree was cut short
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TruncationReason {
    MaxDepth,
    Budget,
    MaxChildren,
}

/// How a cycle was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CycleMethod {
    /// Reference already present on the ancestor path
    Reference,
    /// Runtime identity comparison against a recent ancestor
    Identity,
}

/// A variable enriched with traversal results
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedVariable {
    #[serde(flatten)]
    pub variable: Variable,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<EnhancedVariable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children_shown: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_children: Option<usize>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub children_truncated: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated_reason: Option<TruncationReason>,
    pub expandable: bool,
    /// Needs an explicit follow-up call to expand
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub lazy: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cycle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_via: Option<CycleMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_target: Option<String>,
    /// Value before the engine rewrote it for display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EnhancedVariable {
    /// Wrap a protocol variable without traversing it
    pub fn unexpanded(variable: Variable) -> Self {
        let expandable = variable.variables_reference != 0;
        Self {
            variable,
            children: Vec::new(),
            children_shown: None,
            total_children: None,
            children_truncated: false,
            truncated: false,
            truncated_reason: None,
            expandable,
            lazy: false,
            cycle: false,
            cycle_via: None,
            cycle_target: None,
            original_value: None,
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.variable.name
    }

    pub fn value(&self) -> &str {
        &self.variable.value
    }

    pub fn reference(&self) -> i64 {
        self.variable.variables_reference
    }

    pub(crate) fn truncate(mut self, reason: TruncationReason) -> Self {
        self.truncated = true;
        self.truncated_reason = Some(reason);
        self
    }

    /// Find a direct child by name
    pub fn child(&self, name: &str) -> Option<&EnhancedVariable> {
        self.children.iter().find(|c| c.name() == name)
    }

    /// Walk a dotted path of child names
    pub fn descendant(&self, path: &str) -> Option<&EnhancedVariable> {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Nodes in this subtree, including itself
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Self::node_count).sum::<usize>()
    }
}

/// Canonical scope kind after per-runtime classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Local,
    Closure,
    Global,
    Other,
}

/// Which scopes a listing includes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeFilter {
    #[default]
    All,
    Local,
    Closure,
    Global,
}

impl ScopeFilter {
    pub fn admits(&self, kind: ScopeKind) -> bool {
        match self {
            Self::All => true,
            Self::Local => kind == ScopeKind::Local,
            Self::Closure => kind == ScopeKind::Closure,
            Self::Global => kind == ScopeKind::Global,
        }
    }
}

impl FromStr for ScopeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "local" | "locals" => Ok(Self::Local),
            "closure" => Ok(Self::Closure),
            "global" | "globals" => Ok(Self::Global),
            other => Err(format!(
                "unknown scope filter '{other}' (expected all, local, closure or global)"
            )),
        }
    }
}

impl fmt::Display for ScopeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::All => "all",
            Self::Local => "local",
            Self::Closure => "closure",
            Self::Global => "global",
        };
        f.write_str(name)
    }
}

/// Parameters for `list_variables`; unset fields fall back to config
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ListVariablesParams {
    pub max_depth: Option<usize>,
    pub max_children: Option<usize>,
    pub include_expensive: Option<bool>,
    pub scope_filter: ScopeFilter,
    pub thread_id: Option<i64>,
    pub frame_id: Option<i64>,
}

/// Parameters for `get_variable_children`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChildrenParams {
    pub reference: i64,
    pub start: Option<usize>,
    pub count: Option<usize>,
    pub filter: Option<VariablesFilter>,
}

/// Parameters for `set_variable`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SetVariableParams {
    /// Variable name, or an access path for the expression tiers
    pub name: String,
    pub value: String,
    /// Container holding the variable, for a direct set
    pub reference: Option<i64>,
    pub frame_id: Option<i64>,
}

/// Which mutation path produced the new value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationTier {
    SetVariable,
    SetExpression,
    Evaluate,
}

/// Successful mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetVariableOutcome {
    pub value: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub reference: i64,
    pub tier: MutationTier,
}

/// Parameters for `stream_variables`
#[derive(Debug, Clone, Default)]
pub struct StreamParams {
    pub output_path: std::path::PathBuf,
    pub list: ListVariablesParams,
}

/// Summary of a streaming run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamOutcome {
    pub output_path: std::path::PathBuf,
    pub variable_count: usize,
    pub byte_count: usize,
    pub truncated_count: usize,
}

/// Evaluation result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateOutcome {
    pub result: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub reference: i64,
}

/// One scope of a listing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeListing {
    pub name: String,
    pub kind: ScopeKind,
    pub expensive: bool,
    pub writable: bool,
    pub reference: i64,
    pub variables: Vec<EnhancedVariable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of `list_variables`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableListing {
    pub thread_id: i64,
    pub frame_id: i64,
    pub scopes: Vec<ScopeListing>,
    pub budget: BudgetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<Suggestion>,
}

impl VariableListing {
    /// Top-level variables across every listed scope
    pub fn variables(&self) -> impl Iterator<Item = &EnhancedVariable> {
        self.scopes.iter().flat_map(|s| s.variables.iter())
    }

    /// First top-level variable named `name`
    pub fn find(&self, name: &str) -> Option<&EnhancedVariable> {
        self.variables().find(|v| v.name() == name)
    }

    pub fn scope(&self, name: &str) -> Option<&ScopeListing> {
        self.scopes.iter().find(|s| s.name == name)
    }
}
