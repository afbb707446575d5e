//! Variable expansion engine
//!
//! Walks a variable's subtree through the channel, depth first, under a
//! shared memory budget. Each node is checked in this order before any
//! children are fetched:
//!
//! - leaf (no reference): returned untouched
//! - special value (runtime hook): rewritten, never traversed
//! - depth limit
//! - side-effect prone (runtime hook): left lazy
//! - cycle, by reference on the ancestor path, then by runtime identity
//! - budget already exhausted
//!
//! Cancellation is polled before every node and every child fetch.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::common::{Error, Result};
use crate::dap::{Variable, VariablesArguments, VariablesFilter};
use crate::runtime::{Probe, RuntimeHooks};

use super::budget::{Admission, MemoryBudget};
use super::capabilities::CapabilityDescriptor;
use super::channel::{cancellable, check_cancel, DebugChannel};
use super::variable::{CycleMethod, EnhancedVariable, TruncationReason};

/// Display value of a node that closes a cycle
pub const CIRCULAR: &str = "[Circular Reference]";

/// Evaluate context for identity comparisons
const IDENTITY_CONTEXT: &str = "hover";

/// Cache key for one `variables` request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildrenKey {
    pub reference: i64,
    pub filter: Option<VariablesFilter>,
    pub start: Option<usize>,
    pub count: Option<usize>,
}

impl ChildrenKey {
    pub fn arguments(&self) -> VariablesArguments {
        VariablesArguments {
            variables_reference: self.reference,
            filter: self.filter,
            start: self.start.map(|s| s as i64),
            count: self.count.map(|c| c as i64),
        }
    }
}

/// Per-pause state shared by every traversal of one session
#[derive(Debug, Default)]
pub struct TraversalCache {
    pub children: HashMap<ChildrenKey, Vec<Variable>>,
    /// Consecutive identity-check failures per evaluate path
    pub identity_failures: HashMap<String, u32>,
    /// Every container reference handed to a caller since the last pause
    pub issued: HashSet<i64>,
}

impl TraversalCache {
    pub fn clear(&mut self) {
        self.children.clear();
        self.identity_failures.clear();
        self.issued.clear();
    }
}

/// Fetch children through the cache
pub async fn fetch_children(
    channel: &dyn DebugChannel,
    cache: &Mutex<TraversalCache>,
    token: &CancellationToken,
    key: ChildrenKey,
) -> Result<Vec<Variable>> {
    let cached = cache.lock().children.get(&key).cloned();
    if let Some(hit) = cached {
        return Ok(hit);
    }

    let children = cancellable(token, channel.variables(key.arguments())).await?;

    let mut cache = cache.lock();
    cache.issued.extend(
        children
            .iter()
            .map(|c| c.variables_reference)
            .filter(|r| *r > 0),
    );
    cache.children.insert(key, children.clone());
    Ok(children)
}

/// Limits applied to one traversal
#[derive(Debug, Clone, Copy)]
pub struct ExpandOptions {
    pub max_depth: usize,
    pub max_children: usize,
    /// How many of the nearest ancestors an identity check compares against
    pub identity_ancestors: usize,
    pub max_identity_failures: u32,
}

/// Ancestor on the current traversal path
#[derive(Debug, Clone)]
pub struct Ancestor {
    reference: i64,
    name: String,
    evaluate_name: Option<String>,
}

impl Ancestor {
    fn of(variable: &Variable) -> Self {
        Self {
            reference: variable.variables_reference,
            name: variable.name.clone(),
            evaluate_name: variable.evaluate_name.clone(),
        }
    }

    fn label(&self) -> &str {
        self.evaluate_name.as_deref().unwrap_or(&self.name)
    }
}

fn mark_cycle(mut node: EnhancedVariable, via: CycleMethod, target: &Ancestor) -> EnhancedVariable {
    node.original_value = Some(std::mem::replace(
        &mut node.variable.value,
        CIRCULAR.to_string(),
    ));
    node.cycle = true;
    node.cycle_via = Some(via);
    node.cycle_target = Some(target.label().to_string());
    node.expandable = false;
    node
}

/// One traversal over a paused frame
pub struct Expander<'a> {
    pub channel: &'a dyn DebugChannel,
    pub hooks: &'a dyn RuntimeHooks,
    pub caps: CapabilityDescriptor,
    pub budget: &'a Mutex<MemoryBudget>,
    pub cache: &'a Mutex<TraversalCache>,
    pub token: &'a CancellationToken,
    pub frame_id: Option<i64>,
    pub options: ExpandOptions,
}

impl<'a> Expander<'a> {
    fn probe(&self) -> Probe<'_> {
        Probe::new(self.channel, self.token, self.frame_id)
    }

    /// Expand the variables of one scope
    ///
    /// Every input variable yields an entry. Once the budget has rejected a
    /// node, remaining entries are marked truncated without fetching.
    pub async fn expand_all(&self, variables: Vec<Variable>) -> Result<Vec<EnhancedVariable>> {
        let mut out = Vec::with_capacity(variables.len());

        for variable in variables {
            check_cancel(self.token)?;

            let admitted = {
                let mut budget = self.budget.lock();
                !budget.is_exhausted()
                    && budget.add_node(self.hooks.estimate_size(&variable)).is_accepted()
            };
            if !admitted {
                out.push(EnhancedVariable::unexpanded(variable).truncate(TruncationReason::Budget));
                continue;
            }

            out.push(self.expand(variable, 1, &[]).await?);
        }
        Ok(out)
    }

    /// Expand one variable found at `depth`
    #[async_recursion::async_recursion]
    pub async fn expand(
        &self,
        variable: Variable,
        depth: usize,
        ancestors: &[Ancestor],
    ) -> Result<EnhancedVariable> {
        check_cancel(self.token)?;

        if variable.variables_reference == 0 {
            return Ok(EnhancedVariable::unexpanded(variable));
        }

        if let Some(display) = self.hooks.special_value(&variable) {
            let mut node = EnhancedVariable::unexpanded(variable);
            node.original_value = Some(std::mem::replace(&mut node.variable.value, display));
            node.variable.variables_reference = 0;
            node.expandable = false;
            return Ok(node);
        }

        if depth >= self.options.max_depth {
            return Ok(EnhancedVariable::unexpanded(variable).truncate(TruncationReason::MaxDepth));
        }

        if self.hooks.detect_side_effect(&variable, &self.probe()).await {
            check_cancel(self.token)?;
            let mut node = EnhancedVariable::unexpanded(variable);
            node.lazy = true;
            node.expandable = true;
            return Ok(node);
        }

        if let Some(ancestor) = ancestors
            .iter()
            .find(|a| a.reference == variable.variables_reference)
        {
            let node = EnhancedVariable::unexpanded(variable);
            return Ok(mark_cycle(node, CycleMethod::Reference, ancestor));
        }

        if let Some(ancestor) = self.identity_cycle(&variable, ancestors).await? {
            let node = EnhancedVariable::unexpanded(variable);
            return Ok(mark_cycle(node, CycleMethod::Identity, &ancestor));
        }

        if self.budget.lock().is_exhausted() {
            return Ok(EnhancedVariable::unexpanded(variable).truncate(TruncationReason::Budget));
        }

        self.expand_children(variable, depth, ancestors).await
    }

    async fn expand_children(
        &self,
        variable: Variable,
        depth: usize,
        ancestors: &[Ancestor],
    ) -> Result<EnhancedVariable> {
        let key = ChildrenKey {
            reference: variable.variables_reference,
            filter: None,
            start: None,
            count: Some(self.options.max_children),
        };

        let mut fetched = match fetch_children(self.channel, self.cache, self.token, key).await {
            Ok(children) => children,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                tracing::debug!(reference = variable.variables_reference, error = %e, "Child fetch failed");
                let mut node = EnhancedVariable::unexpanded(variable);
                node.error = Some(e.to_string());
                node.expandable = true;
                return Ok(node);
            }
        };

        let fetched_len = fetched.len();
        let declared = variable.declared_children();
        fetched.truncate(self.options.max_children);

        let mut path = ancestors.to_vec();
        path.push(Ancestor::of(&variable));

        let mut children = Vec::with_capacity(fetched.len());
        let mut out_of_budget = false;

        for mut child in fetched {
            check_cancel(self.token)?;

            if child.evaluate_name.is_none() {
                child.evaluate_name = self.hooks.child_evaluate_path(&variable, &child);
            }

            let admission = {
                let mut budget = self.budget.lock();
                if budget.is_exhausted() {
                    None
                } else {
                    Some(budget.add_node(self.hooks.estimate_size(&child)))
                }
            };
            match admission {
                Some(Admission::Accepted(_)) => {}
                Some(Admission::Rejected { reason, .. }) => {
                    tracing::debug!(
                        reference = variable.variables_reference,
                        ?reason,
                        shown = children.len(),
                        "Budget stopped expansion"
                    );
                    out_of_budget = true;
                    break;
                }
                None => {
                    // a deeper level already ran out
                    out_of_budget = true;
                    break;
                }
            }

            let expanded = self.expand(child, depth + 1, &path).await?;
            if expanded.truncated_reason == Some(TruncationReason::Budget) {
                out_of_budget = true;
            }
            children.push(expanded);
        }

        let total = declared.unwrap_or(fetched_len).max(fetched_len);
        let mut node = EnhancedVariable::unexpanded(variable);
        node.children_shown = Some(children.len());
        node.total_children = Some(total);
        node.children_truncated = total > fetched_len || fetched_len > self.options.max_children;
        node.children = children;

        Ok(if out_of_budget {
            node.truncate(TruncationReason::Budget)
        } else {
            node
        })
    }

    /// Compare `variable` against its nearest ancestors by runtime identity
    ///
    /// Paths that keep failing to evaluate are skipped after
    /// `max_identity_failures` attempts.
    async fn identity_cycle(
        &self,
        variable: &Variable,
        ancestors: &[Ancestor],
    ) -> Result<Option<Ancestor>> {
        if !self.caps.supports_identity_check {
            return Ok(None);
        }
        let Some(path) = variable.evaluate_name.as_deref() else {
            return Ok(None);
        };

        let limit = self.options.max_identity_failures;
        let probe = self.probe();

        for ancestor in ancestors.iter().rev().take(self.options.identity_ancestors) {
            if self.cache.lock().identity_failures.get(path).copied().unwrap_or(0) >= limit {
                return Ok(None);
            }
            let Some(other) = ancestor.evaluate_name.as_deref() else {
                continue;
            };
            let Some(expr) = self.hooks.identity_expression(path, other) else {
                return Ok(None);
            };

            match probe.evaluate(&expr, IDENTITY_CONTEXT).await {
                Ok(body) => {
                    self.cache.lock().identity_failures.remove(path);
                    if body.result == "true" {
                        return Ok(Some(ancestor.clone()));
                    }
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    let mut cache = self.cache.lock();
                    let failures = cache.identity_failures.entry(path.to_string()).or_insert(0);
                    *failures += 1;
                    if *failures == limit {
                        tracing::warn!(
                            path,
                            failures = *failures,
                            error = %e,
                            "Identity checks keep failing, skipping them for this path"
                        );
                    }
                }
            }
        }
        Ok(None)
    }
}
