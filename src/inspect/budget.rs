//! Memory budget for variable traversal
//!
//! Two counters guard a traversal: nodes visited and estimated bytes. A
//! budget belongs to one adapter instance and is reset at the start of each
//! top-level listing, never in the middle of one.

use serde::Serialize;

use super::error::{InspectError, Suggestion};

/// Node and byte ceilings for one runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetLimits {
    pub max_nodes: usize,
    pub max_bytes: usize,
}

impl BudgetLimits {
    /// 20,000 nodes / 5 MiB
    pub const DEFAULT: Self = Self {
        max_nodes: 20_000,
        max_bytes: 5 * 1024 * 1024,
    };

    /// 50,000 nodes / 10 MiB, for runtimes with deep widget-tree values
    pub const LARGE: Self = Self {
        max_nodes: 50_000,
        max_bytes: 10 * 1024 * 1024,
    };

    /// Apply optional per-field overrides
    pub fn with_overrides(self, max_nodes: Option<usize>, max_bytes: Option<usize>) -> Self {
        Self {
            max_nodes: max_nodes.unwrap_or(self.max_nodes),
            max_bytes: max_bytes.unwrap_or(self.max_bytes),
        }
    }
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Which limit rejected a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LimitReason {
    NodeLimit,
    ByteLimit,
}

/// Headroom left in the budget
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Remaining {
    pub nodes: usize,
    pub bytes: usize,
    /// Worst-case usage across both counters, 0..=100
    pub percentage: f64,
}

/// Outcome of [`MemoryBudget::add_node`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Accepted(Remaining),
    Rejected {
        reason: LimitReason,
        remaining: Remaining,
    },
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Snapshot reported alongside a listing
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStatus {
    pub current_nodes: usize,
    pub current_bytes: usize,
    pub max_nodes: usize,
    pub max_bytes: usize,
    pub percent_nodes: f64,
    pub percent_bytes: f64,
    pub exhausted: bool,
}

#[derive(Debug, Clone)]
pub struct MemoryBudget {
    limits: BudgetLimits,
    current_nodes: usize,
    current_bytes: usize,
    exhausted: bool,
}

fn percent(current: usize, max: usize) -> f64 {
    if max == 0 {
        100.0
    } else {
        current as f64 / max as f64 * 100.0
    }
}

fn format_bytes(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.2}MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2}KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes}B")
    }
}

impl MemoryBudget {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            current_nodes: 0,
            current_bytes: 0,
            exhausted: false,
        }
    }

    pub fn limits(&self) -> BudgetLimits {
        self.limits
    }

    pub fn current_nodes(&self) -> usize {
        self.current_nodes
    }

    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    /// Either counter is at its ceiling
    pub fn is_exceeded(&self) -> bool {
        self.current_nodes >= self.limits.max_nodes || self.current_bytes >= self.limits.max_bytes
    }

    /// A node was rejected since the last reset
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn remaining(&self) -> Remaining {
        Remaining {
            nodes: self.limits.max_nodes.saturating_sub(self.current_nodes),
            bytes: self.limits.max_bytes.saturating_sub(self.current_bytes),
            percentage: percent(self.current_nodes, self.limits.max_nodes)
                .max(percent(self.current_bytes, self.limits.max_bytes)),
        }
    }

    /// Account for one more node of `bytes` estimated size
    ///
    /// The node limit is checked before the byte limit. Counters only move
    /// when the node is accepted.
    pub fn add_node(&mut self, bytes: usize) -> Admission {
        let before = self.remaining();

        let reason = if self.current_nodes >= self.limits.max_nodes {
            Some(LimitReason::NodeLimit)
        } else if self.current_bytes.saturating_add(bytes) > self.limits.max_bytes {
            Some(LimitReason::ByteLimit)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                self.exhausted = true;
                Admission::Rejected {
                    reason,
                    remaining: before,
                }
            }
            None => {
                self.current_nodes += 1;
                self.current_bytes += bytes;
                Admission::Accepted(self.remaining())
            }
        }
    }

    pub fn reset(&mut self) {
        self.current_nodes = 0;
        self.current_bytes = 0;
        self.exhausted = false;
    }

    pub fn status(&self) -> BudgetStatus {
        BudgetStatus {
            current_nodes: self.current_nodes,
            current_bytes: self.current_bytes,
            max_nodes: self.limits.max_nodes,
            max_bytes: self.limits.max_bytes,
            percent_nodes: percent(self.current_nodes, self.limits.max_nodes),
            percent_bytes: percent(self.current_bytes, self.limits.max_bytes),
            exhausted: self.exhausted,
        }
    }

    /// Human-readable advice about which limit was hit
    pub fn suggestion_text(&self) -> String {
        let node_limit = self.current_nodes >= self.limits.max_nodes;
        let byte_limit = self.current_bytes >= self.limits.max_bytes;
        let advice = "Stream the variables to a file instead.";

        match (node_limit, byte_limit) {
            (true, true) => format!(
                "Data exceeds both limits ({} nodes, {}). {advice}",
                self.current_nodes,
                format_bytes(self.current_bytes)
            ),
            (true, false) => format!(
                "Data exceeds node limit ({} nodes). {advice}",
                self.current_nodes
            ),
            (false, true) => format!(
                "Data exceeds size limit ({}). {advice}",
                format_bytes(self.current_bytes)
            ),
            (false, false) if self.exhausted => format!(
                "Traversal stopped near the size limit ({}). {advice}",
                format_bytes(self.current_bytes)
            ),
            (false, false) => "Stream the variables to a file for complete output.".to_string(),
        }
    }

    /// Streaming suggestion sized from the current byte count
    pub fn streaming_suggestion(&self) -> Suggestion {
        Suggestion::stream_to_file(self.current_bytes)
    }

    pub fn large_data_error(&self) -> InspectError {
        InspectError::large_data(self.current_nodes, self.current_bytes)
            .detail(self.suggestion_text())
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::new(BudgetLimits::DEFAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(nodes: usize, bytes: usize) -> MemoryBudget {
        MemoryBudget::new(BudgetLimits {
            max_nodes: nodes,
            max_bytes: bytes,
        })
    }

    #[test]
    fn test_accepts_until_node_limit() {
        let mut budget = small(2, 1000);
        assert!(budget.add_node(10).is_accepted());
        assert!(budget.add_node(10).is_accepted());

        match budget.add_node(10) {
            Admission::Rejected { reason, remaining } => {
                assert_eq!(reason, LimitReason::NodeLimit);
                assert_eq!(remaining.nodes, 0);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(budget.current_nodes(), 2);
        assert_eq!(budget.current_bytes(), 20);
        assert!(budget.is_exhausted());
    }

    #[test]
    fn test_byte_limit_rejects_without_counting() {
        let mut budget = small(100, 100);
        assert!(budget.add_node(60).is_accepted());

        let admission = budget.add_node(50);
        assert!(matches!(
            admission,
            Admission::Rejected {
                reason: LimitReason::ByteLimit,
                ..
            }
        ));
        assert_eq!(budget.current_nodes(), 1);
        assert_eq!(budget.current_bytes(), 60);
        // still below the ceiling, but the traversal knows it hit the wall
        assert!(!budget.is_exceeded());
        assert!(budget.is_exhausted());

        // a smaller node still fits exactly
        assert!(budget.add_node(40).is_accepted());
        assert!(budget.is_exceeded());
    }

    #[test]
    fn test_node_limit_checked_before_byte_limit() {
        let mut budget = small(1, 10);
        budget.add_node(5);
        match budget.add_node(500) {
            Admission::Rejected { reason, .. } => assert_eq!(reason, LimitReason::NodeLimit),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_remaining_reports_worst_case_percentage() {
        let mut budget = small(100, 1000);
        budget.add_node(500);
        let remaining = budget.remaining();
        assert_eq!(remaining.nodes, 99);
        assert_eq!(remaining.bytes, 500);
        assert!((remaining.percentage - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset_clears_counters_and_exhaustion() {
        let mut budget = small(1, 10);
        budget.add_node(5);
        budget.add_node(5);
        assert!(budget.is_exhausted());

        budget.reset();
        assert_eq!(budget.current_nodes(), 0);
        assert_eq!(budget.current_bytes(), 0);
        assert!(!budget.is_exhausted());
        assert!(budget.add_node(5).is_accepted());
    }

    #[test]
    fn test_suggestion_names_the_limit() {
        let mut budget = small(1, 1_000_000);
        budget.add_node(10);
        assert!(budget.suggestion_text().contains("node limit"));

        let mut bytes = small(100, 2048);
        bytes.add_node(2048);
        assert!(bytes.suggestion_text().contains("2.00KB"));
    }

    #[test]
    fn test_overrides_replace_individual_limits() {
        let limits = BudgetLimits::DEFAULT.with_overrides(None, Some(1024));
        assert_eq!(limits.max_nodes, 20_000);
        assert_eq!(limits.max_bytes, 1024);
    }
}
