//! Dart VM through the Dart Debug Service
//!
//! Flutter widget trees are deep, so Dart runs with the larger budget.

use async_trait::async_trait;

use crate::dap::Variable;
use crate::inspect::budget::BudgetLimits;
use crate::inspect::capabilities::CapabilityDescriptor;
use crate::inspect::variable::ScopeKind;

use super::{
    is_index, LiteralSpelling, RuntimeHooks, RuntimeInfo, ScopeClass, ThreadSelection,
};

pub static INFO: RuntimeInfo = RuntimeInfo {
    id: "dart",
    name: "Dart DDS",
    session_types: &["dart"],
    description: "Dart and Flutter through the Dart Debug Service",
};

static LITERALS: LiteralSpelling = LiteralSpelling {
    interpolating_strings: true,
    ..LiteralSpelling::c_family("double.nan", "double.infinity", "double.negativeInfinity")
};

/// Values the VM reports in place of a variable it cannot read
const SENTINELS: [&str; 3] = ["<not initialized>", "<optimized out>", "<unavailable>"];

pub struct DartHooks;

fn is_sentinel(value: &str) -> bool {
    let lower = value.to_lowercase();
    SENTINELS.iter().any(|s| lower.contains(s))
}

/// Record positional field such as `$1`
fn is_positional(name: &str) -> bool {
    name.strip_prefix('$').is_some_and(is_index)
}

#[async_trait]
impl RuntimeHooks for DartHooks {
    fn info(&self) -> &RuntimeInfo {
        &INFO
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::STANDARD
    }

    fn budget_limits(&self) -> BudgetLimits {
        BudgetLimits::LARGE
    }

    // Only the isolate that hit the breakpoint pauses
    fn thread_selection(&self) -> ThreadSelection {
        ThreadSelection::CachedThenScan {
            fallback_to_first: false,
        }
    }

    fn classify_scope(&self, raw_kind: &str) -> Option<ScopeClass> {
        match raw_kind {
            "locals" | "local" => Some(ScopeClass::new(ScopeKind::Local, false, true)),
            "closure" => Some(ScopeClass::new(ScopeKind::Closure, false, true)),
            "globals" | "global" => Some(ScopeClass::new(ScopeKind::Global, true, false)),
            _ => None,
        }
    }

    fn special_value(&self, variable: &Variable) -> Option<String> {
        is_sentinel(&variable.value).then(|| format!("{} (not inspectable)", variable.value))
    }

    fn child_evaluate_path(&self, parent: &Variable, child: &Variable) -> Option<String> {
        if let Some(path) = &child.evaluate_name {
            return Some(path.clone());
        }
        let base = parent.evaluate_name.as_deref()?;
        let is_map = parent.type_name.as_deref().is_some_and(|t| t.contains("Map"));

        if is_positional(&child.name) || is_map || is_index(&child.name) {
            Some(format!("{base}[{}]", child.name))
        } else {
            Some(format!("{base}.{}", child.name))
        }
    }

    fn literals(&self) -> &LiteralSpelling {
        &LITERALS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(type_name: &str) -> Variable {
        Variable {
            type_name: Some(type_name.to_string()),
            evaluate_name: Some("p".to_string()),
            ..Variable::leaf("p", "")
        }
    }

    #[test]
    fn test_sentinels_are_special() {
        let hooks = DartHooks;
        let late = Variable {
            variables_reference: 3,
            ..Variable::leaf("config", "<not initialized>")
        };
        assert_eq!(
            hooks.special_value(&late).as_deref(),
            Some("<not initialized> (not inspectable)")
        );
        assert!(hooks.special_value(&Variable::leaf("x", "<Optimized Out>")).is_some());
        assert!(hooks.special_value(&Variable::leaf("x", "3")).is_none());
    }

    #[test]
    fn test_child_paths_use_brackets_where_needed() {
        let hooks = DartHooks;
        let record = parent("(int, String)");
        assert_eq!(
            hooks.child_evaluate_path(&record, &Variable::leaf("$1", "1")).as_deref(),
            Some("p[$1]")
        );
        assert_eq!(
            hooks
                .child_evaluate_path(&parent("Map<String, int>"), &Variable::leaf("\"a\"", "1"))
                .as_deref(),
            Some("p[\"a\"]")
        );
        assert_eq!(
            hooks.child_evaluate_path(&parent("List<int>"), &Variable::leaf("0", "1")).as_deref(),
            Some("p[0]")
        );
        assert_eq!(
            hooks.child_evaluate_path(&parent("User"), &Variable::leaf("name", "'a'")).as_deref(),
            Some("p.name")
        );
    }

    #[test]
    fn test_uses_large_budget() {
        assert_eq!(DartHooks.budget_limits(), BudgetLimits::LARGE);
    }
}
