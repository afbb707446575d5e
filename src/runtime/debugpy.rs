//! CPython through debugpy
//!
//! Attribute access in Python can run arbitrary getters, so before expanding
//! a dotted attribute the hooks ask the interpreter whether the attribute is
//! a `property` descriptor. `inspect.getattr_static` reads the descriptor off
//! the type without invoking it.

use async_trait::async_trait;

use crate::dap::Variable;
use crate::inspect::capabilities::CapabilityDescriptor;
use crate::inspect::mutation::is_safe_path;
use crate::inspect::variable::ScopeKind;

use super::{
    has_side_effect_hint, is_identifier, LiteralSpelling, Probe, RuntimeHooks, RuntimeInfo,
    ScopeClass, ThreadSelection,
};

pub static INFO: RuntimeInfo = RuntimeInfo {
    id: "debugpy",
    name: "debugpy",
    session_types: &["debugpy"],
    description: "CPython through Microsoft's debugpy",
};

static LITERALS: LiteralSpelling = LiteralSpelling {
    nan: "float('nan')",
    infinity: "float('inf')",
    neg_infinity: "float('-inf')",
    null: "None",
    true_: "True",
    false_: "False",
    undefined: None,
    bigint: false,
    interpolating_strings: false,
};

const SPECIAL_TYPES: [&str; 3] = ["async_generator", "generator", "coroutine"];

pub struct DebugpyHooks;

/// Expression testing whether `path` names a `property` on its owner's type
///
/// `None` when the path is not a plain `owner.attr` access that is safe to
/// interpolate.
pub fn property_probe(path: &str) -> Option<String> {
    let (owner, attr) = path.rsplit_once('.')?;
    if !is_identifier(attr) || !is_safe_path(owner) {
        return None;
    }
    Some(format!(
        "import inspect\nisinstance(inspect.getattr_static(type({owner}), '{attr}', None), property)"
    ))
}

fn is_special(variable: &Variable) -> bool {
    let type_name = variable.type_name.as_deref().unwrap_or("");
    SPECIAL_TYPES
        .iter()
        .any(|t| type_name.contains(t) || variable.value.contains(&format!("<{t}")))
}

#[async_trait]
impl RuntimeHooks for DebugpyHooks {
    fn info(&self) -> &RuntimeInfo {
        &INFO
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::STANDARD
    }

    fn thread_selection(&self) -> ThreadSelection {
        ThreadSelection::First
    }

    fn classify_scope(&self, raw_kind: &str) -> Option<ScopeClass> {
        match raw_kind {
            "locals" | "local" => Some(ScopeClass::new(ScopeKind::Local, false, true)),
            "globals" | "global" => Some(ScopeClass::new(ScopeKind::Global, false, true)),
            _ => None,
        }
    }

    fn special_value(&self, variable: &Variable) -> Option<String> {
        is_special(variable).then(|| format!("{} (exhaustible/non-inspectable)", variable.value))
    }

    async fn detect_side_effect(&self, variable: &Variable, probe: &Probe<'_>) -> bool {
        if has_side_effect_hint(variable) {
            return true;
        }
        let Some(expr) = variable.evaluate_name.as_deref().and_then(property_probe) else {
            return false;
        };

        // A failed probe counts as "not a property"
        match probe.evaluate(&expr, "watch").await {
            Ok(body) => body.result == "True",
            Err(e) => {
                tracing::debug!(path = ?variable.evaluate_name, error = %e, "Property probe failed");
                false
            }
        }
    }

    fn literals(&self) -> &LiteralSpelling {
        &LITERALS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, ScriptedChannel};
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_property_probe_rejects_unsafe_paths() {
        let expr = property_probe("order.total").unwrap();
        assert!(expr.contains("getattr_static(type(order), 'total', None)"));
        assert!(property_probe("items[0].name").is_some());
        assert!(property_probe("total").is_none());
        assert!(property_probe("__import__('os').system").is_none());
        assert!(property_probe("a.b'c").is_none());
    }

    #[test]
    fn test_generators_are_special() {
        let hooks = DebugpyHooks;
        let gen = Variable {
            type_name: Some("generator".to_string()),
            variables_reference: 4,
            ..Variable::leaf("g", "<generator object count at 0x7f>")
        };
        assert_eq!(
            hooks.special_value(&gen).as_deref(),
            Some("<generator object count at 0x7f> (exhaustible/non-inspectable)")
        );
        let coro = Variable::leaf("c", "<coroutine object fetch at 0x1>");
        assert!(hooks.special_value(&coro).is_some());
        assert!(hooks.special_value(&Variable::leaf("l", "[1, 2]")).is_none());
    }

    #[tokio::test]
    async fn test_property_probe_marks_side_effects() {
        let channel = ScriptedChannel::builder()
            .evaluate_result(
                "import inspect\nisinstance(inspect.getattr_static(type(order), 'total', None), property)",
                "True",
            )
            .build();
        let token = CancellationToken::new();
        let probe = Probe::new(&channel, &token, Some(1));
        let hooks = DebugpyHooks;

        let total = Variable {
            evaluate_name: Some("order.total".to_string()),
            ..Variable::leaf("total", "42")
        };
        assert!(hooks.detect_side_effect(&total, &probe).await);

        // unknown expression fails in the fake, which means "not a property"
        let items = Variable {
            evaluate_name: Some("order.items".to_string()),
            ..Variable::leaf("items", "[]")
        };
        assert!(!hooks.detect_side_effect(&items, &probe).await);

        let evaluates = channel
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Evaluate { context, .. } if context == "watch"))
            .count();
        assert_eq!(evaluates, 2);
    }
}
