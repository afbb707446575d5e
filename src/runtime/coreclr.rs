//! .NET runtime through netcoredbg / vsdbg

use async_trait::async_trait;

use crate::dap::Variable;
use crate::inspect::capabilities::CapabilityDescriptor;
use crate::inspect::variable::ScopeKind;

use super::{LiteralSpelling, RuntimeHooks, RuntimeInfo, ScopeClass, ThreadSelection};

pub static INFO: RuntimeInfo = RuntimeInfo {
    id: "coreclr",
    name: "CoreCLR",
    session_types: &["coreclr"],
    description: ".NET Core through netcoredbg or vsdbg",
};

static LITERALS: LiteralSpelling =
    LiteralSpelling::c_family("double.NaN", "double.PositiveInfinity", "double.NegativeInfinity");

/// Synthetic node that enumerates an `IEnumerable` when expanded
const RESULTS_VIEW: &str = "Results View";

pub struct CoreClrHooks;

#[async_trait]
impl RuntimeHooks for CoreClrHooks {
    fn info(&self) -> &RuntimeInfo {
        &INFO
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::STANDARD
    }

    fn thread_selection(&self) -> ThreadSelection {
        ThreadSelection::ScanForSource
    }

    fn classify_scope(&self, raw_kind: &str) -> Option<ScopeClass> {
        match raw_kind {
            "locals" | "local" | "arguments" => {
                Some(ScopeClass::new(ScopeKind::Local, false, true))
            }
            "registers" => Some(ScopeClass::new(ScopeKind::Other, false, false)),
            _ => None,
        }
    }

    fn estimate_size(&self, variable: &Variable) -> usize {
        let path = variable.evaluate_name.as_deref().map_or(0, |p| p.len() * 2);
        super::base_size(variable) + path
    }

    fn special_value(&self, variable: &Variable) -> Option<String> {
        (variable.name == RESULTS_VIEW)
            .then(|| format!("{} (enumerates the sequence when expanded)", variable.value))
    }

    fn literals(&self) -> &LiteralSpelling {
        &LITERALS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_view_is_never_traversed() {
        let hooks = CoreClrHooks;
        let view = Variable {
            variables_reference: 12,
            ..Variable::leaf("Results View", "Expanding will enumerate")
        };
        assert!(hooks.special_value(&view).is_some());
        assert!(hooks.special_value(&Variable::leaf("items", "Count = 3")).is_none());
    }

    #[test]
    fn test_registers_are_read_only() {
        let hooks = CoreClrHooks;
        assert!(hooks.classify_scope("locals").unwrap().writable);
        assert!(!hooks.classify_scope("registers").unwrap().writable);
        assert!(hooks.classify_scope("statics").is_none());
    }

    #[test]
    fn test_size_includes_evaluate_path() {
        let hooks = CoreClrHooks;
        let mut var = Variable::leaf("x", "1");
        let bare = hooks.estimate_size(&var);
        var.evaluate_name = Some("this.x".to_string());
        assert_eq!(hooks.estimate_size(&var), bare + 12);
    }
}
