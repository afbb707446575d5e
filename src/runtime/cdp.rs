//! Chrome DevTools Protocol runtimes (Node and Chrome via js-debug)

use async_trait::async_trait;

use crate::dap::Variable;
use crate::inspect::capabilities::CapabilityDescriptor;
use crate::inspect::variable::ScopeKind;

use super::{
    base_size, has_side_effect_hint, LiteralSpelling, Probe, RuntimeHooks, RuntimeInfo,
    ScopeClass, ThreadSelection,
};

pub static INFO: RuntimeInfo = RuntimeInfo {
    id: "cdp",
    name: "js-debug",
    session_types: &["pwa-node", "node", "pwa-chrome"],
    description: "Node.js and Chrome through the CDP-based js-debug adapter",
};

static LITERALS: LiteralSpelling = LiteralSpelling {
    nan: "Number.NaN",
    infinity: "Number.POSITIVE_INFINITY",
    neg_infinity: "Number.NEGATIVE_INFINITY",
    null: "null",
    true_: "true",
    false_: "false",
    undefined: Some("undefined"),
    bigint: true,
    interpolating_strings: false,
};

/// Placeholder js-debug shows for a getter it has not invoked
const GETTER_PLACEHOLDER: &str = "(...)";

pub struct CdpHooks;

/// Extra bytes implied by the declared shape of collection-like values
fn collection_size(variable: &Variable) -> usize {
    let Some(type_name) = variable.type_name.as_deref() else {
        return 0;
    };
    let type_name = type_name.to_lowercase();
    let mut extra: usize = 0;

    if type_name.contains("array") {
        let count = variable.indexed_variables.unwrap_or(0).max(0) as usize;
        extra = extra.saturating_add(count.saturating_mul(50));
    }
    if type_name.contains("map") || type_name.contains("set") {
        let count = variable.named_variables.unwrap_or(0).max(0) as usize;
        extra = extra.saturating_add(count.saturating_mul(75));
    }

    const BUFFER_TYPES: [&str; 6] = ["buffer", "int8", "int16", "int32", "float", "uint"];
    if BUFFER_TYPES.iter().any(|t| type_name.contains(t)) {
        extra = extra.saturating_add(byte_length_hint(&variable.value).unwrap_or(0));
    }
    extra
}

/// `Uint8Array(1024)` carries its length in parentheses
fn byte_length_hint(value: &str) -> Option<usize> {
    let open = value.find('(')?;
    let rest = &value[open + 1..];
    let close = rest.find(')')?;
    rest[..close].parse().ok()
}

#[async_trait]
impl RuntimeHooks for CdpHooks {
    fn info(&self) -> &RuntimeInfo {
        &INFO
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            supports_memory_references: true,
            supports_identity_check: true,
            ..CapabilityDescriptor::STANDARD
        }
    }

    fn thread_selection(&self) -> ThreadSelection {
        ThreadSelection::FirstWithFrames
    }

    fn classify_scope(&self, raw_kind: &str) -> Option<ScopeClass> {
        let class = match raw_kind {
            "local" => ScopeClass::new(ScopeKind::Local, false, true),
            "closure" => ScopeClass::new(ScopeKind::Closure, false, true),
            "catch" => ScopeClass::new(ScopeKind::Local, false, true),
            "block" | "with" | "eval" => ScopeClass::new(ScopeKind::Local, false, false),
            "script" | "module" => ScopeClass::new(ScopeKind::Global, true, false),
            "global" => ScopeClass::new(ScopeKind::Global, true, false),
            _ => return None,
        };
        Some(class)
    }

    fn estimate_size(&self, variable: &Variable) -> usize {
        base_size(variable).saturating_add(collection_size(variable))
    }

    fn special_value(&self, variable: &Variable) -> Option<String> {
        let is_promise = variable
            .type_name
            .as_deref()
            .is_some_and(|t| t == "Promise")
            || variable.value.starts_with("Promise");
        (is_promise && variable.value.contains("<pending>"))
            .then(|| format!("{} (pending async value)", variable.value))
    }

    async fn detect_side_effect(&self, variable: &Variable, _probe: &Probe<'_>) -> bool {
        has_side_effect_hint(variable) || variable.value == GETTER_PLACEHOLDER
    }

    fn identity_expression(&self, left: &str, right: &str) -> Option<String> {
        Some(format!("Object.is({left}, {right})"))
    }

    fn literals(&self) -> &LiteralSpelling {
        &LITERALS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedChannel;
    use tokio_util::sync::CancellationToken;

    fn typed(name: &str, value: &str, type_name: &str) -> Variable {
        Variable {
            type_name: Some(type_name.to_string()),
            ..Variable::leaf(name, value)
        }
    }

    #[test]
    fn test_scope_table() {
        let hooks = CdpHooks;
        let local = hooks.classify_scope("local").unwrap();
        assert!(local.writable && !local.expensive);
        let block = hooks.classify_scope("block").unwrap();
        assert!(!block.writable);
        let global = hooks.classify_scope("global").unwrap();
        assert_eq!(global.kind, ScopeKind::Global);
        assert!(global.expensive);
        assert!(hooks.classify_scope("wasm-expression-stack").is_none());
    }

    #[test]
    fn test_typed_array_size_uses_length_hint() {
        let hooks = CdpHooks;
        let buf = typed("buf", "Uint8Array(1024)", "Uint8Array");
        assert_eq!(hooks.estimate_size(&buf), base_size(&buf) + 1024);

        let arr = Variable {
            indexed_variables: Some(10),
            ..typed("arr", "Array(10)", "Array")
        };
        assert_eq!(hooks.estimate_size(&arr), base_size(&arr) + 500);

        let map = Variable {
            named_variables: Some(4),
            ..typed("m", "Map(4)", "Map")
        };
        assert_eq!(hooks.estimate_size(&map), base_size(&map) + 300);
    }

    #[test]
    fn test_huge_declared_counts_saturate() {
        let hooks = CdpHooks;
        let arr = Variable {
            indexed_variables: Some(i64::MAX),
            named_variables: Some(i64::MAX),
            ..typed("arr", "Array", "ArraySetMap")
        };
        assert_eq!(hooks.estimate_size(&arr), usize::MAX);
    }

    #[test]
    fn test_pending_promise_is_special() {
        let hooks = CdpHooks;
        let pending = typed("p", "Promise {<pending>}", "Promise");
        assert!(hooks
            .special_value(&pending)
            .is_some_and(|v| v.ends_with("(pending async value)")));
        assert!(hooks
            .special_value(&typed("p", "Promise {<fulfilled>: 1}", "Promise"))
            .is_none());
    }

    #[tokio::test]
    async fn test_getter_placeholder_is_side_effect_prone() {
        let channel = ScriptedChannel::builder().build();
        let token = CancellationToken::new();
        let probe = Probe::new(&channel, &token, None);
        let hooks = CdpHooks;

        assert!(hooks.detect_side_effect(&Variable::leaf("total", "(...)"), &probe).await);
        assert!(!hooks.detect_side_effect(&Variable::leaf("total", "3"), &probe).await);
        assert!(channel.calls().is_empty());
    }
}
