//! JVM through java-debug

use async_trait::async_trait;

use crate::inspect::capabilities::CapabilityDescriptor;
use crate::inspect::variable::ScopeKind;

use super::{LiteralSpelling, RuntimeHooks, RuntimeInfo, ScopeClass, ThreadSelection};

pub static INFO: RuntimeInfo = RuntimeInfo {
    id: "java",
    name: "java-debug",
    session_types: &["java"],
    description: "JVM languages through Microsoft's java-debug",
};

static LITERALS: LiteralSpelling =
    LiteralSpelling::c_family("Double.NaN", "Double.POSITIVE_INFINITY", "Double.NEGATIVE_INFINITY");

pub struct JavaHooks;

#[async_trait]
impl RuntimeHooks for JavaHooks {
    fn info(&self) -> &RuntimeInfo {
        &INFO
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::STANDARD
    }

    // Every thread suspends, only one sits in user code
    fn thread_selection(&self) -> ThreadSelection {
        ThreadSelection::CachedThenScan {
            fallback_to_first: true,
        }
    }

    fn classify_scope(&self, raw_kind: &str) -> Option<ScopeClass> {
        match raw_kind {
            "local" | "locals" | "this" => Some(ScopeClass::new(ScopeKind::Local, false, true)),
            "static" | "statics" => Some(ScopeClass::new(ScopeKind::Global, false, false)),
            _ => None,
        }
    }

    fn literals(&self) -> &LiteralSpelling {
        &LITERALS
    }
}
