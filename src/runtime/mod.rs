//! Runtime strategy hooks
//!
//! One shared expansion engine drives every runtime. The differences between
//! runtime families (how to find the paused thread, how scopes are named, how
//! big a value is, which values must not be touched) live behind
//! [`RuntimeHooks`], implemented once per family.

pub mod cdp;
pub mod coreclr;
pub mod dart;
pub mod debugpy;
pub mod java;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::common::{Error, Result};
use crate::dap::{EvaluateResponseBody, Scope, StackFrame, Thread, Variable};
use crate::inspect::budget::BudgetLimits;
use crate::inspect::capabilities::CapabilityDescriptor;
use crate::inspect::channel::{cancellable, DebugChannel};
use crate::inspect::variable::ScopeKind;

/// Static description of a runtime family
#[derive(Debug, Clone)]
pub struct RuntimeInfo {
    /// Unique identifier (e.g., "cdp", "debugpy")
    pub id: &'static str,
    /// Display name
    pub name: &'static str,
    /// Session types this family handles by default
    pub session_types: &'static [&'static str],
    pub description: &'static str,
}

/// How a runtime decides which paused thread to inspect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSelection {
    /// Every thread stops together; any one will do
    First,
    /// First thread that reports a stack, else the first thread
    FirstWithFrames,
    /// All threads stop but only one sits in user source
    ScanForSource,
    /// Verify the last-stopped thread first, then scan
    CachedThenScan { fallback_to_first: bool },
}

/// Canonical classification of one scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeClass {
    pub kind: ScopeKind,
    pub expensive: bool,
    pub writable: bool,
}

impl ScopeClass {
    /// Applied to scope kinds no table recognises
    pub const UNKNOWN: Self = Self::new(ScopeKind::Other, false, false);

    pub const fn new(kind: ScopeKind, expensive: bool, writable: bool) -> Self {
        Self {
            kind,
            expensive,
            writable,
        }
    }
}

/// How a runtime spells the non-string literals of an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiteralSpelling {
    pub nan: &'static str,
    pub infinity: &'static str,
    pub neg_infinity: &'static str,
    pub null: &'static str,
    pub true_: &'static str,
    pub false_: &'static str,
    /// Separate "undefined" value, when the language has one
    pub undefined: Option<&'static str>,
    /// `123n` literals are valid
    pub bigint: bool,
    /// Double-quoted strings interpolate `$name`
    pub interpolating_strings: bool,
}

impl LiteralSpelling {
    /// C-family spelling with `null`/`true`/`false`
    pub const fn c_family(nan: &'static str, infinity: &'static str, neg: &'static str) -> Self {
        Self {
            nan,
            infinity,
            neg_infinity: neg,
            null: "null",
            true_: "true",
            false_: "false",
            undefined: None,
            bigint: false,
            interpolating_strings: false,
        }
    }
}

/// Read-only view of the paused session handed to hooks
///
/// Every call goes through the caller's cancellation token.
pub struct Probe<'a> {
    pub channel: &'a dyn DebugChannel,
    pub token: &'a CancellationToken,
    pub frame_id: Option<i64>,
}

impl<'a> Probe<'a> {
    pub fn new(
        channel: &'a dyn DebugChannel,
        token: &'a CancellationToken,
        frame_id: Option<i64>,
    ) -> Self {
        Self {
            channel,
            token,
            frame_id,
        }
    }

    pub async fn evaluate(&self, expression: &str, context: &str) -> Result<EvaluateResponseBody> {
        cancellable(
            self.token,
            self.channel.evaluate(expression, self.frame_id, context),
        )
        .await
    }

    pub async fn threads(&self) -> Result<Vec<Thread>> {
        cancellable(self.token, self.channel.threads()).await
    }

    /// Topmost frame of `thread_id`, if it has any
    pub async fn top_frame(&self, thread_id: i64) -> Result<Option<StackFrame>> {
        let frames = cancellable(self.token, self.channel.stack_trace(thread_id, 0, 1)).await?;
        Ok(frames.into_iter().next())
    }
}

/// Per-runtime behaviour plugged into the shared engine
#[async_trait]
pub trait RuntimeHooks: Send + Sync {
    fn info(&self) -> &RuntimeInfo;

    fn capabilities(&self) -> CapabilityDescriptor;

    fn budget_limits(&self) -> BudgetLimits {
        BudgetLimits::DEFAULT
    }

    fn thread_selection(&self) -> ThreadSelection;

    /// Classify a lowercased scope kind token, `None` when unknown
    fn classify_scope(&self, raw_kind: &str) -> Option<ScopeClass>;

    fn estimate_size(&self, variable: &Variable) -> usize {
        base_size(variable)
    }

    /// Display value for a value that must never be traversed
    fn special_value(&self, _variable: &Variable) -> Option<String> {
        None
    }

    /// True when expanding `variable` could run user code
    ///
    /// Implementations may inspect descriptors through `probe` but must not
    /// invoke the accessor itself.
    async fn detect_side_effect(&self, variable: &Variable, _probe: &Probe<'_>) -> bool {
        has_side_effect_hint(variable)
    }

    /// Expression that re-derives `child` from `parent`
    fn child_evaluate_path(&self, parent: &Variable, child: &Variable) -> Option<String> {
        default_child_path(parent, child)
    }

    /// Expression comparing two values for object identity
    fn identity_expression(&self, _left: &str, _right: &str) -> Option<String> {
        None
    }

    fn literals(&self) -> &LiteralSpelling;
}

impl std::fmt::Debug for dyn RuntimeHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHooks")
            .field("id", &self.info().id)
            .finish()
    }
}

/// Fixed per-node overhead plus two bytes per UTF-16 unit of each string
pub fn base_size(variable: &Variable) -> usize {
    let utf16 = |s: &str| s.encode_utf16().count();
    100 + 2
        * (utf16(&variable.name)
            + utf16(&variable.value)
            + variable.type_name.as_deref().map_or(0, utf16))
}

/// Lazy presentation hint or an explicit side-effect attribute
pub fn has_side_effect_hint(variable: &Variable) -> bool {
    variable.is_lazy()
        || variable
            .presentation_hint
            .as_ref()
            .is_some_and(|h| h.has_attribute("hasSideEffects"))
}

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

pub fn is_index(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

fn default_child_path(parent: &Variable, child: &Variable) -> Option<String> {
    if let Some(path) = &child.evaluate_name {
        return Some(path.clone());
    }
    let base = parent.evaluate_name.as_deref()?;
    if is_index(&child.name) {
        Some(format!("{base}[{}]", child.name))
    } else if is_identifier(&child.name) {
        Some(format!("{base}.{}", child.name))
    } else {
        None
    }
}

/// First alphanumeric token of a scope name, lowercased
///
/// `"Local: main"` becomes `"local"`, `"Block (x)"` becomes `"block"`.
pub fn raw_scope_kind(name: &str) -> String {
    name.trim()
        .split(|c: char| !c.is_alphanumeric())
        .find(|token| !token.is_empty())
        .unwrap_or("")
        .to_lowercase()
}

/// Classify a scope by its name, then by its presentation hint
///
/// Returns the token that was tried and the class, `None` for unknown kinds.
pub fn classify(hooks: &dyn RuntimeHooks, scope: &Scope) -> (String, Option<ScopeClass>) {
    let raw = raw_scope_kind(&scope.name);
    if let Some(class) = hooks.classify_scope(&raw) {
        return (raw, Some(class));
    }
    let hinted = scope
        .presentation_hint
        .as_deref()
        .map(raw_scope_kind)
        .and_then(|hint| hooks.classify_scope(&hint));
    (raw, hinted)
}

/// Pick the thread to inspect
///
/// Returns `Ok(None)` when the session has no usable thread. Frame lookups
/// that fail during a scan are skipped; cancellation is not.
pub async fn resolve_thread(
    selection: ThreadSelection,
    probe: &Probe<'_>,
    cached: Option<i64>,
) -> Result<Option<i64>> {
    if let ThreadSelection::CachedThenScan { .. } = selection {
        if let Some(thread_id) = cached {
            match probe.top_frame(thread_id).await {
                Ok(Some(frame)) if frame.has_source() => return Ok(Some(thread_id)),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Ok(_) | Err(_) => {
                    tracing::debug!(thread_id, "Cached thread no longer in user source, scanning")
                }
            }
        }
    }

    let threads = probe.threads().await?;
    let first = threads.first().map(|t| t.id);

    let accept: fn(&StackFrame) -> bool = match selection {
        ThreadSelection::First => return Ok(first),
        ThreadSelection::FirstWithFrames => |_| true,
        ThreadSelection::ScanForSource | ThreadSelection::CachedThenScan { .. } => {
            StackFrame::has_source
        }
    };

    for thread in &threads {
        match probe.top_frame(thread.id).await {
            Ok(Some(frame)) if accept(&frame) => return Ok(Some(thread.id)),
            Ok(_) => {}
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => tracing::debug!(thread_id = thread.id, error = %e, "Skipping thread"),
        }
    }

    let fallback = match selection {
        ThreadSelection::CachedThenScan { fallback_to_first } => fallback_to_first,
        _ => true,
    };
    Ok(if fallback { first } else { None })
}

static RUNTIMES: &[&RuntimeInfo] = &[
    &cdp::INFO,
    &coreclr::INFO,
    &debugpy::INFO,
    &java::INFO,
    &dart::INFO,
];

/// Every built-in runtime family
pub fn all_runtimes() -> &'static [&'static RuntimeInfo] {
    RUNTIMES
}

/// Built-in hooks for a session type
pub fn builtin_hooks(session_type: &str) -> Option<Arc<dyn RuntimeHooks>> {
    match session_type {
        "pwa-node" | "node" | "pwa-chrome" => Some(Arc::new(cdp::CdpHooks)),
        "coreclr" => Some(Arc::new(coreclr::CoreClrHooks)),
        "debugpy" => Some(Arc::new(debugpy::DebugpyHooks)),
        "java" => Some(Arc::new(java::JavaHooks)),
        "dart" => Some(Arc::new(dart::DartHooks)),
        _ => None,
    }
}

/// Built-in hooks by runtime family id
pub fn hooks_by_id(id: &str) -> Option<Arc<dyn RuntimeHooks>> {
    let info = RUNTIMES.iter().find(|info| info.id == id)?;
    builtin_hooks(info.session_types.first()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedChannel;

    #[test]
    fn test_raw_scope_kind_takes_first_token() {
        assert_eq!(raw_scope_kind("Local: main"), "local");
        assert_eq!(raw_scope_kind("  Block (x)"), "block");
        assert_eq!(raw_scope_kind("Globals"), "globals");
        assert_eq!(raw_scope_kind(""), "");
    }

    #[test]
    fn test_base_size_counts_utf16_units() {
        let var = Variable {
            type_name: Some("str".to_string()),
            ..Variable::leaf("é", "ab")
        };
        assert_eq!(base_size(&var), 100 + 2 * (1 + 2 + 3));
    }

    #[test]
    fn test_default_child_path_forms() {
        let parent = Variable {
            evaluate_name: Some("items".to_string()),
            ..Variable::leaf("items", "[2]")
        };
        assert_eq!(
            default_child_path(&parent, &Variable::leaf("0", "1")).as_deref(),
            Some("items[0]")
        );
        assert_eq!(
            default_child_path(&parent, &Variable::leaf("len", "2")).as_deref(),
            Some("items.len")
        );
        assert_eq!(default_child_path(&parent, &Variable::leaf("[[Prototype]]", "{}")), None);
    }

    #[test]
    fn test_every_registered_runtime_has_hooks() {
        for info in all_runtimes() {
            for session_type in info.session_types {
                let hooks = builtin_hooks(session_type).expect("hooks for session type");
                assert_eq!(hooks.info().id, info.id);
            }
        }
        assert!(builtin_hooks("lldb").is_none());
        assert!(hooks_by_id("dart").is_some());
    }

    #[tokio::test]
    async fn test_scan_prefers_thread_with_source() {
        let channel = ScriptedChannel::builder()
            .thread(1, "worker")
            .frame(1, 10, "ThreadPool.Run", None)
            .thread(2, "main")
            .frame(2, 20, "Main", Some(("/app/Program.cs", 12)))
            .build();
        let token = CancellationToken::new();
        let probe = Probe::new(&channel, &token, None);

        let picked = resolve_thread(ThreadSelection::ScanForSource, &probe, None)
            .await
            .unwrap();
        assert_eq!(picked, Some(2));

        let first = resolve_thread(ThreadSelection::First, &probe, None).await.unwrap();
        assert_eq!(first, Some(1));
    }

    #[tokio::test]
    async fn test_cached_thread_verified_before_scan() {
        let channel = ScriptedChannel::builder()
            .thread(1, "main")
            .frame(1, 10, "main", Some(("/app/Main.java", 3)))
            .thread(7, "worker")
            .frame(7, 70, "run", Some(("/app/Worker.java", 9)))
            .build();
        let token = CancellationToken::new();
        let probe = Probe::new(&channel, &token, None);

        let selection = ThreadSelection::CachedThenScan {
            fallback_to_first: true,
        };
        assert_eq!(resolve_thread(selection, &probe, Some(7)).await.unwrap(), Some(7));
        // stale hint falls through to the scan
        assert_eq!(resolve_thread(selection, &probe, Some(99)).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_scan_without_fallback_finds_nothing() {
        let channel = ScriptedChannel::builder()
            .thread(1, "isolate")
            .frame(1, 10, "dart:core", None)
            .build();
        let token = CancellationToken::new();
        let probe = Probe::new(&channel, &token, None);

        let strict = ThreadSelection::CachedThenScan {
            fallback_to_first: false,
        };
        assert_eq!(resolve_thread(strict, &probe, None).await.unwrap(), None);
        assert_eq!(
            resolve_thread(ThreadSelection::ScanForSource, &probe, None)
                .await
                .unwrap(),
            Some(1)
        );
    }
}
