//! End-to-end inspection tests against a scripted session
//!
//! Each test builds a paused debuggee with [`ScriptedChannel`], creates the
//! adapter through the regular factory and drives it through the public
//! operations only.

use std::sync::Arc;
use std::time::Duration;

use inspector::common::config::BudgetOverride;
use inspector::dap::{Scope, Variable};
use inspector::inspect::variable::{MutationTier, ScopeKind, TruncationReason};
use inspector::inspect::{
    AdapterFactory, DebugChannel, ErrorCode, InspectionService, JsonlFileSink,
    ListVariablesParams, RuntimeAdapter, SessionEvent, SessionInfo, SetVariableParams,
    StreamParams, TRAVERSAL_KEY,
};
use inspector::testing::{Call, ScriptedChannel, ScriptedChannelBuilder};

const LOCALS: i64 = 1000;

/// Thread 1 paused in `main` with an empty `Locals` scope
fn paused_python() -> ScriptedChannelBuilder {
    ScriptedChannel::builder()
        .thread(1, "MainThread")
        .frame(1, 1, "main", Some(("/app/main.py", 10)))
        .scope(1, "Locals", LOCALS)
}

fn leaf(name: &str, value: &str) -> Variable {
    Variable {
        evaluate_name: Some(name.to_string()),
        ..Variable::leaf(name, value)
    }
}

fn container(name: &str, value: &str, reference: i64) -> Variable {
    Variable {
        variables_reference: reference,
        ..leaf(name, value)
    }
}

fn python_adapter(channel: &Arc<ScriptedChannel>, max_bytes: Option<usize>) -> RuntimeAdapter {
    let mut factory = AdapterFactory::new();
    if let Some(max_bytes) = max_bytes {
        factory.set_budget(
            "debugpy",
            BudgetOverride {
                max_nodes: None,
                max_bytes: Some(max_bytes),
            },
        );
    }
    let channel: Arc<dyn DebugChannel> = channel.clone();
    factory
        .create(SessionInfo::new("s1", "debugpy"), channel, None)
        .unwrap()
}

fn variables_calls_for(channel: &ScriptedChannel, reference: i64) -> usize {
    channel
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::Variables { reference: r, .. } if *r == reference))
        .count()
}

fn evaluations(channel: &ScriptedChannel) -> Vec<String> {
    channel
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Evaluate { expression, .. } => Some(expression),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_leaves_cost_no_extra_requests() {
    let channel = Arc::new(
        paused_python()
            .var(LOCALS, leaf("count", "3"))
            .var(LOCALS, leaf("name", "'ada'"))
            .build(),
    );
    let adapter = python_adapter(&channel, None);

    let listing = adapter.list_variables(Default::default()).await.unwrap();

    let count = listing.find("count").unwrap();
    assert_eq!(count.value(), "3");
    assert!(!count.truncated && !count.expandable && count.children.is_empty());
    // the scope itself is the only container fetched
    assert_eq!(channel.calls_to("variables"), 1);
    assert_eq!(channel.calls_to("evaluate"), 0);
}

#[tokio::test]
async fn test_budget_truncates_within_one_listing() {
    let mut builder = paused_python()
        .var(LOCALS, leaf("a", "1"))
        .var(LOCALS, container("big", "dict", 20))
        .var(LOCALS, container("c", "list", 30))
        .var(30, leaf("0", "1"));
    for i in 0..10 {
        builder = builder.var(20, Variable::leaf(format!("k{i}"), "x".repeat(100)));
    }
    let channel = Arc::new(builder.build());
    // a: 104, big: 114, each child of big: 304 bytes
    let adapter = python_adapter(&channel, Some(1000));

    let params = ListVariablesParams {
        max_depth: Some(3),
        ..Default::default()
    };
    let listing = adapter.list_variables(params).await.unwrap();

    assert_eq!(listing.variables().count(), 3);
    assert!(!listing.find("a").unwrap().truncated);

    let big = listing.find("big").unwrap();
    assert!(big.truncated);
    assert_eq!(big.truncated_reason, Some(TruncationReason::Budget));
    assert_eq!(big.children.len(), 2);
    assert_eq!(big.total_children, Some(10));

    let c = listing.find("c").unwrap();
    assert!(c.truncated);
    assert_eq!(c.truncated_reason, Some(TruncationReason::Budget));
    assert!(c.children.is_empty());
    assert_eq!(variables_calls_for(&channel, 30), 0);

    assert!(listing.budget.exhausted);
    assert!(listing.suggestion.is_some());

    // the next listing starts from a fresh budget
    channel.clear_calls();
    let again = adapter
        .list_variables(ListVariablesParams {
            max_depth: Some(3),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(again.find("big").unwrap().children.len(), 2);
}

#[tokio::test]
async fn test_self_reference_terminates() {
    let channel = Arc::new(
        paused_python()
            .var(LOCALS, container("node", "Node", 10))
            .var(10, leaf("value", "1"))
            .var(10, container("next", "Node", 10))
            .build(),
    );
    let adapter = python_adapter(&channel, None);

    let params = ListVariablesParams {
        max_depth: Some(10),
        ..Default::default()
    };
    let listing = adapter.list_variables(params).await.unwrap();

    let node = listing.find("node").unwrap();
    let next = node.child("next").unwrap();
    assert!(next.cycle);
    assert!(next.children.is_empty());
    assert!(!next.expandable);
    assert_eq!(node.child("value").unwrap().value(), "1");
    assert_eq!(variables_calls_for(&channel, 10), 1);
}

#[tokio::test]
async fn test_identical_concurrent_listings_one_busy() {
    let channel = Arc::new(
        paused_python()
            .var(LOCALS, leaf("a", "1"))
            .delay(Duration::from_millis(20))
            .build(),
    );
    let adapter = python_adapter(&channel, None);

    let (first, second) = tokio::join!(
        adapter.list_variables(Default::default()),
        adapter.list_variables(Default::default())
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let busy = results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .next()
        .unwrap();
    assert_eq!(busy.code, ErrorCode::Busy);
}

#[tokio::test]
async fn test_lock_free_after_failed_operation() {
    let channel = Arc::new(
        paused_python()
            .var(LOCALS, leaf("a", "1"))
            .fail("threads")
            .build(),
    );
    let adapter = python_adapter(&channel, None);

    assert!(adapter.list_variables(Default::default()).await.is_err());
    assert!(!adapter.locks().is_held("s1", TRAVERSAL_KEY));

    channel.set_failing("threads", false);
    let listing = adapter.list_variables(Default::default()).await.unwrap();
    assert_eq!(listing.find("a").unwrap().value(), "1");
}

#[tokio::test]
async fn test_assignment_falls_back_to_evaluate_with_literals() {
    for (input, literal) in [
        ("42", "42"),
        ("true", "True"),
        ("hello world", "\"hello world\""),
        ("NaN", "float('nan')"),
    ] {
        let channel = Arc::new(
            paused_python()
                .var(LOCALS, leaf("x", "0"))
                .fail("setVariable")
                .fail("setExpression")
                .build(),
        );
        let adapter = python_adapter(&channel, None);

        let outcome = adapter
            .set_variable(SetVariableParams {
                name: "x".to_string(),
                value: input.to_string(),
                reference: Some(LOCALS),
                frame_id: None,
            })
            .await
            .unwrap();

        assert_eq!(outcome.tier, MutationTier::Evaluate);
        assert_eq!(channel.calls_to("setVariable"), 1);
        assert_eq!(channel.calls_to("setExpression"), 1);
        assert_eq!(evaluations(&channel), vec![format!("x = {literal}")]);
    }
}

#[tokio::test]
async fn test_unknown_scope_kind_listed_under_all() {
    let channel = Arc::new(
        paused_python()
            .var(LOCALS, leaf("a", "1"))
            .scope_with(
                1,
                Scope {
                    name: "Registers".to_string(),
                    variables_reference: 2000,
                    ..Default::default()
                },
            )
            .var(2000, leaf("rax", "0x0"))
            .build(),
    );
    let adapter = python_adapter(&channel, None);

    let listing = adapter.list_variables(Default::default()).await.unwrap();
    let registers = listing.scope("Registers").unwrap();
    assert_eq!(registers.kind, ScopeKind::Other);
    assert!(!registers.expensive);
    assert!(!registers.writable);
    assert_eq!(registers.variables[0].name(), "rax");
}

#[tokio::test]
async fn test_set_then_evaluate_round_trip() {
    let channel = Arc::new(paused_python().var(LOCALS, leaf("x", "0")).build());
    let adapter = python_adapter(&channel, None);

    let outcome = adapter
        .set_variable(SetVariableParams {
            name: "x".to_string(),
            value: "42".to_string(),
            reference: Some(LOCALS),
            frame_id: None,
        })
        .await
        .unwrap();
    assert_eq!(outcome.tier, MutationTier::SetVariable);

    let evaluated = adapter.evaluate_expression("x", None).await.unwrap();
    assert_eq!(evaluated.result, "42");
}

#[tokio::test]
async fn test_resume_makes_references_stale() {
    let channel = Arc::new(
        paused_python()
            .var(LOCALS, container("user", "User", 10))
            .var(10, leaf("name", "'ada'"))
            .build(),
    );
    let adapter = python_adapter(&channel, None);
    adapter.list_variables(Default::default()).await.unwrap();

    adapter.handle_event(SessionEvent::Continued);
    channel.forget_references();

    let err = adapter
        .get_variable_children(inspector::inspect::ChildrenParams {
            reference: LOCALS,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::StaleReference);
}

#[tokio::test]
async fn test_stream_writes_one_record_per_variable() {
    let mut builder = paused_python().var(LOCALS, container("big", "dict", 20));
    for i in 0..10 {
        builder = builder.var(20, Variable::leaf(format!("k{i}"), "x".repeat(100)));
    }
    let channel = Arc::new(
        builder
            .var(LOCALS, container("small", "list", 30))
            .var(30, leaf("0", "1"))
            .build(),
    );
    let adapter = python_adapter(&channel, Some(1000));
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("vars.jsonl");

    let outcome = adapter
        .stream_variables(StreamParams {
            output_path: output_path.clone(),
            list: Default::default(),
        })
        .await
        .unwrap();

    assert_eq!(outcome.variable_count, 2);
    assert_eq!(outcome.truncated_count, 1);
    let content = std::fs::read_to_string(&output_path).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["name"], "big");
    // budget is reset per record, so the second one expands fully
    assert_eq!(lines[1]["name"], "small");
    assert_eq!(lines[1]["children"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_service_disposes_terminated_sessions() {
    let service = InspectionService::new(AdapterFactory::new());
    let channel = Arc::new(paused_python().var(LOCALS, leaf("a", "1")).build());
    let dyn_channel: Arc<dyn DebugChannel> = channel.clone();
    service.register_session(SessionInfo::new("py", "debugpy"), dyn_channel, None);

    let adapter = service.active_adapter().unwrap();
    assert!(adapter.list_variables(Default::default()).await.is_ok());

    service.handle_event("py", SessionEvent::Terminated);
    let err = adapter.list_variables(Default::default()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::SessionTerminated);
    assert_eq!(service.adapter("py").unwrap_err().code, ErrorCode::NoSession);
}

#[tokio::test]
async fn test_budget_exhausted_below_first_level_truncates_ancestors() {
    let mut builder = paused_python()
        .var(LOCALS, leaf("a", "1"))
        .var(LOCALS, container("two", "dict", 20))
        .var(LOCALS, container("three", "list", 40))
        .var(20, container("c1", "list", 21))
        .var(20, container("c2", "list", 22))
        .var(22, leaf("0", "1"))
        .var(40, leaf("0", "1"));
    for i in 0..10 {
        builder = builder.var(21, Variable::leaf(format!("k{i}"), "x".repeat(100)));
    }
    let channel = Arc::new(builder.build());
    // a: 104, two: 114, c1: 112, each child of c1: 304 bytes
    let adapter = python_adapter(&channel, Some(1500));

    let listing = adapter
        .list_variables(ListVariablesParams {
            max_depth: Some(3),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(listing.variables().count(), 3);
    assert!(listing.budget.exhausted);

    let two = listing.find("two").unwrap();
    assert!(two.truncated);
    assert_eq!(two.truncated_reason, Some(TruncationReason::Budget));
    assert_eq!(two.children.len(), 1);

    let c1 = two.child("c1").unwrap();
    assert_eq!(c1.truncated_reason, Some(TruncationReason::Budget));
    assert_eq!(c1.children.len(), 3);

    // nothing is admitted once the budget ran out
    assert!(two.child("c2").is_none());
    assert_eq!(variables_calls_for(&channel, 22), 0);

    let three = listing.find("three").unwrap();
    assert_eq!(three.truncated_reason, Some(TruncationReason::Budget));
    assert!(three.children.is_empty());
    assert_eq!(variables_calls_for(&channel, 40), 0);
}

#[tokio::test]
async fn test_listing_and_stream_share_one_budget_lock() {
    let channel = Arc::new(
        paused_python()
            .var(LOCALS, container("user", "User", 10))
            .var(10, leaf("name", "'ada'"))
            .delay(Duration::from_millis(10))
            .build(),
    );
    let adapter = python_adapter(&channel, None);
    let dir = tempfile::tempdir().unwrap();
    let mut sink = JsonlFileSink::create(&dir.path().join("vars.jsonl"))
        .await
        .unwrap();

    let (listed, streamed) = tokio::join!(
        adapter.list_variables(Default::default()),
        adapter.stream_variables_to(Default::default(), &mut sink)
    );

    assert!(listed.is_ok());
    assert_eq!(streamed.unwrap_err().code, ErrorCode::Busy);
    assert!(!adapter.locks().is_held("s1", TRAVERSAL_KEY));
}
