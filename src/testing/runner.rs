//! Test runner implementation
//!
//! Builds a scripted session from the scenario's debuggee, creates the
//! inspection adapter through the regular factory and executes each step
//! against it, asserting on structured results rather than output text.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use futures_util::future::join_all;

use crate::common::{Error, Result};
use crate::dap::{Scope, Variable, VariablePresentationHint, VariablesFilter};
use crate::inspect::variable::{
    ChildrenParams, EnhancedVariable, ListVariablesParams, MutationTier, ScopeKind,
    SetVariableParams, TruncationReason, VariableListing,
};
use crate::inspect::{
    AdapterFactory, DebugChannel, ErrorCode, InspectResult, RuntimeAdapter, SessionEvent,
    SessionInfo,
};

use super::channel::{Call, ScriptedChannel, ScriptedChannelBuilder};
use super::config::{
    ChildrenExpectation, CommonExpectation, DebuggeeConfig, EvaluateExpectation, ListExpectation,
    ListParams, ScopeAssertion, SetExpectation, TestScenario, TestStep, VariableAssertion,
    VariableConfig,
};

/// First reference handed out to containers without an explicit one
const FIRST_AUTO_REF: i64 = 100_000;

/// Result of a test run
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub error: Option<String>,
}

/// Load and parse a scenario file
pub fn load_scenario(path: &Path) -> Result<TestScenario> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read test scenario '{}': {}",
            path.display(),
            e
        ))
    })?;

    serde_yaml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse test scenario: {}", e)))
}

/// Run a test scenario from a YAML file
pub async fn run_scenario(path: &Path, verbose: bool) -> Result<TestResult> {
    let scenario = load_scenario(path)?;
    run_loaded(scenario, verbose).await
}

/// Run an already parsed scenario
pub async fn run_loaded(scenario: TestScenario, verbose: bool) -> Result<TestResult> {
    let steps_total = scenario.steps.len();

    println!(
        "\n{} {}",
        "Running Test:".blue().bold(),
        scenario.name.white().bold()
    );

    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }

    let channel = Arc::new(build_channel(&scenario.debuggee));
    let adapter = create_adapter(&scenario, Arc::clone(&channel))?;

    if verbose {
        println!(
            "  Runtime: {}",
            adapter.hooks().info().name.to_string().dimmed()
        );
    }

    println!("\n{}", "Steps:".cyan());

    for (i, step) in scenario.steps.iter().enumerate() {
        let step_num = i + 1;
        channel.clear_calls();

        if let Err(e) = execute_step(&adapter, &channel, step, step_num, verbose).await {
            println!("  {} Step {}: {}", "✗".red(), step_num, e);
            adapter.dispose();
            return Ok(TestResult {
                name: scenario.name.clone(),
                passed: false,
                steps_run: step_num,
                steps_total,
                error: Some(e.to_string()),
            });
        }
    }

    adapter.dispose();

    println!(
        "\n{} {}\n",
        "✓".green().bold(),
        "Test Passed".green().bold()
    );

    Ok(TestResult {
        name: scenario.name,
        passed: true,
        steps_run: steps_total,
        steps_total,
        error: None,
    })
}

fn create_adapter(scenario: &TestScenario, channel: Arc<ScriptedChannel>) -> Result<RuntimeAdapter> {
    let mut config = crate::common::config::InspectionConfig::default();
    let overrides = &scenario.inspection;
    config.max_depth = overrides.max_depth.unwrap_or(config.max_depth);
    config.max_children = overrides.max_children.unwrap_or(config.max_children);
    config.include_expensive = overrides.include_expensive.unwrap_or(config.include_expensive);
    config.lock_timeout_secs = overrides.lock_timeout_secs.unwrap_or(config.lock_timeout_secs);
    config.max_identity_failures = overrides
        .max_identity_failures
        .unwrap_or(config.max_identity_failures);

    let mut factory = AdapterFactory::new().with_config(config);
    if let Some(budget) = scenario.budget {
        factory.set_budget(scenario.session_type.clone(), budget);
    }

    let channel: Arc<dyn DebugChannel> = channel;
    factory
        .create(
            SessionInfo::new("scenario", scenario.session_type.clone()),
            channel,
            None,
        )
        .map_err(|e| Error::Config(e.to_string()))
}

/// Build a scripted channel from the debuggee description
pub fn build_channel(debuggee: &DebuggeeConfig) -> ScriptedChannel {
    let mut builder = ScriptedChannel::builder();
    let mut next_ref = FIRST_AUTO_REF;

    for thread in &debuggee.threads {
        builder = builder.thread(thread.id, &thread.name);
        for frame in &thread.frames {
            let source = frame.source.as_deref().map(|path| (path, frame.line));
            builder = builder.frame(thread.id, frame.id, &frame.name, source);

            for scope in &frame.scopes {
                let reference = scope.reference.unwrap_or_else(|| allocate(&mut next_ref));
                builder = builder.scope_with(
                    frame.id,
                    Scope {
                        name: scope.name.clone(),
                        variables_reference: reference,
                        expensive: scope.expensive,
                        presentation_hint: scope.presentation_hint.clone(),
                        ..Default::default()
                    },
                );
                builder = add_variables(builder, reference, &scope.variables, None, &mut next_ref);
            }
        }
    }

    for (expression, result) in &debuggee.evaluate {
        builder = builder.evaluate_result(expression, result);
    }
    for (reference, target) in &debuggee.aliases {
        builder = builder.alias(*reference, *target);
    }
    for verb in &debuggee.fail {
        builder = builder.fail(verb);
    }
    if let Some(ms) = debuggee.delay_ms {
        builder = builder.delay(Duration::from_millis(ms));
    }
    builder.build()
}

fn allocate(next_ref: &mut i64) -> i64 {
    let reference = *next_ref;
    *next_ref += 1;
    reference
}

fn child_path(parent: Option<&str>, name: &str) -> String {
    match parent {
        None => name.to_string(),
        Some(parent) if name.parse::<u64>().is_ok() => format!("{parent}[{name}]"),
        Some(parent) => format!("{parent}.{name}"),
    }
}

fn add_variables(
    mut builder: ScriptedChannelBuilder,
    container: i64,
    variables: &[VariableConfig],
    parent_path: Option<&str>,
    next_ref: &mut i64,
) -> ScriptedChannelBuilder {
    builder = builder.container(container);

    for config in variables {
        let reference = match config.reference {
            Some(reference) => reference,
            None if !config.children.is_empty() => allocate(next_ref),
            None => 0,
        };
        let evaluate_name = config
            .evaluate_name
            .clone()
            .unwrap_or_else(|| child_path(parent_path, &config.name));

        let has_hint =
            config.kind.is_some() || !config.attributes.is_empty() || config.lazy.is_some();
        let variable = Variable {
            name: config.name.clone(),
            value: config.value.clone(),
            type_name: config.type_name.clone(),
            variables_reference: reference,
            named_variables: config.named,
            indexed_variables: config.indexed,
            evaluate_name: Some(evaluate_name.clone()),
            presentation_hint: has_hint.then(|| VariablePresentationHint {
                kind: config.kind.clone(),
                attributes: config.attributes.clone(),
                visibility: None,
                lazy: config.lazy.unwrap_or(false),
            }),
            ..Default::default()
        };
        builder = builder.var(container, variable);

        if reference != 0 {
            builder = add_variables(
                builder,
                reference,
                &config.children,
                Some(&evaluate_name),
                next_ref,
            );
        }
    }
    builder
}

fn list_params(params: &ListParams) -> ListVariablesParams {
    ListVariablesParams {
        max_depth: params.max_depth,
        max_children: params.max_children,
        include_expensive: params.include_expensive,
        scope_filter: params.scope,
        thread_id: params.thread_id,
        frame_id: params.frame_id,
    }
}

fn parse_event(name: &str, thread_id: Option<i64>) -> Result<SessionEvent> {
    Ok(match name {
        "stopped" => SessionEvent::Stopped { thread_id },
        "continued" => SessionEvent::Continued,
        "stack_item_changed" => SessionEvent::StackItemChanged,
        "breakpoints_changed" => SessionEvent::BreakpointsChanged,
        "invalidated" => SessionEvent::Invalidated,
        "terminated" => SessionEvent::Terminated,
        other => return Err(Error::Config(format!("Unknown event '{other}'"))),
    })
}

fn parse_filter(filter: Option<&str>) -> Result<Option<VariablesFilter>> {
    match filter {
        None => Ok(None),
        Some("indexed") => Ok(Some(VariablesFilter::Indexed)),
        Some("named") => Ok(Some(VariablesFilter::Named)),
        Some(other) => Err(Error::Config(format!(
            "Unknown filter '{other}' (expected indexed or named)"
        ))),
    }
}

/// Execute a single test step
async fn execute_step(
    adapter: &RuntimeAdapter,
    channel: &ScriptedChannel,
    step: &TestStep,
    step_num: usize,
    verbose: bool,
) -> Result<()> {
    match step {
        TestStep::ListVariables { params, expect } => {
            let result = adapter.list_variables(list_params(params)).await;
            let label = "list variables";
            if let Some(listing) = check_outcome(label, result, &expect.common)? {
                check_listing(&listing, expect)?;
                if verbose {
                    println!(
                        "    {}",
                        serde_json::to_string(&listing.budget)?.dimmed()
                    );
                }
            }
            check_calls(channel, &expect.common)?;
            pass(step_num, label, &expect.common);
        }
        TestStep::GetChildren {
            reference,
            start,
            count,
            filter,
            expect,
        } => {
            let params = ChildrenParams {
                reference: *reference,
                start: *start,
                count: *count,
                filter: parse_filter(filter.as_deref())?,
            };
            let result = adapter.get_variable_children(params).await;
            let label = format!("get children of {reference}");
            if let Some(children) = check_outcome(&label, result, &expect.common)? {
                check_children(&children, expect)?;
            }
            check_calls(channel, &expect.common)?;
            pass(step_num, &label, &expect.common);
        }
        TestStep::SetVariable {
            name,
            value,
            reference,
            frame_id,
            expect,
        } => {
            let params = SetVariableParams {
                name: name.clone(),
                value: value.clone(),
                reference: *reference,
                frame_id: *frame_id,
            };
            let result = adapter.set_variable(params).await;
            let label = format!("set {name} = {value}");
            if let Some(outcome) = check_outcome(&label, result, &expect.common)? {
                check_set(channel, &outcome.value, outcome.tier, expect)?;
            }
            check_calls(channel, &expect.common)?;
            pass(step_num, &label, &expect.common);
        }
        TestStep::Evaluate {
            expression,
            frame_id,
            expect,
        } => {
            let result = adapter.evaluate_expression(expression, *frame_id).await;
            let label = format!("evaluate {expression}");
            if let Some(outcome) = check_outcome(&label, result, &expect.common)? {
                check_evaluate(&outcome.result, outcome.type_name.as_deref(), expect)?;
            }
            check_calls(channel, &expect.common)?;
            pass(step_num, &label, &expect.common);
        }
        TestStep::Event {
            event,
            thread_id,
            forget_references,
        } => {
            adapter.handle_event(parse_event(event, *thread_id)?);
            if *forget_references {
                channel.forget_references();
            }
            println!(
                "  {} Step {}: {}",
                "✓".green(),
                step_num,
                format!("event {event}").dimmed()
            );
        }
        TestStep::Concurrent {
            count,
            params,
            busy,
            succeeded,
        } => {
            let calls = (0..*count).map(|_| adapter.list_variables(list_params(params)));
            let results = join_all(calls).await;

            let ok = results.iter().filter(|r| r.is_ok()).count();
            let busy_count = results
                .iter()
                .filter(|r| matches!(r, Err(e) if e.code == ErrorCode::Busy))
                .count();

            if let Some(expected) = busy {
                if busy_count != *expected {
                    return Err(Error::TestAssertion(format!(
                        "Expected {expected} busy results, got {busy_count}"
                    )));
                }
            }
            if let Some(expected) = succeeded {
                if ok != *expected {
                    return Err(Error::TestAssertion(format!(
                        "Expected {expected} successful calls, got {ok}"
                    )));
                }
            }
            println!(
                "  {} Step {}: {}",
                "✓".green(),
                step_num,
                format!("{count} concurrent listings ({ok} ok, {busy_count} busy)").dimmed()
            );
        }
    }
    Ok(())
}

fn pass(step_num: usize, label: &str, common: &CommonExpectation) {
    let suffix = common
        .error
        .as_deref()
        .map(|code| format!(" (expected {code})"))
        .unwrap_or_default();
    println!(
        "  {} Step {}: {}{}",
        "✓".green(),
        step_num,
        label.dimmed(),
        suffix
    );
}

/// Match a step result against an expected error code, if any
fn check_outcome<T>(
    label: &str,
    result: InspectResult<T>,
    common: &CommonExpectation,
) -> Result<Option<T>> {
    match (result, common.error.as_deref()) {
        (Ok(value), None) => Ok(Some(value)),
        (Ok(_), Some(code)) => Err(Error::TestAssertion(format!(
            "'{label}' expected {code}, but succeeded"
        ))),
        (Err(e), Some(code)) if e.code.as_str() == code => Ok(None),
        (Err(e), _) => Err(Error::TestAssertion(format!("'{label}' failed: {e}"))),
    }
}

fn check_calls(channel: &ScriptedChannel, common: &CommonExpectation) -> Result<()> {
    for (verb, expected) in &common.calls {
        let actual = channel.calls_to(verb);
        if actual != *expected {
            return Err(Error::TestAssertion(format!(
                "Expected {expected} '{verb}' calls, got {actual}"
            )));
        }
    }
    Ok(())
}

fn reason_name(reason: TruncationReason) -> &'static str {
    match reason {
        TruncationReason::MaxDepth => "maxDepth",
        TruncationReason::Budget => "budget",
        TruncationReason::MaxChildren => "maxChildren",
    }
}

fn kind_name(kind: ScopeKind) -> &'static str {
    match kind {
        ScopeKind::Local => "local",
        ScopeKind::Closure => "closure",
        ScopeKind::Global => "global",
        ScopeKind::Other => "other",
    }
}

fn tier_name(tier: MutationTier) -> &'static str {
    match tier {
        MutationTier::SetVariable => "setVariable",
        MutationTier::SetExpression => "setExpression",
        MutationTier::Evaluate => "evaluate",
    }
}

fn expect_eq<T: PartialEq + std::fmt::Debug>(what: &str, expected: Option<T>, actual: T) -> Result<()> {
    match expected {
        Some(expected) if expected != actual => Err(Error::TestAssertion(format!(
            "{what}: expected {expected:?}, got {actual:?}"
        ))),
        _ => Ok(()),
    }
}

fn find_path<'a>(listing: &'a VariableListing, path: &str) -> Option<&'a EnhancedVariable> {
    let (head, rest) = path.split_once('.').unwrap_or((path, ""));
    listing.find(head)?.descendant(rest)
}

fn check_listing(listing: &VariableListing, expect: &ListExpectation) -> Result<()> {
    expect_eq("top-level variables", expect.top_level, listing.variables().count())?;
    expect_eq("budget exhausted", expect.budget_exhausted, listing.budget.exhausted)?;
    expect_eq("streaming suggestion", expect.suggestion, listing.suggestion.is_some())?;

    for assertion in &expect.scopes {
        check_scope(listing, assertion)?;
    }
    for assertion in &expect.variables {
        check_variable(listing, assertion)?;
    }
    Ok(())
}

fn check_scope(listing: &VariableListing, assertion: &ScopeAssertion) -> Result<()> {
    let scope = listing.scope(&assertion.name);
    let what = |field: &str| format!("Scope '{}' {field}", assertion.name);

    expect_eq(&what("present"), Some(assertion.present.unwrap_or(true)), scope.is_some())?;
    let Some(scope) = scope else {
        return Ok(());
    };
    expect_eq(&what("kind"), assertion.kind.as_deref(), kind_name(scope.kind))?;
    expect_eq(&what("expensive"), assertion.expensive, scope.expensive)?;
    expect_eq(&what("writable"), assertion.writable, scope.writable)?;
    expect_eq(&what("error"), assertion.error, scope.error.is_some())
}

fn check_variable(listing: &VariableListing, assertion: &VariableAssertion) -> Result<()> {
    let var = find_path(listing, &assertion.path);
    let what = |field: &str| format!("Variable '{}' {field}", assertion.path);

    let expected_present = assertion.present.unwrap_or(true);
    if var.is_some() != expected_present {
        let available: Vec<&str> = listing.variables().map(|v| v.name()).collect();
        return Err(Error::TestAssertion(format!(
            "Variable '{}' present={}, expected {}. Top level: {:?}",
            assertion.path,
            var.is_some(),
            expected_present,
            available
        )));
    }
    let Some(var) = var else {
        return Ok(());
    };

    expect_eq(&what("value"), assertion.value.as_deref(), var.value())?;
    if let Some(expected_substr) = &assertion.value_contains {
        if !var.value().contains(expected_substr.as_str()) {
            return Err(Error::TestAssertion(format!(
                "Variable '{}': expected value containing '{}', got '{}'",
                assertion.path,
                expected_substr,
                var.value()
            )));
        }
    }
    expect_eq(
        &what("type"),
        assertion.type_name.as_deref(),
        var.variable.type_name.as_deref().unwrap_or(""),
    )?;
    expect_eq(&what("truncated"), assertion.truncated, var.truncated)?;
    expect_eq(
        &what("reason"),
        assertion.reason.as_deref(),
        var.truncated_reason.map(reason_name).unwrap_or("none"),
    )?;
    expect_eq(&what("cycle"), assertion.cycle, var.cycle)?;
    expect_eq(&what("lazy"), assertion.lazy, var.lazy)?;
    expect_eq(&what("expandable"), assertion.expandable, var.expandable)?;
    expect_eq(&what("children"), assertion.children, var.children.len())?;
    expect_eq(&what("total children"), assertion.total_children, var.total_children.unwrap_or(0))?;
    expect_eq(
        &what("evaluate name"),
        assertion.evaluate_name.as_deref(),
        var.variable.evaluate_name.as_deref().unwrap_or(""),
    )
}

fn check_children(children: &[Variable], expect: &ChildrenExpectation) -> Result<()> {
    expect_eq("child count", expect.count, children.len())?;
    if let Some(names) = &expect.names {
        let actual: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
        let expected: Vec<&str> = names.iter().map(String::as_str).collect();
        expect_eq("child names", Some(expected), actual)?;
    }
    Ok(())
}

fn check_set(
    channel: &ScriptedChannel,
    value: &str,
    tier: MutationTier,
    expect: &SetExpectation,
) -> Result<()> {
    expect_eq("new value", expect.value.as_deref(), value)?;
    expect_eq("mutation tier", expect.tier.as_deref(), tier_name(tier))?;

    if let Some(expected) = &expect.assignment {
        let sent = channel.calls().into_iter().rev().find_map(|call| match call {
            Call::Evaluate { expression, .. } if expression.contains(" = ") => Some(expression),
            _ => None,
        });
        expect_eq("assignment", Some(expected.as_str()), sent.as_deref().unwrap_or(""))?;
    }
    Ok(())
}

fn check_evaluate(result: &str, type_name: Option<&str>, expect: &EvaluateExpectation) -> Result<()> {
    expect_eq("result", expect.result.as_deref(), result)?;
    if let Some(expected_substr) = &expect.result_contains {
        if !result.contains(expected_substr.as_str()) {
            return Err(Error::TestAssertion(format!(
                "Expected result containing '{}', got '{}'",
                expected_substr, result
            )));
        }
    }
    expect_eq("type", expect.type_name.as_deref(), type_name.unwrap_or(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::config::DebuggeeConfig;

    #[test]
    fn test_build_channel_assigns_references_and_paths() {
        let yaml = r#"
threads:
  - id: 1
    frames:
      - id: 1
        name: main
        source: app.js
        line: 2
        scopes:
          - name: Local
            variables:
              - name: list
                children:
                  - name: "0"
                    value: "1"
              - name: n
                value: "3"
"#;
        let debuggee: DebuggeeConfig = serde_yaml::from_str(yaml).unwrap();
        let channel = build_channel(&debuggee);
        assert_eq!(channel.value_of("n").as_deref(), Some("3"));

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let body = rt
            .block_on(channel.evaluate("list[0]", Some(1), "watch"))
            .unwrap();
        assert_eq!(body.result, "1");
    }
}
