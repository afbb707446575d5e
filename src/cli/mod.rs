//! CLI command handling
//!
//! Runs the inspector commands and formats their output. `inspect` prints a
//! single JSON document on stdout; diagnostics go to the log.

mod session;

pub use session::{BreakpointSpec, LiveSession};

use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;
use serde::Serialize;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::dap::StoppedEventBody;
use crate::inspect::{
    AdapterFactory, DebugChannel, EvaluateOutcome, InspectError, InspectionService,
    ListVariablesParams, RuntimeAdapter, ScopeFilter, SessionEvent, SetVariableOutcome,
    SetVariableParams, StreamOutcome, StreamParams, VariableListing,
};
use crate::runtime;
use crate::testing;

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Inspect {
            program,
            args,
            adapter,
            breakpoints,
            depth,
            children,
            scope,
            include_expensive,
            assignments,
            expressions,
            stream,
        } => {
            let request = InspectRequest {
                list: ListVariablesParams {
                    max_depth: depth,
                    max_children: children,
                    include_expensive: include_expensive.then_some(true),
                    scope_filter: scope,
                    ..Default::default()
                },
                assignments,
                expressions,
                stream,
            };

            let program = program.canonicalize().unwrap_or(program);
            let mut session =
                LiveSession::launch(config, &program, args, adapter, &breakpoints).await?;
            let result = inspect_paused(config, &mut session, request).await;
            session.shutdown().await;

            let report = result?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }

        Commands::Test { scenarios, verbose } => run_tests(&scenarios, verbose).await,

        Commands::Types => {
            print_types(config)?;
            Ok(())
        }
    }
}

/// What to do once the program has paused
struct InspectRequest {
    list: ListVariablesParams,
    assignments: Vec<String>,
    expressions: Vec<String>,
    stream: Option<PathBuf>,
}

/// Per-item result, so one failed expression does not hide the others
#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum Outcome<T> {
    Ok(T),
    Error(InspectError),
}

impl<T> From<std::result::Result<T, InspectError>> for Outcome<T> {
    fn from(result: std::result::Result<T, InspectError>) -> Self {
        match result {
            Ok(value) => Self::Ok(value),
            Err(e) => Self::Error(e),
        }
    }
}

#[derive(Serialize)]
struct Labeled<T> {
    input: String,
    #[serde(flatten)]
    outcome: Outcome<T>,
}

#[derive(Serialize)]
struct InspectReport {
    session_type: String,
    runtime: &'static str,
    stop_reason: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    assignments: Vec<Labeled<SetVariableOutcome>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    listing: Option<VariableListing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<StreamOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    evaluations: Vec<Labeled<EvaluateOutcome>>,
}

async fn inspect_paused(
    config: &Config,
    session: &mut LiveSession,
    request: InspectRequest,
) -> Result<InspectReport> {
    let stop = session.wait_stopped().await?;
    tracing::info!(reason = %stop.reason, thread = ?stop.thread_id, "Program paused");

    let service = InspectionService::new(AdapterFactory::from_config(config)?);
    let channel: Arc<dyn DebugChannel> = session.channel();
    let session_id = session.info().id.clone();
    service.register_session(
        session.info().clone(),
        channel,
        Some(session.capabilities().clone()),
    );
    let adapter = service.adapter(&session_id)?;
    adapter.handle_event(SessionEvent::Stopped {
        thread_id: stop.thread_id,
    });

    let mut report = InspectReport {
        session_type: session.info().session_type.clone(),
        runtime: adapter.hooks().info().id,
        stop_reason: stop_reason(&stop),
        assignments: Vec::new(),
        listing: None,
        stream: None,
        evaluations: Vec::new(),
    };

    for assignment in &request.assignments {
        let outcome = assign(&adapter, assignment).await;
        forward_events(&service, &session_id, session);
        report.assignments.push(Labeled {
            input: assignment.clone(),
            outcome: outcome.into(),
        });
    }

    match request.stream {
        Some(output_path) => {
            let outcome = adapter
                .stream_variables(StreamParams {
                    output_path,
                    list: request.list,
                })
                .await?;
            tracing::info!(
                path = %outcome.output_path.display(),
                variables = outcome.variable_count,
                "Variables streamed"
            );
            report.stream = Some(outcome);
        }
        None => report.listing = Some(adapter.list_variables(request.list).await?),
    }
    forward_events(&service, &session_id, session);

    for expression in &request.expressions {
        let outcome = adapter.evaluate_expression(expression, None).await;
        forward_events(&service, &session_id, session);
        report.evaluations.push(Labeled {
            input: expression.clone(),
            outcome: outcome.into(),
        });
    }

    service.dispose_all();
    Ok(report)
}

async fn assign(
    adapter: &RuntimeAdapter,
    assignment: &str,
) -> std::result::Result<SetVariableOutcome, InspectError> {
    let (name, value) = assignment.split_once('=').ok_or_else(|| {
        InspectError::invalid_params(format!("expected name=value, got '{assignment}'"))
    })?;
    adapter
        .set_variable(SetVariableParams {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
            ..Default::default()
        })
        .await
}

/// Hand adapter events that arrived mid-request to the inspection service
fn forward_events(service: &InspectionService, session_id: &str, session: &mut LiveSession) {
    for event in session.drain_events() {
        if let Some(signal) = SessionEvent::from_dap(&event) {
            tracing::debug!(?signal, "Forwarding session event");
            service.handle_event(session_id, signal);
        }
    }
}

fn stop_reason(stop: &StoppedEventBody) -> String {
    match &stop.description {
        Some(description) => format!("{} ({description})", stop.reason),
        None => stop.reason.clone(),
    }
}

async fn run_tests(scenarios: &[PathBuf], verbose: bool) -> Result<()> {
    let mut failed = Vec::new();
    for path in scenarios {
        let result = testing::run_scenario(path, verbose).await?;
        if !result.passed {
            failed.push(result.name);
        }
    }

    let passed = scenarios.len() - failed.len();
    println!(
        "{} {} passed, {} failed",
        "Summary:".blue().bold(),
        passed.to_string().green(),
        failed.len().to_string().red()
    );

    if failed.is_empty() {
        Ok(())
    } else {
        Err(Error::TestAssertion(format!(
            "failed scenarios: {}",
            failed.join(", ")
        )))
    }
}

fn print_types(config: &Config) -> Result<()> {
    println!("Runtimes:");
    for info in runtime::all_runtimes() {
        println!("  {:<10} {}", info.id, info.name);
        println!("  {:<10} {}", "", info.description.dimmed());
        println!("  {:<10} session types: {}", "", info.session_types.join(", "));
    }

    let factory = AdapterFactory::from_config(config)?;
    let builtin: Vec<&str> = runtime::all_runtimes()
        .iter()
        .flat_map(|info| info.session_types.iter().copied())
        .collect();
    let aliases: Vec<String> = factory
        .supported_types()
        .into_iter()
        .filter(|t| !builtin.contains(&t.as_str()))
        .collect();
    if !aliases.is_empty() {
        println!();
        println!("Configured aliases: {}", aliases.join(", "));
    }

    println!();
    println!("Scope filters: {}", scope_filters());
    Ok(())
}

fn scope_filters() -> String {
    [
        ScopeFilter::All,
        ScopeFilter::Local,
        ScopeFilter::Closure,
        ScopeFilter::Global,
    ]
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join(", ")
}
