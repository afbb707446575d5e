//! Live debug session for the `inspect` command
//!
//! Owns the adapter subprocess from launch until the program pauses, then
//! hands the client to the inspection core as a [`DapChannel`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::dap::{
    Capabilities, DapClient, Event, FunctionBreakpoint, LaunchArguments, SourceBreakpoint,
    StoppedEventBody,
};
use crate::inspect::{DapChannel, SessionInfo};

/// Where to pause, as given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointSpec {
    Line { file: PathBuf, line: u32 },
    Function { name: String },
}

impl BreakpointSpec {
    /// Parse `file:line` or a bare function name
    pub fn parse(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(Error::InvalidLocation("empty breakpoint".to_string()));
        }

        // Last ':' followed only by digits, so "C:\src\app.py:10" works
        if let Some((file, line)) = s.rsplit_once(':') {
            if !line.is_empty() && line.chars().all(|c| c.is_ascii_digit()) {
                let line: u32 = line
                    .parse()
                    .map_err(|_| Error::InvalidLocation(format!("invalid line number: {line}")))?;
                if file.is_empty() {
                    return Err(Error::InvalidLocation(format!("missing file in '{s}'")));
                }
                return Ok(Self::Line {
                    file: PathBuf::from(file),
                    line,
                });
            }
        }

        Ok(Self::Function {
            name: s.to_string(),
        })
    }
}

pub struct LiveSession {
    channel: Arc<DapChannel>,
    events: mpsc::UnboundedReceiver<Event>,
    capabilities: Capabilities,
    info: SessionInfo,
    stop_wait: Duration,
}

impl LiveSession {
    /// Spawn the adapter, launch `program` and arm the breakpoints
    #[tracing::instrument(skip(config, args, breakpoints), fields(program = %program.display()))]
    pub async fn launch(
        config: &Config,
        program: &Path,
        args: Vec<String>,
        adapter_name: Option<String>,
        breakpoints: &[String],
    ) -> Result<Self> {
        let adapter_name = adapter_name.unwrap_or_else(|| config.defaults.adapter.clone());
        let adapter_config = config
            .get_adapter(&adapter_name)
            .ok_or_else(|| Error::adapter_not_found(&adapter_name, &[&adapter_name]))?;

        // Parse up front so a typo fails before anything is spawned
        let specs = breakpoints
            .iter()
            .map(|b| BreakpointSpec::parse(b))
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            adapter = %adapter_name,
            adapter_path = %adapter_config.path.display(),
            adapter_args = ?adapter_config.args,
            "Launching debug session"
        );

        let request_timeout = Duration::from_secs(config.timeouts.dap_request_secs);
        let init_timeout = Duration::from_secs(config.timeouts.dap_initialize_secs);

        let mut client = DapClient::spawn(&adapter_config.path, &adapter_config.args)
            .await?
            .with_request_timeout(request_timeout);
        let events = client
            .take_event_receiver()
            .ok_or_else(|| Error::Internal("event receiver already taken".to_string()))?;

        let capabilities =
            match tokio::time::timeout(init_timeout, client.initialize(&adapter_name)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Error::DapInitFailed(format!(
                        "no initialize response after {} seconds",
                        init_timeout.as_secs()
                    )))
                }
            };
        tracing::debug!(?capabilities, "DAP adapter initialized");

        let session_type = adapter_config
            .session_type
            .clone()
            .unwrap_or_else(|| adapter_name.clone());

        let launch_args = LaunchArguments {
            program: program.to_string_lossy().into_owned(),
            args,
            cwd: std::env::current_dir()
                .ok()
                .map(|p| p.to_string_lossy().into_owned()),
            stop_on_entry: specs.is_empty(),
            extra: launch_extras(&session_type),
        };

        // Some adapters only answer launch after configurationDone
        client.launch_no_wait(&launch_args).await?;
        client.wait_initialized(request_timeout).await?;
        tracing::debug!("Received DAP initialized event");

        set_breakpoints(&mut client, specs).await;

        client.configuration_done().await?;
        tracing::debug!("DAP configuration complete, program starting");

        let info = SessionInfo::new(
            format!("{adapter_name}:{}", program.display()),
            session_type,
        );

        Ok(Self {
            channel: Arc::new(DapChannel::new(client)),
            events,
            capabilities,
            info,
            stop_wait: Duration::from_secs(config.timeouts.stop_wait_secs),
        })
    }

    pub fn channel(&self) -> Arc<DapChannel> {
        Arc::clone(&self.channel)
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Wait until the program pauses
    ///
    /// Fails if it exits first or nothing happens within the stop timeout.
    pub async fn wait_stopped(&mut self) -> Result<StoppedEventBody> {
        let timeout = self.stop_wait;
        match tokio::time::timeout(timeout, next_stop(&mut self.events)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(timeout.as_secs())),
        }
    }

    /// Events that arrived while requests were in flight
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// Terminate the debuggee and the adapter
    pub async fn shutdown(self) {
        let mut client = self.channel.client().lock().await;
        if let Err(e) = client.terminate().await {
            tracing::debug!(error = %e, "Adapter shutdown failed");
        }
    }
}

async fn next_stop(events: &mut mpsc::UnboundedReceiver<Event>) -> Result<StoppedEventBody> {
    loop {
        // closed once the adapter's output ends
        let event = events.recv().await.ok_or(Error::AdapterCrashed)?;
        if let Some(stop) = stop_from(event)? {
            return Ok(stop);
        }
    }
}

fn stop_from(event: Event) -> Result<Option<StoppedEventBody>> {
    match event {
        Event::Stopped(body) => Ok(Some(body)),
        Event::Exited(body) => Err(Error::SessionTerminated(format!(
            "program exited with code {} before pausing",
            body.exit_code
        ))),
        Event::Terminated => Err(Error::SessionTerminated(
            "program terminated before pausing".to_string(),
        )),
        other => {
            tracing::trace!(?other, "Ignoring event while waiting for a stop");
            Ok(None)
        }
    }
}

/// Adapter-specific launch fields
fn launch_extras(session_type: &str) -> serde_json::Map<String, serde_json::Value> {
    let mut extra = serde_json::Map::new();
    match session_type {
        "debugpy" | "python" => {
            extra.insert("request".into(), "launch".into());
            extra.insert("console".into(), "internalConsole".into());
            extra.insert("justMyCode".into(), true.into());
        }
        "pwa-node" | "node" | "pwa-chrome" => {
            extra.insert("type".into(), session_type.into());
            extra.insert("request".into(), "launch".into());
        }
        _ => {}
    }
    extra
}

async fn set_breakpoints(client: &mut DapClient, specs: Vec<BreakpointSpec>) {
    let mut by_file: HashMap<PathBuf, Vec<SourceBreakpoint>> = HashMap::new();
    let mut functions = Vec::new();
    for spec in specs {
        match spec {
            BreakpointSpec::Line { file, line } => {
                let file = file.canonicalize().unwrap_or(file);
                by_file.entry(file).or_default().push(SourceBreakpoint {
                    line,
                    condition: None,
                });
            }
            BreakpointSpec::Function { name } => functions.push(FunctionBreakpoint {
                name,
                condition: None,
            }),
        }
    }

    for (file, bps) in by_file {
        match client.set_breakpoints(&file, bps).await {
            Ok(results) => {
                for bp in results {
                    tracing::debug!(verified = bp.verified, line = bp.line, "Source breakpoint set");
                }
            }
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "Failed to set breakpoints")
            }
        }
    }

    if !functions.is_empty() {
        match client.set_function_breakpoints(functions).await {
            Ok(results) => {
                for bp in results {
                    tracing::debug!(verified = bp.verified, "Function breakpoint set");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to set function breakpoints"),
        }
    }
}
