//! DAP client for communicating with debug adapters
//!
//! This module handles the communication with an adapter subprocess,
//! including the initialization sequence and request/response handling.
//!
//! A reader task owns the adapter's output and routes each response to the
//! request waiting for it; a writer task owns its input. A caller that gives
//! up on a request (timeout, cancellation) only drops its receiver, so the
//! stream never loses its framing.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Notify};

use crate::common::{Error, Result};

use super::codec;
use super::types::*;

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<ResponseMessage>>>>;

/// DAP client for communicating with a debug adapter
pub struct DapClient {
    /// Adapter subprocess, absent when connected to raw streams
    adapter: Option<Child>,
    /// Frames queued for the writer task
    outgoing: mpsc::UnboundedSender<String>,
    /// Requests waiting for responses
    pending: PendingMap,
    /// Sequence number for requests
    seq: AtomicI64,
    /// Adapter capabilities (populated after initialize)
    pub capabilities: Capabilities,
    /// Timeout applied to each request
    request_timeout: Duration,
    /// Fired once the adapter sends `initialized`
    initialized: Arc<Notify>,
    /// Receiver for events (given to the session owner)
    event_rx: Option<mpsc::UnboundedReceiver<Event>>,
}

/// Forgets a pending request when its caller stops waiting
struct PendingGuard {
    pending: PendingMap,
    seq: i64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.seq);
    }
}

impl DapClient {
    /// Spawn a new DAP adapter and create a client
    pub async fn spawn(adapter_path: &Path, args: &[String]) -> Result<Self> {
        let mut cmd = Command::new(adapter_path);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut adapter = cmd.spawn().map_err(|e| {
            Error::AdapterStartFailed(format!(
                "Failed to start {}: {}",
                adapter_path.display(),
                e
            ))
        })?;

        let stdin = adapter
            .stdin
            .take()
            .ok_or_else(|| Error::AdapterStartFailed("Failed to get adapter stdin".to_string()))?;
        let stdout = adapter.stdout.take().ok_or_else(|| {
            Error::AdapterStartFailed("Failed to get adapter stdout".to_string())
        })?;

        let mut client = Self::connect(BufReader::new(stdout), BufWriter::new(stdin));
        client.adapter = Some(adapter);
        Ok(client)
    }

    /// Create a client over an already connected adapter
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let pending = PendingMap::default();
        let initialized = Arc::new(Notify::new());

        tokio::spawn(write_loop(writer, outgoing_rx));
        tokio::spawn(read_loop(
            reader,
            Arc::clone(&pending),
            event_tx,
            Arc::clone(&initialized),
        ));

        Self {
            adapter: None,
            outgoing,
            pending,
            seq: AtomicI64::new(1),
            capabilities: Capabilities::default(),
            request_timeout: Duration::from_secs(30),
            initialized,
            event_rx: Some(event_rx),
        }
    }

    /// Set the timeout applied to each request
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Take the event receiver (can only be called once)
    ///
    /// The receiver closes when the adapter's output ends.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<Event>> {
        self.event_rx.take()
    }

    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Queue a request, registering `reply` before it can be answered
    fn post(
        &self,
        command: &str,
        arguments: Option<Value>,
        reply: Option<oneshot::Sender<ResponseMessage>>,
    ) -> Result<i64> {
        let seq = self.next_seq();

        let mut request = serde_json::json!({
            "seq": seq,
            "type": "request",
            "command": command,
        });
        if let Some(args) = arguments {
            request["arguments"] = args;
        }

        let json = serde_json::to_string(&request)?;
        tracing::trace!(%command, seq, "DAP request: {}", json);

        if let Some(tx) = reply {
            self.pending.lock().insert(seq, tx);
        }
        if self.outgoing.send(json).is_err() {
            self.pending.lock().remove(&seq);
            return Err(Error::AdapterCrashed);
        }
        Ok(seq)
    }

    /// Send a request and wait for the response
    pub async fn request<T: serde::de::DeserializeOwned>(
        &mut self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        let seq = self.post(command, arguments, Some(tx))?;
        let _waiting = PendingGuard {
            pending: Arc::clone(&self.pending),
            seq,
        };

        let timeout = self.request_timeout;
        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            // reader task ended and dropped every waiter
            Ok(Err(_)) => return Err(Error::AdapterCrashed),
            Err(_) => return Err(Error::Timeout(timeout.as_secs())),
        };

        if !response.success {
            return Err(Error::dap_request_failed(
                command,
                &response.message.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }

        let body = response.body.unwrap_or(Value::Null);
        serde_json::from_value(body).map_err(|e| {
            Error::DapProtocol(format!("Failed to parse {} response: {}", command, e))
        })
    }

    /// Initialize the debug adapter
    pub async fn initialize(&mut self, adapter_id: &str) -> Result<Capabilities> {
        let args = InitializeArguments {
            adapter_id: adapter_id.to_string(),
            ..Default::default()
        };

        let caps: Capabilities = self
            .request("initialize", Some(serde_json::to_value(&args)?))
            .await
            .map_err(|e| Error::DapInitFailed(e.to_string()))?;

        self.capabilities = caps.clone();
        Ok(caps)
    }

    /// Wait for the initialized event
    ///
    /// The event itself is still delivered to the event receiver.
    pub async fn wait_initialized(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.initialized.notified())
            .await
            .map_err(|_| {
                Error::DapInitFailed(format!(
                    "no initialized event after {} seconds",
                    timeout.as_secs()
                ))
            })
    }

    /// Launch a program without waiting for the response
    ///
    /// Several adapters only answer `launch` after `configurationDone`; the
    /// response is dropped when it arrives.
    pub async fn launch_no_wait(&mut self, args: &LaunchArguments) -> Result<()> {
        self.post("launch", Some(serde_json::to_value(args)?), None)?;
        Ok(())
    }

    /// Signal that configuration is done
    pub async fn configuration_done(&mut self) -> Result<()> {
        self.request::<Value>("configurationDone", None).await?;
        Ok(())
    }

    /// Set breakpoints for a source file
    pub async fn set_breakpoints(
        &mut self,
        source_path: &Path,
        breakpoints: Vec<SourceBreakpoint>,
    ) -> Result<Vec<Breakpoint>> {
        let args = SetBreakpointsArguments {
            source: Source {
                path: Some(source_path.to_string_lossy().into_owned()),
                ..Default::default()
            },
            breakpoints,
        };

        let response: SetBreakpointsResponseBody = self
            .request("setBreakpoints", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.breakpoints)
    }

    /// Set function breakpoints
    pub async fn set_function_breakpoints(
        &mut self,
        breakpoints: Vec<FunctionBreakpoint>,
    ) -> Result<Vec<Breakpoint>> {
        let args = SetFunctionBreakpointsArguments { breakpoints };

        let response: SetBreakpointsResponseBody = self
            .request("setFunctionBreakpoints", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.breakpoints)
    }

    /// Get threads
    pub async fn threads(&mut self) -> Result<Vec<Thread>> {
        let response: ThreadsResponseBody = self.request("threads", None).await?;
        Ok(response.threads)
    }

    /// Get stack trace
    pub async fn stack_trace(
        &mut self,
        thread_id: i64,
        start_frame: i64,
        levels: i64,
    ) -> Result<Vec<StackFrame>> {
        let args = StackTraceArguments {
            thread_id,
            start_frame: Some(start_frame),
            levels: Some(levels),
        };

        let response: StackTraceResponseBody = self
            .request("stackTrace", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.stack_frames)
    }

    /// Get scopes for a frame
    pub async fn scopes(&mut self, frame_id: i64) -> Result<Vec<Scope>> {
        let args = ScopesArguments { frame_id };

        let response: ScopesResponseBody = self
            .request("scopes", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.scopes)
    }

    /// Get variables, optionally filtered and paged
    pub async fn variables(&mut self, args: VariablesArguments) -> Result<Vec<Variable>> {
        let response: VariablesResponseBody = self
            .request("variables", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.variables)
    }

    /// Set a variable inside a container
    pub async fn set_variable(
        &mut self,
        variables_reference: i64,
        name: &str,
        value: &str,
    ) -> Result<SetValueResponseBody> {
        let args = SetVariableArguments {
            variables_reference,
            name: name.to_string(),
            value: value.to_string(),
        };

        self.request("setVariable", Some(serde_json::to_value(&args)?))
            .await
    }

    /// Assign through an assignable expression
    pub async fn set_expression(
        &mut self,
        expression: &str,
        value: &str,
        frame_id: Option<i64>,
    ) -> Result<SetValueResponseBody> {
        let args = SetExpressionArguments {
            expression: expression.to_string(),
            value: value.to_string(),
            frame_id,
        };

        self.request("setExpression", Some(serde_json::to_value(&args)?))
            .await
    }

    /// Evaluate an expression
    pub async fn evaluate(
        &mut self,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
    ) -> Result<EvaluateResponseBody> {
        let args = EvaluateArguments {
            expression: expression.to_string(),
            frame_id,
            context: Some(context.to_string()),
        };

        self.request("evaluate", Some(serde_json::to_value(&args)?))
            .await
    }

    /// Disconnect from the debug adapter
    pub async fn disconnect(&mut self, terminate_debuggee: bool) -> Result<()> {
        let args = DisconnectArguments {
            restart: false,
            terminate_debuggee: Some(terminate_debuggee),
        };

        // Don't wait for the response, the adapter may exit immediately
        let _ = self.post("disconnect", Some(serde_json::to_value(&args)?), None);

        Ok(())
    }

    /// Terminate the adapter process
    pub async fn terminate(&mut self) -> Result<()> {
        let _ = self.disconnect(true).await;

        tokio::time::sleep(Duration::from_millis(100)).await;

        if let Some(adapter) = self.adapter.as_mut() {
            let _ = adapter.kill().await;
        }

        Ok(())
    }
}

impl Drop for DapClient {
    fn drop(&mut self) {
        // Best-effort, we can't await in drop
        if let Some(adapter) = self.adapter.as_mut() {
            let _ = adapter.start_kill();
        }
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(mut writer: W, mut outgoing: mpsc::UnboundedReceiver<String>) {
    while let Some(json) = outgoing.recv().await {
        if let Err(e) = codec::write_message(&mut writer, &json).await {
            tracing::debug!(error = %e, "Adapter input closed");
            break;
        }
    }
}

/// Route adapter output until it ends
///
/// Dropping `pending` and `events` on exit wakes every waiter with a closed
/// channel.
async fn read_loop<R: AsyncBufRead + Unpin>(
    mut reader: R,
    pending: PendingMap,
    events: mpsc::UnboundedSender<Event>,
    initialized: Arc<Notify>,
) {
    loop {
        let json = match codec::read_message(&mut reader).await {
            Ok(json) => json,
            Err(e) => {
                tracing::debug!(error = %e, "Adapter output closed");
                break;
            }
        };
        tracing::trace!("DAP message: {}", json);

        let msg: Value = match serde_json::from_str(&json) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed DAP message");
                continue;
            }
        };

        match msg.get("type").and_then(Value::as_str) {
            Some("response") => match serde_json::from_value::<ResponseMessage>(msg) {
                Ok(response) => {
                    let waiter = pending.lock().remove(&response.request_seq);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(response);
                        }
                        None => tracing::debug!(
                            request_seq = response.request_seq,
                            command = %response.command,
                            "Dropping response for an abandoned request"
                        ),
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Ignoring malformed DAP response"),
            },
            Some("event") => match serde_json::from_value::<EventMessage>(msg) {
                Ok(event_msg) => {
                    let event = Event::from_message(&event_msg);
                    if matches!(event, Event::Initialized) {
                        initialized.notify_one();
                    }
                    let _ = events.send(event);
                }
                Err(e) => tracing::warn!(error = %e, "Ignoring malformed DAP event"),
            },
            other => tracing::warn!(message_type = ?other, "Unknown DAP message type"),
        }
    }

    pending.lock().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    type AdapterSide = (BufReader<ReadHalf<DuplexStream>>, WriteHalf<DuplexStream>);

    fn connected(timeout: Duration) -> (DapClient, AdapterSide) {
        let (client_io, adapter_io) = tokio::io::duplex(8192);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (adapter_read, adapter_write) = tokio::io::split(adapter_io);
        let client = DapClient::connect(BufReader::new(client_read), client_write)
            .with_request_timeout(timeout);
        (client, (BufReader::new(adapter_read), adapter_write))
    }

    async fn next_request(reader: &mut BufReader<ReadHalf<DuplexStream>>) -> (i64, String) {
        let msg: Value = serde_json::from_str(&codec::read_message(reader).await.unwrap()).unwrap();
        (
            msg["seq"].as_i64().unwrap(),
            msg["command"].as_str().unwrap().to_string(),
        )
    }

    fn threads_response(request_seq: i64, thread_id: i64) -> String {
        serde_json::json!({
            "seq": 100 + request_seq,
            "type": "response",
            "request_seq": request_seq,
            "success": true,
            "command": "threads",
            "body": { "threads": [{ "id": thread_id, "name": "main" }] }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_abandoned_request_keeps_stream_framed() {
        let (mut client, (mut reader, mut writer)) = connected(Duration::from_millis(50));

        let adapter = tokio::spawn(async move {
            let (first, _) = next_request(&mut reader).await;
            let body = threads_response(first, 1);
            let frame = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
            let (head, tail) = frame.split_at(frame.len() / 2);

            // answer half a frame, then stall past the caller's timeout
            writer.write_all(head.as_bytes()).await.unwrap();
            writer.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(150)).await;
            writer.write_all(tail.as_bytes()).await.unwrap();

            let (second, command) = next_request(&mut reader).await;
            assert_eq!(command, "threads");
            codec::write_message(&mut writer, &threads_response(second, 7))
                .await
                .unwrap();
            writer
        });

        assert!(matches!(client.threads().await, Err(Error::Timeout(_))));

        client.request_timeout = Duration::from_secs(5);
        let threads = client.threads().await.unwrap();
        assert_eq!(threads[0].id, 7);
        assert!(client.pending.lock().is_empty());
        adapter.await.unwrap();
    }

    #[tokio::test]
    async fn test_events_and_initialized_are_forwarded() {
        let (mut client, (_reader, mut writer)) = connected(Duration::from_secs(5));
        let mut events = client.take_event_receiver().unwrap();

        let initialized = r#"{"seq":1,"type":"event","event":"initialized"}"#;
        codec::write_message(&mut writer, initialized).await.unwrap();

        client.wait_initialized(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(events.recv().await, Some(Event::Initialized)));
    }

    #[tokio::test]
    async fn test_closed_output_fails_waiting_request() {
        let (mut client, (mut reader, writer)) = connected(Duration::from_secs(5));

        let adapter = tokio::spawn(async move {
            next_request(&mut reader).await;
            // both halves gone closes the adapter's end
            drop(writer);
            drop(reader);
        });

        assert!(matches!(client.threads().await, Err(Error::AdapterCrashed)));
        let mut events = client.take_event_receiver().unwrap();
        assert!(events.recv().await.is_none());
        adapter.await.unwrap();
    }
}
