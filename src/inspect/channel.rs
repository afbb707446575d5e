//! The debug session channel seam
//!
//! The inspection core only needs seven request verbs from a paused
//! debuggee. [`DebugChannel`] abstracts them so the core runs the same over
//! a live adapter ([`DapChannel`]) or a scripted fake.

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::common::{Error, Result};
use crate::dap::{
    DapClient, EvaluateResponseBody, Scope, SetValueResponseBody, StackFrame, Thread, Variable,
    VariablesArguments,
};

/// Identity of a live debug session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    /// Session type reported by the protocol (`pwa-node`, `debugpy`, ...)
    pub session_type: String,
    /// Type named by the launch configuration, used as a lookup fallback
    pub configured_type: Option<String>,
}

impl SessionInfo {
    pub fn new(id: impl Into<String>, session_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            session_type: session_type.into(),
            configured_type: None,
        }
    }

    pub fn with_configured_type(mut self, configured: impl Into<String>) -> Self {
        self.configured_type = Some(configured.into());
        self
    }
}

/// Request verbs the inspection core issues against a paused session
#[async_trait]
pub trait DebugChannel: Send + Sync {
    async fn threads(&self) -> Result<Vec<Thread>>;

    async fn stack_trace(
        &self,
        thread_id: i64,
        start_frame: i64,
        levels: i64,
    ) -> Result<Vec<StackFrame>>;

    async fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>>;

    async fn variables(&self, args: VariablesArguments) -> Result<Vec<Variable>>;

    async fn set_variable(
        &self,
        variables_reference: i64,
        name: &str,
        value: &str,
    ) -> Result<SetValueResponseBody>;

    async fn set_expression(
        &self,
        frame_id: i64,
        expression: &str,
        value: &str,
    ) -> Result<SetValueResponseBody>;

    async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
    ) -> Result<EvaluateResponseBody>;
}

/// Fail fast if `token` has fired
pub fn check_cancel(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Race a channel call against `token`
pub async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = token.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}

/// [`DebugChannel`] over a live adapter subprocess
///
/// The client sits behind an async mutex, so at most one request is in
/// flight per session.
pub struct DapChannel {
    client: Mutex<DapClient>,
}

impl DapChannel {
    pub fn new(client: DapClient) -> Self {
        Self {
            client: Mutex::new(client),
        }
    }

    /// Direct access for session control (launch, waiting for stops)
    pub fn client(&self) -> &Mutex<DapClient> {
        &self.client
    }
}

#[async_trait]
impl DebugChannel for DapChannel {
    async fn threads(&self) -> Result<Vec<Thread>> {
        self.client.lock().await.threads().await
    }

    async fn stack_trace(
        &self,
        thread_id: i64,
        start_frame: i64,
        levels: i64,
    ) -> Result<Vec<StackFrame>> {
        self.client
            .lock()
            .await
            .stack_trace(thread_id, start_frame, levels)
            .await
    }

    async fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>> {
        self.client.lock().await.scopes(frame_id).await
    }

    async fn variables(&self, args: VariablesArguments) -> Result<Vec<Variable>> {
        self.client.lock().await.variables(args).await
    }

    async fn set_variable(
        &self,
        variables_reference: i64,
        name: &str,
        value: &str,
    ) -> Result<SetValueResponseBody> {
        self.client
            .lock()
            .await
            .set_variable(variables_reference, name, value)
            .await
    }

    async fn set_expression(
        &self,
        frame_id: i64,
        expression: &str,
        value: &str,
    ) -> Result<SetValueResponseBody> {
        self.client
            .lock()
            .await
            .set_expression(expression, value, Some(frame_id))
            .await
    }

    async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
    ) -> Result<EvaluateResponseBody> {
        self.client
            .lock()
            .await
            .evaluate(expression, frame_id, context)
            .await
    }
}
