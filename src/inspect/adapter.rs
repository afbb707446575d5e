//! Per-session inspection adapter
//!
//! One [`RuntimeAdapter`] exists per live session. It owns the memory
//! budget, the pause-scoped caches and the runtime hooks, and runs every
//! operation under a session-scoped lock.
//!
//! Each pause is an epoch. Invalidation clears the caches, drops held locks
//! and cancels the epoch's token, so a call still running against the old
//! pause ends with `E_STALE_REFERENCE` instead of racing a fresh one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::common::config::InspectionConfig;
use crate::common::Error;
use crate::dap::{Event, Scope, Variable};
use crate::runtime::{self, Probe, RuntimeHooks, ScopeClass};

use super::budget::{BudgetLimits, BudgetStatus, MemoryBudget};
use super::capabilities::CapabilityDescriptor;
use super::channel::{cancellable, DebugChannel, SessionInfo};
use super::error::{ErrorCode, InspectError, InspectResult};
use super::expand::{fetch_children, ChildrenKey, ExpandOptions, Expander, TraversalCache};
use super::lock::OperationLockManager;
use super::mutation::{self, MutationTarget};
use super::sink::{JsonlFileSink, VariableSink};
use super::variable::{
    ChildrenParams, EnhancedVariable, EvaluateOutcome, ListVariablesParams, ScopeListing,
    SetVariableOutcome, SetVariableParams, StreamOutcome, StreamParams, VariableListing,
};

/// Evaluate context for caller expressions
const EVALUATE_CONTEXT: &str = "watch";

/// Lock key shared by every operation that uses the memory budget
pub const TRAVERSAL_KEY: &str = "traverse";

/// Session lifecycle signals the adapter reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Stopped { thread_id: Option<i64> },
    Continued,
    StackItemChanged,
    BreakpointsChanged,
    Invalidated,
    Terminated,
}

impl SessionEvent {
    /// Map a protocol event, `None` for events that leave the pause intact
    pub fn from_dap(event: &Event) -> Option<Self> {
        match event {
            Event::Stopped(body) => Some(Self::Stopped {
                thread_id: body.thread_id,
            }),
            Event::Continued { .. } => Some(Self::Continued),
            Event::Breakpoint { .. } => Some(Self::BreakpointsChanged),
            Event::Invalidated { .. } => Some(Self::Invalidated),
            Event::Terminated => Some(Self::Terminated),
            _ => None,
        }
    }
}

/// State valid for one pause
#[derive(Debug, Default)]
struct PauseState {
    scopes: HashMap<i64, Vec<Scope>>,
    scope_classes: HashMap<i64, ScopeClass>,
    last_stopped_thread: Option<i64>,
    /// References issued during earlier pauses
    stale: HashSet<i64>,
    /// Unknown scope kinds already reported; kept across pauses
    warned_kinds: HashSet<String>,
}

#[derive(Debug)]
struct Epoch {
    generation: u64,
    token: CancellationToken,
}

/// A scope that passed classification and filtering
struct VisibleScope {
    scope: Scope,
    class: ScopeClass,
}

pub struct RuntimeAdapter {
    session: SessionInfo,
    channel: Arc<dyn DebugChannel>,
    hooks: Arc<dyn RuntimeHooks>,
    caps: CapabilityDescriptor,
    config: InspectionConfig,
    locks: OperationLockManager,
    budget: Mutex<MemoryBudget>,
    traversal: Mutex<TraversalCache>,
    state: Mutex<PauseState>,
    session_token: CancellationToken,
    epoch: Mutex<Epoch>,
}

impl std::fmt::Debug for RuntimeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeAdapter")
            .field("session", &self.session)
            .field("runtime", &self.hooks.info().id)
            .field("disposed", &self.session_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RuntimeAdapter {
    /// Adapter with the runtime's default capabilities and budget
    pub fn new(
        session: SessionInfo,
        channel: Arc<dyn DebugChannel>,
        hooks: Arc<dyn RuntimeHooks>,
    ) -> Self {
        let session_token = CancellationToken::new();
        let epoch = Epoch {
            generation: 0,
            token: session_token.child_token(),
        };
        Self {
            caps: hooks.capabilities(),
            budget: Mutex::new(MemoryBudget::new(hooks.budget_limits())),
            session,
            channel,
            hooks,
            config: InspectionConfig::default(),
            locks: OperationLockManager::new(),
            traversal: Mutex::new(TraversalCache::default()),
            state: Mutex::new(PauseState::default()),
            session_token,
            epoch: Mutex::new(epoch),
        }
    }

    pub fn with_config(mut self, config: InspectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_budget(self, limits: BudgetLimits) -> Self {
        *self.budget.lock() = MemoryBudget::new(limits);
        self
    }

    pub fn with_capabilities(mut self, caps: CapabilityDescriptor) -> Self {
        self.caps = caps;
        self
    }

    /// Share a lock table with other adapters
    pub fn with_locks(mut self, locks: OperationLockManager) -> Self {
        self.locks = locks;
        self
    }

    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    pub fn hooks(&self) -> &dyn RuntimeHooks {
        &*self.hooks
    }

    pub fn capabilities(&self) -> CapabilityDescriptor {
        self.caps
    }

    pub fn budget_status(&self) -> BudgetStatus {
        self.budget.lock().status()
    }

    pub fn locks(&self) -> &OperationLockManager {
        &self.locks
    }

    pub fn is_disposed(&self) -> bool {
        self.session_token.is_cancelled()
    }

    fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.config.lock_timeout_secs)
    }

    fn current_epoch(&self) -> (u64, CancellationToken) {
        let epoch = self.epoch.lock();
        (epoch.generation, epoch.token.clone())
    }

    /// Report cancellation caused by a newer pause as a stale reference
    fn settle<T>(&self, generation: u64, result: InspectResult<T>) -> InspectResult<T> {
        result.map_err(|e| {
            let moved_on = self.epoch.lock().generation != generation;
            if e.code == ErrorCode::SessionTerminated && moved_on && !self.is_disposed() {
                InspectError::new(ErrorCode::StaleReference)
                    .detail("The debuggee resumed or moved while the call was running")
            } else {
                e
            }
        })
    }

    /// Run `op` under `key` against the current epoch
    async fn locked<T, F, Fut>(&self, key: &str, op: F) -> InspectResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: std::future::Future<Output = InspectResult<T>>,
    {
        let (generation, parent) = self.current_epoch();
        let result = self
            .locks
            .with_lock(&self.session.id, key, self.lock_timeout(), &parent, op)
            .await;
        self.settle(generation, result)
    }

    fn expander<'a>(
        &'a self,
        token: &'a CancellationToken,
        frame_id: i64,
        params: &ListVariablesParams,
    ) -> Expander<'a> {
        Expander {
            channel: &*self.channel,
            hooks: &*self.hooks,
            caps: self.caps,
            budget: &self.budget,
            cache: &self.traversal,
            token,
            frame_id: Some(frame_id),
            options: ExpandOptions {
                max_depth: params.max_depth.unwrap_or(self.config.max_depth),
                max_children: params.max_children.unwrap_or(self.config.max_children),
                identity_ancestors: self.config.identity_ancestors,
                max_identity_failures: self.config.max_identity_failures,
            },
        }
    }

    /// Resolve the thread and frame a call targets
    async fn resolve_frame(
        &self,
        thread_id: Option<i64>,
        frame_id: Option<i64>,
        token: &CancellationToken,
    ) -> InspectResult<(i64, i64)> {
        let probe = Probe::new(&*self.channel, token, None);

        let thread_id = match thread_id {
            Some(id) => id,
            None => {
                let cached = self.state.lock().last_stopped_thread;
                runtime::resolve_thread(self.hooks.thread_selection(), &probe, cached)
                    .await?
                    .ok_or_else(|| InspectError::new(ErrorCode::NoThreads))?
            }
        };

        let frame_id = match frame_id {
            Some(id) => id,
            None => {
                probe
                    .top_frame(thread_id)
                    .await?
                    .ok_or_else(|| {
                        InspectError::new(ErrorCode::NoStack)
                            .detail(format!("thread {thread_id} has no frames"))
                    })?
                    .id
            }
        };
        Ok((thread_id, frame_id))
    }

    async fn frame_scopes(&self, frame_id: i64, token: &CancellationToken) -> InspectResult<Vec<Scope>> {
        let cached = self.state.lock().scopes.get(&frame_id).cloned();
        if let Some(scopes) = cached {
            return Ok(scopes);
        }
        let scopes = cancellable(token, self.channel.scopes(frame_id)).await?;
        self.state.lock().scopes.insert(frame_id, scopes.clone());
        Ok(scopes)
    }

    fn classify(&self, scope: &Scope) -> ScopeClass {
        let (raw, class) = runtime::classify(&*self.hooks, scope);
        class.unwrap_or_else(|| {
            if self.state.lock().warned_kinds.insert(raw.clone()) {
                tracing::warn!(
                    session = %self.session.id,
                    runtime = self.hooks.info().id,
                    kind = %raw,
                    scope = %scope.name,
                    "Unrecognized scope kind, treating as read-only"
                );
            }
            ScopeClass::UNKNOWN
        })
    }

    /// Scopes of `frame_id` that survive the expensive and kind filters
    async fn visible_scopes(
        &self,
        frame_id: i64,
        params: &ListVariablesParams,
        token: &CancellationToken,
    ) -> InspectResult<Vec<VisibleScope>> {
        let include_expensive = params
            .include_expensive
            .unwrap_or(self.config.include_expensive);

        let mut visible = Vec::new();
        for scope in self.frame_scopes(frame_id, token).await? {
            let class = self.classify(&scope);
            if (scope.expensive || class.expensive) && !include_expensive {
                tracing::debug!(scope = %scope.name, "Skipping expensive scope");
                continue;
            }
            if !params.scope_filter.admits(class.kind) {
                continue;
            }

            self.state
                .lock()
                .scope_classes
                .insert(scope.variables_reference, class);
            self.traversal.lock().issued.insert(scope.variables_reference);
            visible.push(VisibleScope { scope, class });
        }
        Ok(visible)
    }

    async fn scope_variables(
        &self,
        scope: &Scope,
        token: &CancellationToken,
    ) -> crate::common::Result<Vec<Variable>> {
        let key = ChildrenKey {
            reference: scope.variables_reference,
            filter: None,
            start: None,
            count: self
                .caps
                .supports_variable_paging
                .then_some(self.config.scope_page_size),
        };
        fetch_children(&*self.channel, &self.traversal, token, key).await
    }

    /// List the variables of one frame, expanded under the memory budget
    #[tracing::instrument(skip(self, params), fields(session = %self.session.id))]
    pub async fn list_variables(&self, params: ListVariablesParams) -> InspectResult<VariableListing> {
        self.locked(TRAVERSAL_KEY, |token| async move {
            self.list_in_frame(params, token).await
        })
        .await
    }

    async fn list_in_frame(
        &self,
        params: ListVariablesParams,
        token: CancellationToken,
    ) -> InspectResult<VariableListing> {
        self.budget.lock().reset();

        let (thread_id, frame_id) = self
            .resolve_frame(params.thread_id, params.frame_id, &token)
            .await?;
        let expander = self.expander(&token, frame_id, &params);

        let mut scopes = Vec::new();
        for VisibleScope { scope, class } in self.visible_scopes(frame_id, &params, &token).await? {
            let mut listing = ScopeListing {
                name: scope.name.clone(),
                kind: class.kind,
                expensive: scope.expensive || class.expensive,
                writable: class.writable,
                reference: scope.variables_reference,
                variables: Vec::new(),
                error: None,
            };

            match self.scope_variables(&scope, &token).await {
                Ok(variables) => listing.variables = expander.expand_all(variables).await?,
                Err(Error::Cancelled) => return Err(Error::Cancelled.into()),
                Err(e) => {
                    tracing::debug!(scope = %scope.name, error = %e, "Scope fetch failed");
                    listing.error = Some(e.to_string());
                }
            }
            scopes.push(listing);
        }

        let budget = self.budget.lock();
        let suggestion = budget.is_exhausted().then(|| budget.streaming_suggestion());
        if suggestion.is_some() {
            tracing::info!(
                nodes = budget.current_nodes(),
                bytes = budget.current_bytes(),
                "Listing hit the memory budget"
            );
        }

        Ok(VariableListing {
            thread_id,
            frame_id,
            scopes,
            budget: budget.status(),
            suggestion,
        })
    }

    /// Fetch one page of a container's direct children
    #[tracing::instrument(skip(self, params), fields(session = %self.session.id, reference = params.reference))]
    pub async fn get_variable_children(&self, params: ChildrenParams) -> InspectResult<Vec<Variable>> {
        if params.reference <= 0 {
            return Err(InspectError::with_message(
                ErrorCode::InvalidReference,
                format!("Reference {} has no children", params.reference),
            ));
        }
        let paged = params.start.is_some() || params.count.is_some();
        if paged && !self.caps.supports_variable_paging {
            return Err(InspectError::unsupported_capability("variablePaging"));
        }

        let key = format!("get-children:{}", params.reference);
        self.locked(&key, |token| async move { self.children_page(params, token).await })
            .await
    }

    async fn children_page(
        &self,
        params: ChildrenParams,
        token: CancellationToken,
    ) -> InspectResult<Vec<Variable>> {
        let key = ChildrenKey {
            reference: params.reference,
            filter: params.filter,
            start: params.start,
            count: params.count.map(|c| c.min(self.config.children_page_size)),
        };

        match fetch_children(&*self.channel, &self.traversal, &token, key).await {
            Ok(children) => Ok(children),
            Err(Error::Cancelled) => Err(Error::Cancelled.into()),
            Err(e) => {
                let mapped = InspectError::from(&e);
                if mapped.is_session_state_error() {
                    return Err(mapped);
                }
                let stale = self.state.lock().stale.contains(&params.reference)
                    && !self.traversal.lock().issued.contains(&params.reference);
                let code = if stale {
                    ErrorCode::StaleReference
                } else {
                    ErrorCode::InvalidReference
                };
                Err(InspectError::new(code).detail(e.to_string()))
            }
        }
    }

    /// Write a new value through the first mutation tier that works
    #[tracing::instrument(skip(self, params), fields(session = %self.session.id, name = %params.name))]
    pub async fn set_variable(&self, params: SetVariableParams) -> InspectResult<SetVariableOutcome> {
        if params.name.trim().is_empty() {
            return Err(InspectError::with_message(
                ErrorCode::MissingRequiredParam,
                "A variable name is required",
            ));
        }

        let (generation, parent) = self.current_epoch();
        let resolved = self.resolve_frame(None, params.frame_id, &parent).await;
        let (thread_id, frame_id) = self.settle(generation, resolved)?;

        let key = format!(
            "set-variable:{thread_id}:{frame_id}:{}:{}",
            params.reference.unwrap_or(0),
            params.name
        );
        self.locked(&key, |token| async move {
            self.mutate(params, frame_id, token).await
        })
        .await
    }

    async fn mutate(
        &self,
        params: SetVariableParams,
        frame_id: i64,
        token: CancellationToken,
    ) -> InspectResult<SetVariableOutcome> {
        let read_only = params
            .reference
            .and_then(|r| self.state.lock().scope_classes.get(&r).copied())
            .is_some_and(|class| !class.writable);

        let target = MutationTarget {
            name: &params.name,
            value: &params.value,
            reference: params.reference,
            frame_id,
            read_only,
        };
        let outcome =
            mutation::apply(&*self.channel, &self.caps, self.hooks.literals(), &token, &target)
                .await?;

        // Cached children may hold the old value
        self.traversal.lock().children.clear();
        tracing::debug!(tier = ?outcome.tier, "Variable updated");
        Ok(outcome)
    }

    /// Evaluate an expression in a paused frame
    #[tracing::instrument(skip(self), fields(session = %self.session.id))]
    pub async fn evaluate_expression(
        &self,
        expression: &str,
        frame_id: Option<i64>,
    ) -> InspectResult<EvaluateOutcome> {
        if expression.trim().is_empty() {
            return Err(InspectError::with_message(
                ErrorCode::MissingRequiredParam,
                "An expression is required",
            ));
        }
        if !self.caps.supports_evaluate {
            return Err(InspectError::unsupported_capability("evaluate"));
        }

        let key = format!("evaluate:{expression}");
        self.locked(&key, |token| async move {
            self.evaluate_in_frame(expression, frame_id, token).await
        })
        .await
    }

    async fn evaluate_in_frame(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        token: CancellationToken,
    ) -> InspectResult<EvaluateOutcome> {
        let (_, frame_id) = self.resolve_frame(None, frame_id, &token).await?;
        let body = cancellable(
            &token,
            self.channel.evaluate(expression, Some(frame_id), EVALUATE_CONTEXT),
        )
        .await?;
        if body.variables_reference > 0 {
            self.traversal.lock().issued.insert(body.variables_reference);
        }
        Ok(EvaluateOutcome {
            result: body.result,
            type_name: body.type_name,
            reference: body.variables_reference,
        })
    }

    /// Stream every top-level variable to a JSON lines file
    pub async fn stream_variables(&self, params: StreamParams) -> InspectResult<StreamOutcome> {
        let mut sink = JsonlFileSink::create(&params.output_path).await?;
        self.stream_variables_to(params.list, &mut sink).await
    }

    /// Stream every top-level variable to `sink`, one record each
    ///
    /// The budget is reset for every record, so one large variable can't
    /// starve the ones after it.
    #[tracing::instrument(skip_all, fields(session = %self.session.id))]
    pub async fn stream_variables_to(
        &self,
        params: ListVariablesParams,
        sink: &mut dyn VariableSink,
    ) -> InspectResult<StreamOutcome> {
        self.locked(TRAVERSAL_KEY, |token| async move {
            self.stream_records(params, sink, token).await
        })
        .await
    }

    async fn stream_records(
        &self,
        params: ListVariablesParams,
        sink: &mut dyn VariableSink,
        token: CancellationToken,
    ) -> InspectResult<StreamOutcome> {
        let (_, frame_id) = self
            .resolve_frame(params.thread_id, params.frame_id, &token)
            .await?;
        let expander = self.expander(&token, frame_id, &params);

        let mut outcome = StreamOutcome {
            output_path: sink.location(),
            variable_count: 0,
            byte_count: 0,
            truncated_count: 0,
        };

        for VisibleScope { scope, .. } in self.visible_scopes(frame_id, &params, &token).await? {
            let variables = match self.scope_variables(&scope, &token).await {
                Ok(variables) => variables,
                Err(Error::Cancelled) => return Err(Error::Cancelled.into()),
                Err(e) => {
                    tracing::warn!(scope = %scope.name, error = %e, "Skipping scope that failed to load");
                    continue;
                }
            };

            for variable in variables {
                self.budget.lock().reset();
                let records: Vec<EnhancedVariable> = expander.expand_all(vec![variable]).await?;
                for record in &records {
                    outcome.byte_count += sink.write(record).await?;
                    outcome.variable_count += 1;
                    if record.truncated {
                        outcome.truncated_count += 1;
                    }
                }
            }
        }

        sink.finish().await?;
        tracing::info!(
            path = %outcome.output_path.display(),
            variables = outcome.variable_count,
            bytes = outcome.byte_count,
            "Streamed variables"
        );
        Ok(outcome)
    }

    /// React to a session lifecycle signal
    pub fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Terminated => self.dispose(),
            SessionEvent::Stopped { thread_id } => {
                self.invalidate("stopped");
                self.state.lock().last_stopped_thread = thread_id;
            }
            SessionEvent::Continued => self.invalidate("continued"),
            SessionEvent::StackItemChanged => self.invalidate("stack item changed"),
            SessionEvent::BreakpointsChanged => self.invalidate("breakpoints changed"),
            SessionEvent::Invalidated => self.invalidate("invalidated"),
        }
    }

    /// Drop everything tied to the current pause
    pub fn invalidate(&self, reason: &str) {
        let issued = {
            let mut cache = self.traversal.lock();
            let issued = std::mem::take(&mut cache.issued);
            cache.clear();
            issued
        };
        {
            let mut state = self.state.lock();
            state.scopes.clear();
            state.scope_classes.clear();
            state.last_stopped_thread = None;
            state.stale.extend(issued);
        }
        {
            let mut epoch = self.epoch.lock();
            epoch.token.cancel();
            epoch.generation += 1;
            epoch.token = self.session_token.child_token();
        }
        let released = self.locks.release_session(&self.session.id);
        tracing::debug!(session = %self.session.id, reason, released, "Invalidated inspection caches");
    }

    /// Release everything; later calls fail with `E_SESSION_TERMINATED`
    pub fn dispose(&self) {
        if self.session_token.is_cancelled() {
            return;
        }
        self.session_token.cancel();
        self.traversal.lock().clear();
        *self.state.lock() = PauseState::default();
        self.budget.lock().reset();
        self.locks.release_session(&self.session.id);
        tracing::debug!(session = %self.session.id, "Disposed inspection adapter");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dap::StoppedEventBody;
    use crate::inspect::variable::ScopeKind;
    use crate::runtime::{cdp::CdpHooks, coreclr::CoreClrHooks, debugpy::DebugpyHooks};
    use crate::testing::{ScriptedChannel, LOCAL_SCOPE_REF};

    fn adapter(channel: &Arc<ScriptedChannel>, hooks: Arc<dyn RuntimeHooks>) -> RuntimeAdapter {
        let channel: Arc<dyn DebugChannel> = channel.clone();
        RuntimeAdapter::new(SessionInfo::new("s1", "test"), channel, hooks)
    }

    fn scope(name: &str, reference: i64, expensive: bool) -> Scope {
        Scope {
            name: name.to_string(),
            variables_reference: reference,
            expensive,
            presentation_hint: None,
            named_variables: None,
            indexed_variables: None,
            source: None,
            line: None,
        }
    }

    fn container(name: &str, reference: i64) -> Variable {
        Variable {
            variables_reference: reference,
            evaluate_name: Some(name.to_string()),
            ..Variable::leaf(name, "Object")
        }
    }

    #[tokio::test]
    async fn test_unknown_scope_kind_listed_read_only() {
        let channel = Arc::new(
            ScriptedChannel::builder()
                .local("a", "1")
                .scope_with(1, scope("Mystery Box", 2000, false))
                .var(2000, Variable::leaf("m", "2"))
                .build(),
        );
        let adapter = adapter(&channel, Arc::new(CdpHooks));

        let listing = adapter.list_variables(Default::default()).await.unwrap();
        let mystery = listing.scope("Mystery Box").unwrap();
        assert_eq!(mystery.kind, ScopeKind::Other);
        assert!(!mystery.expensive && !mystery.writable);
        assert_eq!(mystery.variables.len(), 1);
        assert!(adapter.state.lock().warned_kinds.contains("mystery"));

        let locals = ListVariablesParams {
            scope_filter: crate::inspect::variable::ScopeFilter::Local,
            ..Default::default()
        };
        let listing = adapter.list_variables(locals).await.unwrap();
        assert!(listing.scope("Mystery Box").is_none());
        assert!(listing.find("a").is_some());
    }

    #[tokio::test]
    async fn test_expensive_scopes_need_opt_in() {
        let channel = Arc::new(
            ScriptedChannel::builder()
                .local("a", "1")
                .scope_with(1, scope("Global", 3000, false))
                .var(3000, Variable::leaf("process", "Object"))
                .build(),
        );
        let adapter = adapter(&channel, Arc::new(CdpHooks));

        let listing = adapter.list_variables(Default::default()).await.unwrap();
        assert!(listing.scope("Global").is_none());

        let params = ListVariablesParams {
            include_expensive: Some(true),
            ..Default::default()
        };
        let listing = adapter.list_variables(params).await.unwrap();
        let global = listing.scope("Global").unwrap();
        assert!(global.expensive);
        assert_eq!(global.kind, ScopeKind::Global);
    }

    #[tokio::test]
    async fn test_no_threads_is_structured_error() {
        let channel = Arc::new(ScriptedChannel::builder().build());
        let adapter = adapter(&channel, Arc::new(DebugpyHooks));

        let err = adapter.list_variables(Default::default()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NoThreads);
        assert!(!adapter.locks().is_held("s1", TRAVERSAL_KEY));
    }

    #[tokio::test]
    async fn test_scope_fetch_failure_is_scope_error() {
        let channel = Arc::new(
            ScriptedChannel::builder()
                .local("a", "1")
                .scope_with(1, scope("Closure", 4000, false))
                .fail_reference(4000)
                .build(),
        );
        let adapter = adapter(&channel, Arc::new(CdpHooks));

        let listing = adapter.list_variables(Default::default()).await.unwrap();
        assert!(listing.scope("Closure").unwrap().error.is_some());
        assert_eq!(listing.find("a").unwrap().value(), "1");
    }

    #[tokio::test]
    async fn test_children_of_reference_zero_rejected() {
        let channel = Arc::new(ScriptedChannel::builder().build());
        let adapter = adapter(&channel, Arc::new(CdpHooks));

        let err = adapter
            .get_variable_children(ChildrenParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidReference);
        assert!(channel.calls().is_empty());
    }

    #[tokio::test]
    async fn test_paging_without_capability() {
        let channel = Arc::new(ScriptedChannel::builder().container(5).build());
        let caps = CapabilityDescriptor {
            supports_variable_paging: false,
            ..CapabilityDescriptor::STANDARD
        };
        let adapter = adapter(&channel, Arc::new(CdpHooks)).with_capabilities(caps);

        let params = ChildrenParams {
            reference: 5,
            count: Some(10),
            ..Default::default()
        };
        let err = adapter.get_variable_children(params).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedCapability);
        assert!(err.suggestion.is_some());
    }

    #[tokio::test]
    async fn test_reference_from_old_pause_is_stale() {
        let channel = Arc::new(
            ScriptedChannel::builder()
                .local("a", "1")
                .var(LOCAL_SCOPE_REF, container("obj", 10))
                .var(10, Variable::leaf("x", "1"))
                .build(),
        );
        let adapter = adapter(&channel, Arc::new(CdpHooks));
        adapter.list_variables(Default::default()).await.unwrap();

        adapter.handle_event(SessionEvent::Continued);
        channel.forget_references();

        let err = adapter
            .get_variable_children(ChildrenParams {
                reference: 10,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::StaleReference);

        let err = adapter
            .get_variable_children(ChildrenParams {
                reference: 777,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidReference);
    }

    #[tokio::test]
    async fn test_invalidation_cancels_in_flight_call() {
        let channel = Arc::new(
            ScriptedChannel::builder()
                .local("a", "1")
                .delay(Duration::from_millis(200))
                .build(),
        );
        let adapter = adapter(&channel, Arc::new(CdpHooks));

        let (result, _) = tokio::join!(adapter.list_variables(Default::default()), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            adapter.invalidate("test");
        });
        assert_eq!(result.unwrap_err().code, ErrorCode::StaleReference);
        assert_eq!(adapter.locks().held_count("s1"), 0);
    }

    #[tokio::test]
    async fn test_stopped_event_records_thread_after_clearing() {
        let channel = Arc::new(ScriptedChannel::builder().local("a", "1").build());
        let adapter = adapter(&channel, Arc::new(CoreClrHooks));
        adapter.list_variables(Default::default()).await.unwrap();
        assert!(!adapter.state.lock().scopes.is_empty());

        let event = Event::Stopped(StoppedEventBody {
            reason: "breakpoint".to_string(),
            description: None,
            thread_id: Some(7),
            all_threads_stopped: true,
        });
        adapter.handle_event(SessionEvent::from_dap(&event).unwrap());

        let state = adapter.state.lock();
        assert!(state.scopes.is_empty());
        assert_eq!(state.last_stopped_thread, Some(7));
        assert!(state.stale.contains(&LOCAL_SCOPE_REF));
    }

    #[tokio::test]
    async fn test_dispose_terminates_later_calls() {
        let channel = Arc::new(ScriptedChannel::builder().local("a", "1").build());
        let adapter = adapter(&channel, Arc::new(CdpHooks));
        adapter.handle_event(SessionEvent::Terminated);

        assert!(adapter.is_disposed());
        let err = adapter.list_variables(Default::default()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionTerminated);
        assert!(channel.calls().is_empty());
    }

    #[tokio::test]
    async fn test_set_variable_on_read_only_scope() {
        let channel = Arc::new(
            ScriptedChannel::builder()
                .local("a", "1")
                .scope_with(1, scope("Block", 5000, false))
                .var(5000, Variable::leaf("b", "2"))
                .fail("setExpression")
                .fail("evaluate")
                .build(),
        );
        let adapter = adapter(&channel, Arc::new(CdpHooks));
        adapter.list_variables(Default::default()).await.unwrap();

        let err = adapter
            .set_variable(SetVariableParams {
                name: "b".to_string(),
                value: "3".to_string(),
                reference: Some(5000),
                frame_id: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ReadOnly);
        assert_eq!(channel.calls_to("setVariable"), 0);
    }

    #[tokio::test]
    async fn test_evaluate_records_issued_reference() {
        let channel = Arc::new(
            ScriptedChannel::builder()
                .local("a", "1")
                .var(LOCAL_SCOPE_REF, container("obj", 10))
                .container(10)
                .build(),
        );
        let adapter = adapter(&channel, Arc::new(CdpHooks));

        let outcome = adapter.evaluate_expression("obj", None).await.unwrap();
        assert_eq!(outcome.reference, 10);
        assert!(adapter.traversal.lock().issued.contains(&10));

        let err = adapter.evaluate_expression("  ", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingRequiredParam);
    }
}
