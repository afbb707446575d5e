//! Scripted in-memory debug session
//!
//! [`ScriptedChannel`] answers the seven channel verbs from a fixed model of
//! threads, frames, scopes and variable containers. It records every call,
//! can fail chosen verbs or references, and understands just enough of an
//! expression language for assignments, path lookups and `Object.is`.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::common::{Error, Result};
use crate::dap::{
    EvaluateResponseBody, Scope, SetValueResponseBody, Source, StackFrame, Thread, Variable,
    VariablesArguments, VariablesFilter,
};
use crate::inspect::channel::DebugChannel;
use crate::inspect::mutation::{parse_path, PathSegment};

/// Reference of the scope created by [`ScriptedChannelBuilder::local`]
pub const LOCAL_SCOPE_REF: i64 = 1000;

/// One recorded channel call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Threads,
    StackTrace {
        thread_id: i64,
    },
    Scopes {
        frame_id: i64,
    },
    Variables {
        reference: i64,
        filter: Option<VariablesFilter>,
        start: Option<i64>,
        count: Option<i64>,
    },
    SetVariable {
        reference: i64,
        name: String,
        value: String,
    },
    SetExpression {
        frame_id: i64,
        expression: String,
        value: String,
    },
    Evaluate {
        expression: String,
        frame_id: Option<i64>,
        context: String,
    },
}

impl Call {
    /// DAP command name of the call
    pub fn verb(&self) -> &'static str {
        match self {
            Call::Threads => "threads",
            Call::StackTrace { .. } => "stackTrace",
            Call::Scopes { .. } => "scopes",
            Call::Variables { .. } => "variables",
            Call::SetVariable { .. } => "setVariable",
            Call::SetExpression { .. } => "setExpression",
            Call::Evaluate { .. } => "evaluate",
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Model {
    threads: Vec<Thread>,
    frames: HashMap<i64, Vec<StackFrame>>,
    scopes: HashMap<i64, Vec<Scope>>,
    containers: HashMap<i64, Vec<Variable>>,
    /// Reference → canonical object id, for identity checks
    aliases: HashMap<i64, i64>,
    evaluate_results: HashMap<String, String>,
    failing_verbs: HashSet<String>,
    failing_refs: HashSet<i64>,
    delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct State {
    model: Model,
    calls: Vec<Call>,
}

/// Location of a variable inside a container
struct Slot {
    container: i64,
    index: usize,
}

pub struct ScriptedChannel {
    state: Mutex<State>,
}

/// Builder for [`ScriptedChannel`]
#[derive(Debug, Default)]
pub struct ScriptedChannelBuilder {
    model: Model,
}

fn request_failed(command: &str, message: impl AsRef<str>) -> Error {
    Error::dap_request_failed(command, message.as_ref())
}

impl ScriptedChannelBuilder {
    pub fn thread(mut self, id: i64, name: &str) -> Self {
        self.model.threads.push(Thread {
            id,
            name: name.to_string(),
        });
        self
    }

    /// Push a frame onto `thread_id`'s stack, innermost first
    pub fn frame(
        mut self,
        thread_id: i64,
        frame_id: i64,
        name: &str,
        source: Option<(&str, u32)>,
    ) -> Self {
        let (path, line) = source.map_or((None, 0), |(p, l)| (Some(p.to_string()), l));
        self.model.frames.entry(thread_id).or_default().push(StackFrame {
            id: frame_id,
            name: name.to_string(),
            source: path.map(|path| Source {
                path: Some(path),
                ..Default::default()
            }),
            line,
            column: 1,
        });
        self
    }

    pub fn scope(self, frame_id: i64, name: &str, reference: i64) -> Self {
        self.scope_with(
            frame_id,
            Scope {
                name: name.to_string(),
                variables_reference: reference,
                ..Default::default()
            },
        )
    }

    pub fn scope_with(mut self, frame_id: i64, scope: Scope) -> Self {
        self.model
            .containers
            .entry(scope.variables_reference)
            .or_default();
        self.model.scopes.entry(frame_id).or_default().push(scope);
        self
    }

    /// Add `variable` as a child of container `reference`
    pub fn var(mut self, reference: i64, variable: Variable) -> Self {
        self.model.containers.entry(reference).or_default().push(variable);
        self
    }

    /// Declare an empty container so `variables` on it succeeds
    pub fn container(mut self, reference: i64) -> Self {
        self.model.containers.entry(reference).or_default();
        self
    }

    /// Leaf in the default `Local` scope of thread 1 / frame 1
    pub fn local(mut self, name: &str, value: &str) -> Self {
        if self.model.threads.is_empty() {
            self = self
                .thread(1, "main")
                .frame(1, 1, "main", Some(("/app/main.js", 1)));
        }
        if !self.model.scopes.contains_key(&1) {
            self = self.scope(1, "Local", LOCAL_SCOPE_REF);
        }
        self.var(
            LOCAL_SCOPE_REF,
            Variable {
                evaluate_name: Some(name.to_string()),
                ..Variable::leaf(name, value)
            },
        )
    }

    /// `reference` denotes the same object as `target`
    pub fn alias(mut self, reference: i64, target: i64) -> Self {
        self.model.aliases.insert(reference, target);
        self
    }

    /// Fixed result for an exact expression
    pub fn evaluate_result(mut self, expression: &str, result: &str) -> Self {
        self.model
            .evaluate_results
            .insert(expression.to_string(), result.to_string());
        self
    }

    /// Every call of `verb` fails
    pub fn fail(mut self, verb: &str) -> Self {
        self.model.failing_verbs.insert(verb.to_string());
        self
    }

    /// `variables` on `reference` fails
    pub fn fail_reference(mut self, reference: i64) -> Self {
        self.model.failing_refs.insert(reference);
        self
    }

    /// Sleep before answering each call
    pub fn delay(mut self, delay: Duration) -> Self {
        self.model.delay = Some(delay);
        self
    }

    pub fn build(self) -> ScriptedChannel {
        ScriptedChannel {
            state: Mutex::new(State {
                model: self.model,
                calls: Vec::new(),
            }),
        }
    }
}

impl ScriptedChannel {
    pub fn builder() -> ScriptedChannelBuilder {
        ScriptedChannelBuilder::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn calls_to(&self, verb: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.verb() == verb)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Simulate a resume: every container reference stops resolving
    pub fn forget_references(&self) {
        let mut state = self.state.lock();
        state.model.containers.clear();
        state.model.scopes.clear();
    }

    pub fn set_failing(&self, verb: &str, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.model.failing_verbs.insert(verb.to_string());
        } else {
            state.model.failing_verbs.remove(verb);
        }
    }

    /// Current value of a top-level variable in any scope
    pub fn value_of(&self, name: &str) -> Option<String> {
        let state = self.state.lock();
        state
            .model
            .scopes
            .values()
            .flatten()
            .filter_map(|s| state.model.containers.get(&s.variables_reference))
            .flatten()
            .find(|v| v.name == name)
            .map(|v| v.value.clone())
    }

    /// Record `call`, then wait and apply failure injection
    async fn enter(&self, call: Call) -> Result<()> {
        let verb = call.verb();
        let delay = {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.model.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.lock().model.failing_verbs.contains(verb) {
            return Err(request_failed(verb, "scripted failure"));
        }
        Ok(())
    }
}

impl Model {
    fn default_frame(&self) -> Option<i64> {
        let thread = self.threads.first()?;
        self.frames.get(&thread.id)?.first().map(|f| f.id)
    }

    fn identity(&self, reference: i64) -> i64 {
        self.aliases.get(&reference).copied().unwrap_or(reference)
    }

    fn child_index(&self, container: i64, segment: &PathSegment) -> Option<usize> {
        let children = self.containers.get(&container)?;
        let wanted = match segment {
            PathSegment::Field(name) => name.clone(),
            PathSegment::Index(i) => i.to_string(),
            PathSegment::Key(quoted) => quoted[1..quoted.len() - 1].to_string(),
        };
        children
            .iter()
            .position(|v| v.name == wanted || v.name == format!("[{wanted}]"))
    }

    /// Resolve an access path against a frame's scopes
    fn resolve(&self, frame_id: Option<i64>, path: &str) -> Option<Slot> {
        let segments = parse_path(path.trim()).ok()?;
        let frame_id = frame_id.or_else(|| self.default_frame())?;
        let (head, rest) = segments.split_first()?;

        let mut slot = self.scopes.get(&frame_id)?.iter().find_map(|scope| {
            self.child_index(scope.variables_reference, head)
                .map(|index| Slot {
                    container: scope.variables_reference,
                    index,
                })
        })?;

        for segment in rest {
            let reference = self.variable(&slot)?.variables_reference;
            if reference == 0 {
                return None;
            }
            slot = Slot {
                container: reference,
                index: self.child_index(reference, segment)?,
            };
        }
        Some(slot)
    }

    fn variable(&self, slot: &Slot) -> Option<&Variable> {
        self.containers.get(&slot.container)?.get(slot.index)
    }

    fn variable_mut(&mut self, slot: &Slot) -> Option<&mut Variable> {
        self.containers.get_mut(&slot.container)?.get_mut(slot.index)
    }

    fn assign(&mut self, slot: &Slot, value: &str) -> Option<SetValueResponseBody> {
        let var = self.variable_mut(slot)?;
        var.value = value.to_string();
        var.variables_reference = 0;
        Some(SetValueResponseBody {
            value: var.value.clone(),
            type_name: var.type_name.clone(),
            ..Default::default()
        })
    }
}

/// Split `Object.is(a, b)` into its operands
fn identity_operands(expression: &str) -> Option<(&str, &str)> {
    let inner = expression.strip_prefix("Object.is(")?.strip_suffix(')')?;
    let (left, right) = inner.split_once(',')?;
    Some((left.trim(), right.trim()))
}

#[async_trait]
impl DebugChannel for ScriptedChannel {
    async fn threads(&self) -> Result<Vec<Thread>> {
        self.enter(Call::Threads).await?;
        Ok(self.state.lock().model.threads.clone())
    }

    async fn stack_trace(
        &self,
        thread_id: i64,
        start_frame: i64,
        levels: i64,
    ) -> Result<Vec<StackFrame>> {
        self.enter(Call::StackTrace { thread_id }).await?;
        let state = self.state.lock();
        let frames = state
            .model
            .frames
            .get(&thread_id)
            .ok_or(Error::ThreadNotFound(thread_id))?;
        let take = if levels > 0 { levels as usize } else { usize::MAX };
        Ok(frames
            .iter()
            .skip(start_frame.max(0) as usize)
            .take(take)
            .cloned()
            .collect())
    }

    async fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>> {
        self.enter(Call::Scopes { frame_id }).await?;
        self.state
            .lock()
            .model
            .scopes
            .get(&frame_id)
            .cloned()
            .ok_or(Error::FrameNotFound(frame_id))
    }

    async fn variables(&self, args: VariablesArguments) -> Result<Vec<Variable>> {
        self.enter(Call::Variables {
            reference: args.variables_reference,
            filter: args.filter,
            start: args.start,
            count: args.count,
        })
        .await?;

        let state = self.state.lock();
        let reference = args.variables_reference;
        if state.model.failing_refs.contains(&reference) {
            return Err(request_failed("variables", "scripted failure"));
        }
        let children = state
            .model
            .containers
            .get(&reference)
            .ok_or_else(|| request_failed("variables", "Invalid variable reference"))?;

        let is_indexed = |v: &&Variable| {
            v.name.trim_start_matches('[').trim_end_matches(']').parse::<u64>().is_ok()
        };
        let filtered: Vec<&Variable> = match args.filter {
            Some(VariablesFilter::Indexed) => children.iter().filter(is_indexed).collect(),
            Some(VariablesFilter::Named) => {
                children.iter().filter(|v| !is_indexed(v)).collect()
            }
            None => children.iter().collect(),
        };

        let start = args.start.unwrap_or(0).max(0) as usize;
        let count = match args.count {
            Some(c) if c > 0 => c as usize,
            _ => usize::MAX,
        };
        Ok(filtered
            .into_iter()
            .skip(start)
            .take(count)
            .cloned()
            .collect())
    }

    async fn set_variable(
        &self,
        variables_reference: i64,
        name: &str,
        value: &str,
    ) -> Result<SetValueResponseBody> {
        self.enter(Call::SetVariable {
            reference: variables_reference,
            name: name.to_string(),
            value: value.to_string(),
        })
        .await?;

        let mut state = self.state.lock();
        let index = state
            .model
            .containers
            .get(&variables_reference)
            .and_then(|vars| vars.iter().position(|v| v.name == name))
            .ok_or_else(|| request_failed("setVariable", format!("No variable '{name}'")))?;
        let slot = Slot {
            container: variables_reference,
            index,
        };
        state
            .model
            .assign(&slot, value)
            .ok_or_else(|| request_failed("setVariable", "Invalid variable reference"))
    }

    async fn set_expression(
        &self,
        frame_id: i64,
        expression: &str,
        value: &str,
    ) -> Result<SetValueResponseBody> {
        self.enter(Call::SetExpression {
            frame_id,
            expression: expression.to_string(),
            value: value.to_string(),
        })
        .await?;

        let mut state = self.state.lock();
        let slot = state
            .model
            .resolve(Some(frame_id), expression)
            .ok_or_else(|| request_failed("setExpression", format!("Cannot resolve '{expression}'")))?;
        state
            .model
            .assign(&slot, value)
            .ok_or_else(|| request_failed("setExpression", "Invalid variable reference"))
    }

    async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
    ) -> Result<EvaluateResponseBody> {
        self.enter(Call::Evaluate {
            expression: expression.to_string(),
            frame_id,
            context: context.to_string(),
        })
        .await?;

        let mut state = self.state.lock();
        let model = &mut state.model;
        let unresolved = || request_failed("evaluate", format!("Cannot evaluate '{expression}'"));

        if let Some(result) = model.evaluate_results.get(expression) {
            return Ok(EvaluateResponseBody {
                result: result.clone(),
                ..Default::default()
            });
        }

        if let Some((left, right)) = identity_operands(expression) {
            let left = model.resolve(frame_id, left).ok_or_else(unresolved)?;
            let right = model.resolve(frame_id, right).ok_or_else(unresolved)?;
            let id = |slot: &Slot| {
                model
                    .variable(slot)
                    .map(|v| model.identity(v.variables_reference))
                    .unwrap_or(0)
            };
            let same = id(&left) != 0 && id(&left) == id(&right);
            return Ok(EvaluateResponseBody {
                result: same.to_string(),
                type_name: Some("boolean".to_string()),
                ..Default::default()
            });
        }

        if let Some((target, literal)) = expression.split_once(" = ") {
            let slot = model.resolve(frame_id, target).ok_or_else(unresolved)?;
            let body = model.assign(&slot, literal.trim()).ok_or_else(unresolved)?;
            return Ok(EvaluateResponseBody {
                result: body.value,
                type_name: body.type_name,
                ..Default::default()
            });
        }

        let slot = model.resolve(frame_id, expression).ok_or_else(unresolved)?;
        let var = model.variable(&slot).ok_or_else(unresolved)?;
        Ok(EvaluateResponseBody {
            result: var.value.clone(),
            type_name: var.type_name.clone(),
            variables_reference: var.variables_reference,
            named_variables: var.named_variables,
            indexed_variables: var.indexed_variables,
        })
    }
}
