//! The serializable task model and the per-task execution protocol.
//!
//! A task is one node of a [`TaskGraph`](crate::TaskGraph): it declares
//! which other tasks it consumes (positionally via `deps`, by name via
//! `kwdeps`), carries its memoized output once it has run, and knows how to
//! produce that output (its [`TaskKind`]). The whole struct is plain data -
//! functions are referenced by [`FunctionId`] and resolved through the
//! registry at run time - so a task round-trips through JSON with its
//! progress intact.
//!
//! Execution follows a fixed protocol for every kind:
//!
//! 1. memoization short-circuit: a task with `output_data` settles
//!    immediately, without touching its dependencies;
//! 2. the task that spawned this one (`created_by`), if any, must have
//!    completed successfully;
//! 3. dependency results are collected in declaration order (then keyword
//!    insertion order); if any dependency failed, the task settles null and
//!    leaves the blame to the failed task;
//! 4. the kind-specific work runs with a fresh [`GraphContext`];
//! 5. the output is committed to `output_data` and broadcast to dependents.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::context::GraphContext;
use crate::error::Result;
use crate::graph::{RunState, TaskGraph, TaskHandle, TaskOutcome};
use crate::registry::{Args, BoxFuture, FunctionId, KwArgs};

/// Globally unique, opaque task identifier.
///
/// Assigned on creation (UUID v4), stable across serialization, and the
/// only way tasks refer to each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A node in a task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique id, stable across serialization.
    pub task_id: TaskId,

    /// Positional dependencies; results are passed in this order.
    #[serde(default)]
    pub deps: Vec<TaskId>,

    /// Keyword dependencies; results are passed by name, in insertion
    /// order.
    #[serde(default)]
    pub kwdeps: IndexMap<String, TaskId>,

    /// The task that added this one at run time, if any. An implicit
    /// dependency: this task runs only after its creator completed.
    #[serde(default)]
    pub created_by: Option<TaskId>,

    /// Memoized output. Non-null exactly when the task has completed
    /// successfully; a re-run reuses it without executing anything.
    #[serde(default)]
    pub output_data: Option<Value>,

    /// Rendered failure, non-null exactly when the task terminated by
    /// failure. Cleared if a later run succeeds.
    #[serde(default)]
    pub error: Option<String>,

    /// What this task does. Flattened into the same JSON object, tagged by
    /// `type`.
    #[serde(flatten)]
    pub kind: TaskKind,
}

/// The three kinds of task, tagged on the wire by `type`.
///
/// Unknown tags fail deserialization loudly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TaskKind {
    /// Runs a registered callback with the dependency results.
    #[serde(rename = "PythonTask")]
    Callback {
        /// Registry id of the callback to invoke.
        callback_id: FunctionId,
    },

    /// Formats a prompt, calls the chat API, parses the response.
    ///
    /// The two intermediate fields are cached so a resumed graph never
    /// reformats a prompt or re-pays for a successful API call. The output
    /// parser is deliberately *not* cached: parses are cheap, and a user
    /// may edit the parser mid-session and re-run against the stored
    /// response.
    #[serde(rename = "LLMTask")]
    Llm {
        /// Registry id of the prompt formatter (context function).
        prompt_formatter_id: FunctionId,
        /// Registry id of the API handler.
        api_handler_id: FunctionId,
        /// Model parameters forwarded verbatim to the handler.
        params: Value,
        /// Registry id of the response parser (context function).
        output_parser_id: FunctionId,
        /// Cached formatter output.
        #[serde(default)]
        formatted_prompt: Option<Value>,
        /// Cached raw API response text.
        #[serde(default)]
        response: Option<String>,
    },

    /// Runs a nested graph, feeding it an input computed from this task's
    /// dependency results.
    #[serde(rename = "TaskGraphTask")]
    Subgraph {
        /// The nested graph.
        subgraph: TaskGraph,
        /// Registry id of the input formatter (context function).
        input_formatter_id: FunctionId,
        /// Cached formatter output, assigned to the nested graph before it
        /// runs.
        #[serde(default)]
        graph_input: Option<Value>,
    },
}

impl Task {
    fn with_kind(kind: TaskKind) -> Self {
        Self {
            task_id: TaskId::generate(),
            deps: Vec::new(),
            kwdeps: IndexMap::new(),
            created_by: None,
            output_data: None,
            error: None,
            kind,
        }
    }

    /// A task that runs a registered callback.
    pub fn callback(callback_id: impl Into<FunctionId>) -> Self {
        Self::with_kind(TaskKind::Callback {
            callback_id: callback_id.into(),
        })
    }

    /// A task that calls the chat API through the registered formatter,
    /// handler, and parser.
    pub fn llm(
        prompt_formatter_id: impl Into<FunctionId>,
        api_handler_id: impl Into<FunctionId>,
        params: Value,
        output_parser_id: impl Into<FunctionId>,
    ) -> Self {
        Self::with_kind(TaskKind::Llm {
            prompt_formatter_id: prompt_formatter_id.into(),
            api_handler_id: api_handler_id.into(),
            params,
            output_parser_id: output_parser_id.into(),
            formatted_prompt: None,
            response: None,
        })
    }

    /// A task that runs a nested graph.
    pub fn subgraph(subgraph: TaskGraph, input_formatter_id: impl Into<FunctionId>) -> Self {
        Self::with_kind(TaskKind::Subgraph {
            subgraph,
            input_formatter_id: input_formatter_id.into(),
            graph_input: None,
        })
    }

    /// Add positional dependencies, in order.
    pub fn with_deps<I>(mut self, deps: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<TaskId>,
    {
        self.deps.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Add one positional dependency.
    pub fn with_dep(mut self, dep: impl Into<TaskId>) -> Self {
        self.deps.push(dep.into());
        self
    }

    /// Add one keyword dependency.
    pub fn with_kwdep(mut self, name: impl Into<String>, dep: impl Into<TaskId>) -> Self {
        self.kwdeps.insert(name.into(), dep.into());
        self
    }

    /// Override the generated task id.
    pub fn with_task_id(mut self, task_id: impl Into<TaskId>) -> Self {
        self.task_id = task_id.into();
        self
    }

    /// Every id this task depends on: declared deps, keyword deps, and the
    /// implicit `created_by` edge.
    pub fn dependencies(&self) -> impl Iterator<Item = &TaskId> {
        self.deps
            .iter()
            .chain(self.kwdeps.values())
            .chain(self.created_by.iter())
    }

    /// Whether the task has completed successfully.
    pub fn is_complete(&self) -> bool {
        self.output_data.is_some()
    }

    /// Whether the task terminated by failure.
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Build the boxed future that drives one task to completion and settles
/// its completion handle. Boxing erases the recursion introduced by
/// subgraph tasks (a unit runs a graph, which spawns units).
pub(crate) fn unit_future(
    graph: TaskGraph,
    run: Arc<RunState>,
    handle: TaskHandle,
    outcome_tx: watch::Sender<Option<TaskOutcome>>,
) -> BoxFuture<()> {
    Box::pin(async move {
        let result = run_unit(graph, run, &handle).await;
        let outcome = match result {
            Ok(output) => TaskOutcome::Success(output),
            Err(error) => {
                handle.write().unwrap().error = Some(error.render_chain());
                TaskOutcome::Failed(Arc::new(error))
            }
        };
        // Receivers may already be gone during teardown.
        let _ = outcome_tx.send(Some(outcome));
    })
}

async fn run_unit(graph: TaskGraph, run: Arc<RunState>, handle: &TaskHandle) -> Result<Value> {
    let (task_id, memoized, created_by, deps, kwdeps) = {
        let task = handle.read().unwrap();
        (
            task.task_id.clone(),
            task.output_data.clone(),
            task.created_by.clone(),
            task.deps.clone(),
            task.kwdeps.clone(),
        )
    };

    // Memoized tasks settle immediately, without awaiting dependencies.
    if let Some(output) = memoized {
        debug!(%task_id, "task already complete, reusing memoized output");
        return Ok(output);
    }

    // The spawning task must complete before this one runs. Its result is
    // not an argument; it only gates execution.
    if let Some(creator) = created_by {
        match await_outcome(&run, &creator).await {
            TaskOutcome::Success(_) => {}
            _ => return Ok(Value::Null),
        }
    }

    // Collect dependency results. A failed or cancelled dependency settles
    // this task as null; the failure itself is reported once, by the task
    // that failed.
    let mut args = Args::with_capacity(deps.len());
    for dep in &deps {
        match await_outcome(&run, dep).await {
            TaskOutcome::Success(value) => args.push(value),
            _ => return Ok(Value::Null),
        }
    }
    let mut kwargs = KwArgs::with_capacity(kwdeps.len());
    for (name, dep) in &kwdeps {
        match await_outcome(&run, dep).await {
            TaskOutcome::Success(value) => {
                kwargs.insert(name.clone(), value);
            }
            _ => return Ok(Value::Null),
        }
    }

    let context = GraphContext::new(graph, task_id);
    let output = execute(handle, &run, context, args, kwargs).await?;

    {
        let mut task = handle.write().unwrap();
        task.output_data = Some(output.clone());
        task.error = None;
    }
    Ok(output)
}

/// Await another task's completion handle.
async fn await_outcome(run: &RunState, task_id: &TaskId) -> TaskOutcome {
    // Dependencies are validated at insertion and appear before their
    // dependents, so their units exist by the time anyone awaits them; a
    // missing unit means the run is tearing down.
    let Some(mut receiver) = run.outcome_receiver(task_id) else {
        return TaskOutcome::Cancelled;
    };
    let outcome = match receiver.wait_for(Option::is_some).await {
        Ok(settled) => (*settled).clone().unwrap_or(TaskOutcome::Cancelled),
        Err(_) => TaskOutcome::Cancelled,
    };
    outcome
}

async fn execute(
    handle: &TaskHandle,
    run: &Arc<RunState>,
    context: GraphContext,
    args: Args,
    kwargs: KwArgs,
) -> Result<Value> {
    let kind = handle.read().unwrap().kind.clone();
    match kind {
        TaskKind::Callback { callback_id } => {
            let callback = run.registry().lookup_context(&callback_id)?;
            callback(context, args, kwargs).await
        }

        TaskKind::Llm {
            prompt_formatter_id,
            api_handler_id,
            params,
            output_parser_id,
            formatted_prompt,
            response,
        } => {
            let formatted = match formatted_prompt {
                Some(prompt) => prompt,
                None => {
                    let formatter = run.registry().lookup_context(&prompt_formatter_id)?;
                    let prompt = formatter(context.clone(), args, kwargs).await?;
                    store_formatted_prompt(handle, prompt.clone());
                    prompt
                }
            };

            let raw = match response {
                Some(text) => text,
                None => {
                    let api_handler = run.registry().lookup_api_handler(&api_handler_id)?;
                    let text = api_handler(formatted, params).await?;
                    store_response(handle, text.clone());
                    text
                }
            };

            // The parse is recomputed every run; only output_data is
            // memoized.
            let parser = run.registry().lookup_context(&output_parser_id)?;
            parser(context, vec![Value::String(raw)], KwArgs::new()).await
        }

        TaskKind::Subgraph {
            subgraph,
            input_formatter_id,
            graph_input,
        } => {
            let input = match graph_input {
                Some(input) => input,
                None => {
                    let formatter = run.registry().lookup_context(&input_formatter_id)?;
                    let input = formatter(context, args, kwargs).await?;
                    store_subgraph_input(handle, input.clone());
                    input
                }
            };

            subgraph.set_graph_input(input);
            subgraph.run(run.registry()).await
        }
    }
}

fn store_formatted_prompt(handle: &TaskHandle, prompt: Value) {
    if let TaskKind::Llm {
        formatted_prompt, ..
    } = &mut handle.write().unwrap().kind
    {
        *formatted_prompt = Some(prompt);
    }
}

fn store_response(handle: &TaskHandle, text: String) {
    if let TaskKind::Llm { response, .. } = &mut handle.write().unwrap().kind {
        *response = Some(text);
    }
}

fn store_subgraph_input(handle: &TaskHandle, input: Value) {
    if let TaskKind::Subgraph { graph_input, .. } = &mut handle.write().unwrap().kind {
        *graph_input = Some(input);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_callback_wire_shape() {
        let task = Task::callback("join_things")
            .with_task_id("t-join")
            .with_dep("t-a")
            .with_kwdep("extra", "t-b");

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["type"], json!("PythonTask"));
        assert_eq!(value["task_id"], json!("t-join"));
        assert_eq!(value["deps"], json!(["t-a"]));
        assert_eq!(value["kwdeps"], json!({ "extra": "t-b" }));
        assert_eq!(value["created_by"], Value::Null);
        assert_eq!(value["output_data"], Value::Null);
        assert_eq!(value["error"], Value::Null);
        assert_eq!(value["callback_id"], json!("join_things"));
    }

    #[test]
    fn test_llm_wire_shape() {
        let task = Task::llm(
            "format_prompt",
            "openai_chat",
            json!({ "model": "gpt-4o-mini", "temperature": 1 }),
            "parse_response",
        );

        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["type"], json!("LLMTask"));
        assert_eq!(value["prompt_formatter_id"], json!("format_prompt"));
        assert_eq!(value["api_handler_id"], json!("openai_chat"));
        assert_eq!(value["output_parser_id"], json!("parse_response"));
        assert_eq!(value["params"]["model"], json!("gpt-4o-mini"));
        assert_eq!(value["formatted_prompt"], Value::Null);
        assert_eq!(value["response"], Value::Null);
    }

    #[test]
    fn test_round_trip_preserves_progress() {
        let mut task = Task::llm("fmt", "api", json!({}), "parse");
        task.output_data = Some(json!(["x", "y"]));
        if let TaskKind::Llm {
            formatted_prompt,
            response,
            ..
        } = &mut task.kind
        {
            *formatted_prompt = Some(json!("a prompt"));
            *response = Some("raw text".to_string());
        }

        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();

        assert_eq!(back.output_data, Some(json!(["x", "y"])));
        match back.kind {
            TaskKind::Llm {
                formatted_prompt,
                response,
                ..
            } => {
                assert_eq!(formatted_prompt, Some(json!("a prompt")));
                assert_eq!(response, Some("raw text".to_string()));
            }
            other => panic!("wrong kind: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_fails_loudly() {
        let raw = json!({
            "type": "RubyTask",
            "task_id": "t-1",
            "deps": [],
            "kwdeps": {},
            "created_by": null,
            "output_data": null,
            "error": null,
            "callback_id": "f"
        });
        assert!(serde_json::from_value::<Task>(raw).is_err());
    }

    #[test]
    fn test_dependencies_include_created_by() {
        let mut task = Task::callback("f")
            .with_deps(["a", "b"])
            .with_kwdep("named", "c");
        task.created_by = Some(TaskId::from("parent"));

        let deps: Vec<&str> = task.dependencies().map(TaskId::as_str).collect();
        assert_eq!(deps, vec!["a", "b", "c", "parent"]);
    }

    #[test]
    fn test_kwdeps_preserve_insertion_order() {
        let task = Task::callback("f")
            .with_kwdep("zeta", "t-1")
            .with_kwdep("alpha", "t-2");

        let names: Vec<&String> = task.kwdeps.keys().collect();
        assert_eq!(names, vec!["zeta", "alpha"]);

        let value = serde_json::to_value(&task).unwrap();
        let serialized: Vec<&String> = value["kwdeps"].as_object().unwrap().keys().collect();
        assert_eq!(serialized, vec!["zeta", "alpha"]);
    }
}
