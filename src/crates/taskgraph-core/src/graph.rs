//! The task graph: an ordered collection of tasks, the scheduler that runs
//! them to fixpoint, and the JSON round-trip that preserves progress.
//!
//! # Execution model
//!
//! `run` starts every task as an independent cooperative unit on the tokio
//! runtime. A unit settles a `watch`-channel completion handle with its
//! outcome; dependents await those handles, so dependency ordering falls
//! out of the await graph rather than an up-front schedule. Units never
//! block: all work is either awaiting a handle or awaiting I/O (the LLM
//! call).
//!
//! The graph is **not fixed at submission time**. A running task may call
//! [`GraphContext::add_task`](crate::GraphContext::add_task); the new task
//! is validated, appended, and immediately spawned as a unit. The
//! completion loop therefore re-snapshots the unit set on every wake-up and
//! finishes only when a snapshot shows every unit settled.
//!
//! On the first observed failure the scheduler aborts every outstanding
//! unit and returns a wrapping error blaming the failed task. Dropping the
//! `run` future (external cancellation) aborts the units the same way.
//!
//! # Sharing
//!
//! `TaskGraph` is a cheap handle over shared state: clones see the same
//! tasks. That is what lets a transport serialize live snapshots while a
//! run is in flight, and what lets a subgraph task execute the same graph
//! object its parent serializes. Interior locks are held only for short,
//! synchronous sections - never across an await.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures::future::select_all;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::error::{GraphError, Result};
use crate::registry::{make_base_registry, BoxFuture, FunctionRegistry};
use crate::task::{Task, TaskId};

/// Shared handle to one task's mutable state.
pub(crate) type TaskHandle = Arc<RwLock<Task>>;

/// How a task's completion handle settled.
#[derive(Debug, Clone)]
pub(crate) enum TaskOutcome {
    /// The task produced a value (possibly null, for the
    /// dependency-failure path).
    Success(Value),
    /// The task's own execution failed.
    Failed(Arc<GraphError>),
    /// The task was aborted before settling.
    Cancelled,
}

/// One scheduled unit: the completion handle plus the means to abort it.
struct Unit {
    outcome: watch::Receiver<Option<TaskOutcome>>,
    abort: AbortHandle,
}

/// Transient state of one `run` invocation, shared with every unit.
pub(crate) struct RunState {
    registry: FunctionRegistry,
    units: Mutex<IndexMap<TaskId, Unit>>,
}

impl RunState {
    /// The merged (base + caller) registry for this run.
    pub(crate) fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Clone out a task's completion handle.
    pub(crate) fn outcome_receiver(
        &self,
        task_id: &TaskId,
    ) -> Option<watch::Receiver<Option<TaskOutcome>>> {
        self.units
            .lock()
            .unwrap()
            .get(task_id)
            .map(|unit| unit.outcome.clone())
    }

    fn current_outcome(&self, task_id: &TaskId) -> Option<TaskOutcome> {
        self.units
            .lock()
            .unwrap()
            .get(task_id)
            .and_then(|unit| unit.outcome.borrow().clone())
    }

    fn abort_all(&self) {
        for unit in self.units.lock().unwrap().values() {
            unit.abort.abort();
        }
    }
}

struct GraphInner {
    tasks: RwLock<Vec<TaskHandle>>,
    by_id: RwLock<HashMap<TaskId, TaskHandle>>,
    graph_input: RwLock<Value>,
    output_task: RwLock<Option<TaskId>>,
    started: AtomicBool,
    run: Mutex<Option<Arc<RunState>>>,
}

/// A dynamic, serializable dataflow graph of tasks.
///
/// Cloning is cheap and shares state; use [`TaskGraph::deep_clone`] for an
/// independent copy.
#[derive(Clone)]
pub struct TaskGraph {
    inner: Arc<GraphInner>,
}

impl TaskGraph {
    /// Create an empty graph with a null input and no output task.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GraphInner {
                tasks: RwLock::new(Vec::new()),
                by_id: RwLock::new(HashMap::new()),
                graph_input: RwLock::new(Value::Null),
                output_task: RwLock::new(None),
                started: AtomicBool::new(false),
                run: Mutex::new(None),
            }),
        }
    }

    /// The graph-wide input value tasks see through their context.
    pub fn graph_input(&self) -> Value {
        self.inner.graph_input.read().unwrap().clone()
    }

    /// Replace the graph-wide input value.
    pub fn set_graph_input(&self, input: Value) {
        *self.inner.graph_input.write().unwrap() = input;
    }

    /// The task whose result `run` returns, if designated.
    pub fn output_task(&self) -> Option<TaskId> {
        self.inner.output_task.read().unwrap().clone()
    }

    /// Designate (or clear) the output task. The id must exist.
    pub fn set_output_task(&self, task_id: Option<TaskId>) -> Result<()> {
        if let Some(id) = &task_id {
            if !self.contains(id) {
                return Err(GraphError::validation(format!(
                    "output task '{id}' not found in task graph"
                )));
            }
        }
        *self.inner.output_task.write().unwrap() = task_id;
        Ok(())
    }

    /// Number of tasks currently in the graph.
    pub fn len(&self) -> usize {
        self.inner.tasks.read().unwrap().len()
    }

    /// Whether the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.inner.tasks.read().unwrap().is_empty()
    }

    /// Whether a task with the id exists.
    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.inner.by_id.read().unwrap().contains_key(task_id)
    }

    /// Snapshot of every task, in insertion order.
    pub fn tasks(&self) -> Vec<Task> {
        self.inner
            .tasks
            .read()
            .unwrap()
            .iter()
            .map(|handle| handle.read().unwrap().clone())
            .collect()
    }

    /// Snapshot of the task ids, in insertion order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.inner
            .tasks
            .read()
            .unwrap()
            .iter()
            .map(|handle| handle.read().unwrap().task_id.clone())
            .collect()
    }

    /// Snapshot of one task by id.
    pub fn get_task(&self, task_id: &TaskId) -> Option<Task> {
        self.inner
            .by_id
            .read()
            .unwrap()
            .get(task_id)
            .map(|handle| handle.read().unwrap().clone())
    }

    /// Whether a run is currently in flight.
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Append a task to the graph.
    ///
    /// Every declared dependency (positional, keyword, and `created_by`)
    /// must refer to a task already present - appending therefore keeps the
    /// sequence topologically ordered - and the task id must be unused. If
    /// a run is in flight the task is immediately scheduled.
    pub fn add_task(&self, task: Task) -> Result<TaskId> {
        let task_id = task.task_id.clone();

        let handle: TaskHandle = {
            let mut tasks = self.inner.tasks.write().unwrap();
            let mut by_id = self.inner.by_id.write().unwrap();

            for dependency in task.dependencies() {
                if !by_id.contains_key(dependency) {
                    return Err(GraphError::validation(format!(
                        "dependency '{dependency}' not found in task graph"
                    )));
                }
            }
            if by_id.contains_key(&task_id) {
                return Err(GraphError::validation(format!(
                    "task id '{task_id}' already present in task graph"
                )));
            }

            let handle: TaskHandle = Arc::new(RwLock::new(task));
            tasks.push(handle.clone());
            by_id.insert(task_id.clone(), handle.clone());
            handle
        };

        // Tasks added while running start right away; add_task is the only
        // way the graph grows mid-run.
        let run = self.inner.run.lock().unwrap().clone();
        if let Some(run) = run {
            debug!(%task_id, "scheduling task added during execution");
            self.spawn_unit(&run, handle);
        }

        Ok(task_id)
    }

    /// Append a task and designate it as the output task.
    pub fn add_output_task(&self, task: Task) -> Result<TaskId> {
        let task_id = self.add_task(task)?;
        self.set_output_task(Some(task_id.clone()))?;
        Ok(task_id)
    }

    /// Run the graph to fixpoint and return the output task's result (null
    /// when no output task is designated).
    ///
    /// Tasks with memoized output are reused without executing anything;
    /// see the module docs for scheduling, growth, failure, and
    /// cancellation semantics.
    pub async fn run(&self, registry: &FunctionRegistry) -> Result<Value> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(GraphError::validation("task graph is already running"));
        }
        // Aborts outstanding units and clears transient state on every exit
        // path, including the run future being dropped mid-flight.
        let _guard = RunGuard { graph: self.clone() };

        let run = Arc::new(RunState {
            registry: make_base_registry().merge(registry),
            units: Mutex::new(IndexMap::new()),
        });
        *self.inner.run.lock().unwrap() = Some(run.clone());

        let initial: Vec<TaskHandle> = self.inner.tasks.read().unwrap().clone();
        info!(tasks = initial.len(), "starting task graph run");
        for handle in initial {
            self.spawn_unit(&run, handle);
        }

        // Completion detection: new units may appear during any await, so
        // re-snapshot every wake-up. Finish when a snapshot is fully
        // settled; fail as soon as any unit failed.
        loop {
            let snapshot: Vec<(TaskId, watch::Receiver<Option<TaskOutcome>>)> = run
                .units
                .lock()
                .unwrap()
                .iter()
                .map(|(id, unit)| (id.clone(), unit.outcome.clone()))
                .collect();

            let mut first_failure: Option<(TaskId, Arc<GraphError>)> = None;
            let mut pending: Vec<watch::Receiver<Option<TaskOutcome>>> = Vec::new();
            for (task_id, receiver) in snapshot {
                let settled = receiver.borrow().clone();
                match settled {
                    Some(TaskOutcome::Failed(error)) => {
                        if first_failure.is_none() {
                            first_failure = Some((task_id, error));
                        }
                    }
                    Some(_) => {}
                    None => {
                        if receiver.has_changed().is_err() {
                            // The unit went away without settling - it
                            // panicked. Blame it like any other failure.
                            if first_failure.is_none() {
                                first_failure = Some((
                                    task_id,
                                    Arc::new(GraphError::execution(
                                        "task terminated without settling",
                                    )),
                                ));
                            }
                        } else {
                            pending.push(receiver);
                        }
                    }
                }
            }

            if let Some((task_id, source)) = first_failure {
                warn!(%task_id, "task failed, cancelling outstanding tasks");
                run.abort_all();
                return Err(GraphError::TaskFailed { task_id, source });
            }
            if pending.is_empty() {
                break;
            }

            let waiters: Vec<BoxFuture<()>> = pending
                .into_iter()
                .map(|mut receiver| -> BoxFuture<()> {
                    Box::pin(async move {
                        // A closed channel wakes us just as a settled one
                        // does; the next snapshot classifies it.
                        let _ = receiver.wait_for(Option::is_some).await;
                    })
                })
                .collect();
            select_all(waiters).await;
        }

        let output = self
            .output_task()
            .and_then(|task_id| run.current_outcome(&task_id))
            .map(|outcome| match outcome {
                TaskOutcome::Success(value) => value,
                _ => Value::Null,
            })
            .unwrap_or(Value::Null);

        debug!("task graph run complete");
        Ok(output)
    }

    /// Spawn the cooperative unit for one task and record its handle.
    ///
    /// The unit is registered under the units lock before the spawned
    /// future can observe the map, so a child spawned by a running task
    /// always finds its creator's handle.
    fn spawn_unit(&self, run: &Arc<RunState>, handle: TaskHandle) {
        let task_id = handle.read().unwrap().task_id.clone();
        let (outcome_tx, outcome_rx) = watch::channel(None);

        let mut units = run.units.lock().unwrap();
        let join = tokio::spawn(crate::task::unit_future(
            self.clone(),
            run.clone(),
            handle,
            outcome_tx,
        ));
        units.insert(
            task_id,
            Unit {
                outcome: outcome_rx,
                abort: join.abort_handle(),
            },
        );
    }

    /// Serialize to a JSON value.
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(GraphError::from)
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(GraphError::from)
    }

    /// Rehydrate a graph from a JSON value, validating ids and topology.
    pub fn from_value(value: Value) -> Result<Self> {
        let document: GraphDocument = serde_json::from_value(value)?;
        Self::from_document(document)
    }

    /// Rehydrate a graph from a JSON string, validating ids and topology.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: GraphDocument = serde_json::from_str(json)?;
        Self::from_document(document)
    }

    /// An independent copy (new task objects, same content), by way of the
    /// JSON form.
    pub fn deep_clone(&self) -> Result<Self> {
        Self::from_value(self.to_value()?)
    }

    fn from_document(document: GraphDocument) -> Result<Self> {
        let graph = TaskGraph::new();
        graph.set_graph_input(document.graph_input);
        for task in document.tasks {
            graph.add_task(task)?;
        }
        graph.set_output_task(document.output_task)?;
        Ok(graph)
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.len())
            .field("output_task", &self.output_task())
            .field("started", &self.is_started())
            .finish()
    }
}

/// Clears transient run state when a run ends - normally, by failure, or
/// by the run future being dropped. Aborting already-settled units is a
/// no-op, so the guard can abort unconditionally.
struct RunGuard {
    graph: TaskGraph,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(run) = self.graph.inner.run.lock().unwrap().take() {
            run.abort_all();
        }
        self.graph.inner.started.store(false, Ordering::SeqCst);
    }
}

/// The wire form: a pure value with no runtime state.
#[derive(Serialize, Deserialize)]
struct GraphDocument {
    tasks: Vec<Task>,
    graph_input: Value,
    output_task: Option<TaskId>,
}

impl Serialize for TaskGraph {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let document = GraphDocument {
            tasks: self.tasks(),
            graph_input: self.graph_input(),
            output_task: self.output_task(),
        };
        document.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TaskGraph {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let document = GraphDocument::deserialize(deserializer)?;
        TaskGraph::from_document(document).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_task_rejects_unknown_dependency() {
        let graph = TaskGraph::new();
        let err = graph
            .add_task(Task::callback("f").with_dep("no-such-task"))
            .unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }

    #[test]
    fn test_add_task_rejects_duplicate_id() {
        let graph = TaskGraph::new();
        graph
            .add_task(Task::callback("f").with_task_id("t-1"))
            .unwrap();
        let err = graph
            .add_task(Task::callback("g").with_task_id("t-1"))
            .unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }

    #[test]
    fn test_forward_reference_rejected() {
        // Dependencies must appear before their dependents.
        let graph = TaskGraph::new();
        let err = graph
            .add_task(Task::callback("f").with_task_id("t-1").with_dep("t-2"))
            .unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
    }

    #[test]
    fn test_output_task_must_exist() {
        let graph = TaskGraph::new();
        assert!(graph
            .set_output_task(Some(TaskId::from("ghost")))
            .is_err());
        assert!(graph.set_output_task(None).is_ok());
    }

    #[test]
    fn test_clone_shares_state() {
        let graph = TaskGraph::new();
        let clone = graph.clone();
        graph.add_task(Task::callback("f")).unwrap();
        assert_eq!(clone.len(), 1);
    }

    #[test]
    fn test_deep_clone_is_independent() {
        let graph = TaskGraph::new();
        graph.set_graph_input(json!({ "name": "Ada" }));
        graph.add_task(Task::callback("f")).unwrap();

        let copy = graph.deep_clone().unwrap();
        graph.add_task(Task::callback("g")).unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(copy.len(), 1);
        assert_eq!(copy.graph_input(), json!({ "name": "Ada" }));
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let graph = TaskGraph::new();
        let registry = FunctionRegistry::new();
        // Flag a run as in flight, then try to start another.
        graph.inner.started.store(true, Ordering::SeqCst);
        let err = graph.run(&registry).await.unwrap_err();
        assert!(matches!(err, GraphError::Validation(_)));
        // The failed attempt must not have cleared the first run's flag.
        assert!(graph.is_started());
    }
}
