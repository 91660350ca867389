//! # taskgraph-core - Serializable dynamic task graphs for LLM workflows
//!
//! An execution engine for dataflow graphs of LLM calls and user-supplied
//! computations. Three properties set it apart from a conventional DAG
//! runner:
//!
//! - **Dynamic growth** - tasks may add new tasks *while the graph is
//!   running*; the topology is not fixed at submission time.
//! - **Serializable progress** - the whole execution state (topology,
//!   inputs, intermediate results, errors) serializes to a plain JSON
//!   document at any moment. A UI can receive a snapshot, mutate it, send
//!   it back, and the engine resumes without re-executing completed work.
//! - **Fine-grained memoization** - beyond completed outputs, an LLM task
//!   caches its formatted prompt and raw API response separately, so a
//!   resumed graph never re-pays for a successful API call even when its
//!   parse is redone.
//!
//! # Core types
//!
//! - [`TaskGraph`] - ordered tasks + optional output task + graph-wide
//!   input; runs the graph to fixpoint.
//! - [`Task`] / [`TaskKind`] - one node: a callback, an LLM call, or a
//!   nested subgraph.
//! - [`FunctionRegistry`] / [`FunctionId`] - maps stable identifiers to
//!   implementations; only identifiers are serialized.
//! - [`GraphContext`] - the handle a running task uses to read the graph
//!   input and spawn siblings.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use serde_json::json;
//! use taskgraph_core::{FunctionRegistry, Task, TaskGraph};
//!
//! #[tokio::main]
//! async fn main() -> taskgraph_core::Result<()> {
//!     let mut registry = FunctionRegistry::new();
//!     registry.register_sync("one", |_ctx, _args, _kwargs| Ok(json!(1)));
//!     registry.register_sync("increment", |_ctx, args, _kwargs| {
//!         Ok(json!(args[0].as_i64().unwrap_or(0) + 1))
//!     });
//!
//!     let graph = TaskGraph::new();
//!     let one = graph.add_task(Task::callback("one"))?;
//!     graph.add_output_task(Task::callback("increment").with_dep(one))?;
//!
//!     assert_eq!(graph.run(&registry).await?, json!(2));
//!
//!     // The whole execution state round-trips through JSON; the restored
//!     // graph is fully memoized and re-runs without invoking anything.
//!     let restored = TaskGraph::from_json(&graph.to_json()?)?;
//!     assert_eq!(restored.run(&registry).await?, json!(2));
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod error;
pub mod graph;
pub mod registry;
pub mod task;

pub use context::GraphContext;
pub use error::{GraphError, Result};
pub use graph::TaskGraph;
pub use registry::{
    builtin, make_base_registry, Args, BoxFuture, FunctionId, FunctionRegistry, KwArgs,
};
pub use task::{Task, TaskId, TaskKind};
