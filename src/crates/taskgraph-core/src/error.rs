//! Error types for graph construction and execution.
//!
//! Failures fall into a few distinct families with different audiences:
//!
//! - [`GraphError::Validation`] - the graph itself is malformed (unknown
//!   dependency id, duplicate task id, double-start). Raised synchronously
//!   and never recovered by the engine.
//! - [`GraphError::UnknownFunction`] / [`GraphError::FunctionKind`] - a task
//!   named a registry binding that is missing or has the wrong shape.
//! - [`GraphError::Execution`] - user code or an API handler failed. The
//!   rendered text is persisted on the task so serialized snapshots carry it.
//! - [`GraphError::TaskFailed`] - the wrapping error a graph run returns;
//!   its source chain points at the one task that is blamed.

use crate::registry::FunctionId;
use crate::task::TaskId;
use std::sync::Arc;
use thiserror::Error;

/// Convenience result type using [`GraphError`].
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur while building, (de)serializing, or running a
/// task graph.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph structure violation: bad dependency id, duplicate task id,
    /// unknown output task, double-start.
    #[error("graph validation failed: {0}")]
    Validation(String),

    /// No function is registered under the given identifier.
    #[error("no function registered under '{0}'")]
    UnknownFunction(FunctionId),

    /// A function is registered under the identifier, but with the wrong
    /// shape (e.g. a task asked for an API handler and found a context
    /// function).
    #[error("function '{id}' is {actual}, expected {expected}")]
    FunctionKind {
        /// The identifier that was looked up.
        id: FunctionId,
        /// The shape the call site needed.
        expected: &'static str,
        /// The shape that was actually registered.
        actual: &'static str,
    },

    /// A task's user code or API handler failed.
    #[error("{0}")]
    Execution(String),

    /// The wrapping error a graph run returns when a task fails. The
    /// source chain leads to the underlying failure.
    #[error("task '{task_id}' failed")]
    TaskFailed {
        /// The task blamed for the run failure.
        task_id: TaskId,
        /// The underlying failure.
        #[source]
        source: Arc<GraphError>,
    },

    /// The run was cancelled from outside before completing.
    #[error("graph execution cancelled")]
    Cancelled,

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GraphError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Render the error and its cause chain as a single block of text, the
    /// form stored in a serialized task's `error` field.
    pub fn render_chain(&self) -> String {
        let mut rendered = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            rendered.push_str("\ncaused by: ");
            rendered.push_str(&cause.to_string());
            source = cause.source();
        }
        rendered
    }
}
