//! The handle an executing task uses to observe and grow its graph.

use std::fmt;

use serde_json::Value;

use crate::error::Result;
use crate::graph::TaskGraph;
use crate::task::{Task, TaskId};

/// Short-lived handle vended to a task for the duration of one execution.
///
/// Gives the task the graph-wide input, a read-only view of the current
/// tasks, and the ability to append new tasks. Tasks appended here are
/// stamped with `created_by = ` the current task and - because the graph is
/// running - scheduled immediately.
#[derive(Clone)]
pub struct GraphContext {
    graph: TaskGraph,
    task_id: TaskId,
}

impl GraphContext {
    pub(crate) fn new(graph: TaskGraph, task_id: TaskId) -> Self {
        Self { graph, task_id }
    }

    /// The graph-wide input value.
    pub fn graph_input(&self) -> Value {
        self.graph.graph_input()
    }

    /// The id of the task this context was vended to.
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Snapshot of the graph's current tasks, in insertion order.
    pub fn list_tasks(&self) -> Vec<Task> {
        self.graph.tasks()
    }

    /// Append a task mid-run. Its `created_by` is set to the current task,
    /// making the current task an implicit dependency.
    pub fn add_task(&self, mut task: Task) -> Result<TaskId> {
        task.created_by = Some(self.task_id.clone());
        self.graph.add_task(task)
    }

    /// Append a task mid-run and designate it as the graph's output task.
    pub fn add_output_task(&self, mut task: Task) -> Result<TaskId> {
        task.created_by = Some(self.task_id.clone());
        self.graph.add_output_task(task)
    }
}

impl fmt::Debug for GraphContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphContext")
            .field("task_id", &self.task_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_reads_graph_input() {
        let graph = TaskGraph::new();
        graph.set_graph_input(json!("famous mathematicians"));
        let task_id = graph.add_task(Task::callback("f")).unwrap();

        let context = GraphContext::new(graph, task_id);
        assert_eq!(context.graph_input(), json!("famous mathematicians"));
        assert_eq!(context.list_tasks().len(), 1);
    }

    #[test]
    fn test_add_task_stamps_created_by() {
        let graph = TaskGraph::new();
        let parent = graph.add_task(Task::callback("parent")).unwrap();

        let context = GraphContext::new(graph.clone(), parent.clone());
        let child = context.add_task(Task::callback("child")).unwrap();

        let stored = graph.get_task(&child).unwrap();
        assert_eq!(stored.created_by, Some(parent));
    }
}
