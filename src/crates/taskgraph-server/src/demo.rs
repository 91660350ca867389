//! The out-of-box demo: a one-task graph whose callback spawns a second
//! task while the graph is running, exercising dynamic growth end to end.

use serde_json::json;
use taskgraph_core::{FunctionRegistry, Result, Task, TaskGraph};

/// Functions the demo graph refers to.
pub fn demo_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();

    registry.register_sync("announce_child", |_ctx, _args, _kwargs| {
        Ok(json!("child task ran"))
    });

    registry.register_sync("spawn_child", |ctx, _args, _kwargs| {
        ctx.add_task(Task::callback("announce_child"))?;
        Ok(json!("child task created"))
    });

    registry
}

/// A graph with a single spawner task; the spawned child shows up in the
/// snapshot stream with its `created_by` back reference.
pub fn demo_graph() -> Result<TaskGraph> {
    let graph = TaskGraph::new();
    graph.set_graph_input(json!({}));
    graph.add_task(Task::callback("spawn_child"))?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_graph_spawns_its_child() {
        let graph = demo_graph().unwrap();
        let registry = demo_registry();

        graph.run(&registry).await.unwrap();

        let tasks = graph.tasks();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].created_by, Some(tasks[0].task_id.clone()));
        assert_eq!(tasks[1].output_data, Some(json!("child task ran")));
    }
}
