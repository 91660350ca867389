//! Wire protocol between the server and the UI.
//!
//! The server greets each connection with a `connected` snapshot carrying
//! both the current graph and the pristine initial graph, then moves
//! between two states: `waiting` (for a START) and `running` (shipping a
//! snapshot every second and on completion). Clients drive transitions
//! with START/STOP commands, optionally installing a replacement graph.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskgraph_core::TaskGraph;

/// Server lifecycle state, as reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendState {
    /// Sent once, in the greeting.
    Connected,
    /// Idle, waiting for a START.
    Waiting,
    /// A graph run is in flight (or just finished).
    Running,
}

/// A snapshot message shipped to the client. `graph` is the complete,
/// self-describing serialization of current progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Current server state.
    pub backend_state: BackendState,
    /// The current graph, serialized.
    pub graph: Value,
    /// The pristine configured graph; greeting only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_graph: Option<Value>,
}

/// Client-driven transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Begin running the (possibly replaced) graph.
    #[serde(rename = "START")]
    Start,
    /// Cancel the run, optionally installing a replacement graph.
    #[serde(rename = "STOP")]
    Stop,
}

/// A message from the client: a command plus an optional replacement
/// graph. The graph is validated during deserialization; malformed graphs
/// reject the whole message.
#[derive(Debug, Deserialize)]
pub struct ClientCommand {
    /// The requested transition.
    pub command: Command,
    /// Replacement graph, if any.
    #[serde(default)]
    pub graph: Option<TaskGraph>,
}
