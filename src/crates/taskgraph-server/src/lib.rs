//! WebSocket transport for the taskgraph engine.
//!
//! The transport owns the outer event loop: it greets each client with the
//! current and initial graph, waits for a START, then races graph
//! execution against client commands on a one-second tick, shipping a
//! complete JSON snapshot of progress every tick and on termination. A
//! STOP cancels the in-flight run (units observe cancellation at their
//! next suspension point) and optionally installs a client-mutated graph
//! for the next START - the engine's memoization makes such restarts skip
//! completed work.
//!
//! See [`protocol`] for the exact message shapes.

pub mod demo;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;

pub use error::{Result, ServerError};
pub use protocol::{BackendState, ClientCommand, Command, Snapshot};
pub use server::Server;
pub use session::Session;
