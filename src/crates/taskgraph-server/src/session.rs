//! One client connection: the greeting, the waiting ⇄ running state
//! machine, and the per-second snapshot stream.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, info, warn};

use taskgraph_core::{FunctionRegistry, TaskGraph};

use crate::error::Result;
use crate::protocol::{BackendState, ClientCommand, Command, Snapshot};

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<TcpStream>;

/// One connection's state: the graph it is driving and the registry runs
/// execute against.
pub struct Session {
    graph: TaskGraph,
    initial_graph: serde_json::Value,
    registry: Arc<FunctionRegistry>,
}

impl Session {
    /// Create a session around a graph. The graph as handed over is
    /// remembered as the `initial_graph` reported in the greeting.
    pub fn new(graph: TaskGraph, registry: Arc<FunctionRegistry>) -> Result<Self> {
        let initial_graph = graph.to_value()?;
        Ok(Self {
            graph,
            initial_graph,
            registry,
        })
    }

    /// Drive the connection until the client goes away.
    pub async fn serve(mut self, stream: TcpStream) -> Result<()> {
        let mut ws = accept_async(stream).await?;
        info!("client connected");

        let greeting = Snapshot {
            backend_state: BackendState::Connected,
            graph: self.graph.to_value()?,
            initial_graph: Some(self.initial_graph.clone()),
        };
        self.send(&mut ws, greeting).await?;

        loop {
            // waiting: nothing happens until the client commands.
            let Some(command) = self.next_command(&mut ws).await? else {
                info!("client disconnected");
                return Ok(());
            };
            match command.command {
                Command::Start => {
                    if let Some(graph) = command.graph {
                        debug!("installing client-supplied graph");
                        self.graph = graph;
                    }
                    if !self.run_graph(&mut ws).await? {
                        return Ok(());
                    }
                }
                Command::Stop => {
                    // Already waiting; a STOP may still install a graph.
                    if let Some(graph) = command.graph {
                        self.graph = graph;
                    }
                    self.send_state(&mut ws, BackendState::Waiting).await?;
                }
            }
        }
    }

    /// Run the current graph, racing execution against client commands on
    /// a one-second snapshot tick. Returns `false` once the client has
    /// gone away.
    async fn run_graph(&mut self, ws: &mut WsStream) -> Result<bool> {
        let graph = self.graph.clone();
        let registry = self.registry.clone();
        let mut run = tokio::spawn(async move { graph.run(&registry).await });

        let mut ticks = tokio::time::interval(SNAPSHOT_INTERVAL);
        ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticks.tick() => {
                    self.send_state(ws, BackendState::Running).await?;
                }

                result = &mut run => {
                    match result {
                        Ok(Ok(_)) => info!("graph run completed"),
                        Ok(Err(e)) => warn!(error = %e, "graph run failed"),
                        Err(e) => warn!(error = %e, "graph run aborted"),
                    }
                    // The final snapshot carries the outcome either way:
                    // completed tasks their output_data, failed tasks
                    // their error.
                    self.send_state(ws, BackendState::Running).await?;
                    return Ok(true);
                }

                message = ws.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ClientCommand>(&text) {
                                Ok(command) if command.command == Command::Stop => {
                                    info!("stop requested, cancelling graph run");
                                    run.abort();
                                    let _ = (&mut run).await;
                                    if let Some(graph) = command.graph {
                                        self.graph = graph;
                                    }
                                    self.send_state(ws, BackendState::Waiting).await?;
                                    return Ok(true);
                                }
                                Ok(_) => warn!("ignoring START while already running"),
                                Err(e) => warn!(error = %e, "ignoring malformed client message"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            run.abort();
                            let _ = (&mut run).await;
                            return Ok(false);
                        }
                        Some(Ok(_)) => {} // ping/pong/binary
                        Some(Err(e)) => {
                            run.abort();
                            let _ = (&mut run).await;
                            return Err(e.into());
                        }
                    }
                }
            }
        }
    }

    /// Read the next well-formed command; `None` when the client is gone.
    async fn next_command(&mut self, ws: &mut WsStream) -> Result<Option<ClientCommand>> {
        while let Some(message) = ws.next().await {
            match message? {
                Message::Text(text) => match serde_json::from_str(&text) {
                    Ok(command) => return Ok(Some(command)),
                    Err(e) => warn!(error = %e, "ignoring malformed client message"),
                },
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    async fn send_state(&self, ws: &mut WsStream, backend_state: BackendState) -> Result<()> {
        let snapshot = Snapshot {
            backend_state,
            graph: self.graph.to_value()?,
            initial_graph: None,
        };
        self.send(ws, snapshot).await
    }

    async fn send(&self, ws: &mut WsStream, snapshot: Snapshot) -> Result<()> {
        debug!(state = ?snapshot.backend_state, "sending snapshot");
        let text = serde_json::to_string(&snapshot)?;
        ws.send(Message::Text(text)).await?;
        Ok(())
    }
}
