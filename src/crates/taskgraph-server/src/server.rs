//! TCP accept loop; one [`Session`] per connection.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use taskgraph_core::{FunctionRegistry, TaskGraph};

use crate::error::Result;
use crate::session::Session;

/// WebSocket server driving the graph engine.
pub struct Server {
    listener: TcpListener,
    graph: TaskGraph,
    registry: Arc<FunctionRegistry>,
}

impl Server {
    /// Bind to `addr` with the graph each new connection starts from and
    /// the registry runs execute against.
    pub async fn bind(addr: &str, graph: TaskGraph, registry: FunctionRegistry) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            graph,
            registry: Arc::new(registry),
        })
    }

    /// The bound address (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever. Each connection gets an independent
    /// copy of the configured graph, so concurrent clients cannot observe
    /// each other's progress.
    pub async fn serve(self) -> Result<()> {
        info!(addr = %self.listener.local_addr()?, "listening for connections");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!(%peer, "accepted connection");

            let graph = self.graph.deep_clone()?;
            let registry = self.registry.clone();
            tokio::spawn(async move {
                match Session::new(graph, registry) {
                    Ok(session) => {
                        if let Err(e) = session.serve(stream).await {
                            warn!(error = %e, "session ended with error");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to create session"),
                }
            });
        }
    }
}
