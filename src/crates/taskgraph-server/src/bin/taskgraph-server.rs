//! Standalone WebSocket server serving the demo graph.
//!
//! Connect a UI, send `{"command":"START","graph":null}`, and watch the
//! snapshot stream as the spawner task adds its child mid-run.

use clap::Parser;
use taskgraph_server::demo::{demo_graph, demo_registry};
use taskgraph_server::Server;

#[derive(Parser, Debug)]
#[command(name = "taskgraph-server", about = "WebSocket server for taskgraph execution")]
struct Args {
    /// Interface to bind.
    #[arg(long, default_value = "127.0.0.1", env = "TASKGRAPH_HOST")]
    host: String,

    /// Port to bind.
    #[arg(long, default_value_t = 5678, env = "TASKGRAPH_PORT")]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let server = Server::bind(&addr, demo_graph()?, demo_registry()).await?;
    server.serve().await?;
    Ok(())
}
