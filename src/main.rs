//! zds-pipe: workload registration over a local named pipe
//!
//! A node agent connects to a well-known pipe, announces its protocol version,
//! and is then sent workload lifecycle requests (add, keep, remove), each of
//! which it acknowledges before the next one goes out.
//!
//! Features:
//! - Windows named pipes (message mode) or Unix domain sockets
//! - Length-prefixed or single-read message framing
//! - Per-phase deadlines on every read and write
//! - Failures scoped to the session they happen on
//! - Configuration via CLI arguments or TOML file

use tracing::info;
use tracing_subscriber::EnvFilter;
use zds_pipe::protocols::zds::ScriptedRequests;
use zds_pipe::{Config, Server};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        pipe = %config.pipe.path,
        framing = ?config.framing,
        max_frame_size = config.max_frame_size,
        handshake_timeout_ms = config.deadlines.handshake.as_millis() as u64,
        request_timeout_ms = config.deadlines.request.as_millis() as u64,
        max_connections = config.max_connections,
        "Starting zds-pipe server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut source = ScriptedRequests::new(config.requests.clone());
    if source.is_empty() {
        info!("No requests configured, using demo add request");
        source = ScriptedRequests::demo();
    }
    info!(requests = source.len(), "Request script loaded");

    let server = Server::bind(&config, source).await?;
    server
        .run_until(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
        })
        .await?;

    Ok(())
}
