mod handlers;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ostinato_core::domain::{DEFAULT_TASK_QUEUE, QueueName, TaskKind};
use ostinato_core::engine::WorkerConnection;
use ostinato_core::worker::{TaskRegistry, Worker};

use crate::handlers::GenerateMidi;

/// Worker process: registers its task kinds with the orchestration engine
/// and executes queued work concurrently.
#[derive(Debug, Parser)]
#[command(name = "ostinato-worker")]
struct Args {
    /// Orchestration engine address.
    #[arg(long, env = "OSTINATO_ENGINE_ADDR", default_value = "127.0.0.1:7233")]
    engine_addr: String,

    /// Task queue to pull from. Must match the gateway's queue.
    #[arg(long, env = "OSTINATO_TASK_QUEUE", default_value = DEFAULT_TASK_QUEUE)]
    queue: String,

    /// How many entries run at once.
    #[arg(
        long,
        env = "OSTINATO_CONCURRENCY",
        default_value_t = 4,
        value_parser = clap::value_parser!(usize)
    )]
    concurrency: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    // The full handler set is known before any work is pulled.
    let mut registry = TaskRegistry::new();
    registry.register(TaskKind::new("generate_midi"), Arc::new(GenerateMidi))?;
    registry.ensure_registered(&[TaskKind::new("generate_midi")])?;

    // No engine, no worker: connect failure here is fatal.
    let connection = match WorkerConnection::connect(&args.engine_addr).await {
        Ok(connection) => connection,
        Err(e) => {
            error!(addr = %args.engine_addr, error = %e, "cannot reach the orchestration engine");
            return Err(e.into());
        }
    };

    let queue = QueueName::new(&args.queue);
    connection.register(queue.clone(), registry.kinds()).await?;
    info!(
        %queue,
        kinds = ?registry.kinds().iter().map(TaskKind::as_str).collect::<Vec<_>>(),
        concurrency = args.concurrency,
        "worker running"
    );

    let mut handle = Worker::new(Arc::new(connection), Arc::new(registry), args.concurrency).spawn();

    let connection_lost = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            false
        }
        _ = handle.finished() => true,
    };
    handle.shutdown_and_join().await;

    if connection_lost {
        warn!("engine connection lost");
        anyhow::bail!("engine connection lost");
    }
    Ok(())
}
