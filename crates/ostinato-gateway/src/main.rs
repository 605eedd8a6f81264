mod app;
mod link;

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ostinato_core::domain::{DEFAULT_MAX_ATTEMPTS, DEFAULT_TASK_QUEUE, QueueName, RetryPolicy};
use ostinato_core::ports::{SystemClock, UlidGenerator};

use crate::app::{AppState, router};
use crate::link::EngineLink;

/// HTTP gateway: accepts generation requests and dispatches them to the
/// orchestration engine as durable, retried units of work.
#[derive(Debug, Parser)]
#[command(name = "ostinato-gateway")]
struct Args {
    /// Orchestration engine address.
    #[arg(long, env = "OSTINATO_ENGINE_ADDR", default_value = "127.0.0.1:7233")]
    engine_addr: String,

    /// Task queue submissions target. Must match the worker's queue.
    #[arg(long, env = "OSTINATO_TASK_QUEUE", default_value = DEFAULT_TASK_QUEUE)]
    queue: String,

    /// Port to serve HTTP on.
    #[arg(long, env = "OSTINATO_GATEWAY_PORT", default_value_t = 8000)]
    port: u16,

    /// Engine-side attempts per submission.
    #[arg(
        long,
        env = "OSTINATO_MAX_ATTEMPTS",
        default_value_t = DEFAULT_MAX_ATTEMPTS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    max_attempts: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let state = AppState {
        dispatcher: Arc::new(EngineLink::new(args.engine_addr)),
        ids: Arc::new(UlidGenerator::new(SystemClock)),
        queue: QueueName::new(args.queue),
        retry: RetryPolicy::new(args.max_attempts),
    };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!(port = args.port, queue = %state.queue, "gateway listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
