use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ostinato_core::engine::{EngineServer, InMemoryEngine, RetryBackoff};

/// Development orchestration engine: hosts the in-memory engine behind the
/// wire protocol so gateway and worker can run as separate processes.
/// State lives in this process only; restarting it drops all queued work.
#[derive(Debug, Parser)]
#[command(name = "ostinato-engined")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "OSTINATO_ENGINE_LISTEN", default_value = "127.0.0.1:7233")]
    listen: String,

    /// Base delay before the first retry of a failed attempt, in
    /// milliseconds. Doubles per subsequent attempt.
    #[arg(long, env = "OSTINATO_RETRY_BASE_MS", default_value_t = 1000)]
    retry_base_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let backoff = RetryBackoff::new(Duration::from_millis(args.retry_base_ms), 2.0);
    let engine = Arc::new(InMemoryEngine::new(backoff));
    let server = EngineServer::bind(&args.listen, engine).await?;
    info!(addr = %server.local_addr()?, "engine listening");

    server.serve().await?;
    Ok(())
}
