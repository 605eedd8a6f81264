//! Bounded execution loop.
//!
//! One pull loop feeds a pool limited by a semaphore: the loop only asks
//! the source for another lease once a slot is free, so the engine keeps
//! the backlog while the worker runs at most `concurrency` entries.
//! Each entry is isolated: a failing or panicking handler costs that
//! entry its attempt and nothing else.

use std::sync::Arc;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::ports::{WorkLease, WorkSource};
use crate::worker::registry::TaskRegistry;

pub struct Worker {
    source: Arc<dyn WorkSource>,
    registry: Arc<TaskRegistry>,
    concurrency: usize,
}

/// Handle to a spawned worker loop.
/// - `request_shutdown` stops taking new leases; in-flight handler
///   executions are not cancelled
/// - `shutdown_and_join` additionally waits for the loop (and in-flight
///   entries) to finish
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }

    /// Resolves when the loop ends on its own (work source closed). Does
    /// not request anything; pair with `shutdown_and_join` afterwards.
    pub async fn finished(&mut self) {
        let _ = (&mut self.join).await;
    }
}

impl Worker {
    pub fn new(source: Arc<dyn WorkSource>, registry: Arc<TaskRegistry>, concurrency: usize) -> Self {
        Self {
            source,
            registry,
            concurrency: concurrency.max(1),
        }
    }

    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(run_loop(
            self.source,
            self.registry,
            self.concurrency,
            shutdown_rx,
        ));
        WorkerHandle { shutdown_tx, join }
    }
}

async fn run_loop(
    source: Arc<dyn WorkSource>,
    registry: Arc<TaskRegistry>,
    concurrency: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let limiter = Arc::new(Semaphore::new(concurrency));

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let permit = tokio::select! {
            changed = shutdown_rx.changed() => {
                // A dropped handle counts as a shutdown request.
                if changed.is_err() {
                    break;
                }
                continue;
            }
            permit = Arc::clone(&limiter).acquire_owned() => {
                permit.expect("limiter is never closed")
            }
        };

        // Leasing can park for a long time; race it against shutdown.
        let lease = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            lease = source.lease() => lease,
        };
        let Some(lease) = lease else {
            warn!("work source closed, stopping pull loop");
            break;
        };

        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let _permit = permit;
            execute_entry(registry, lease).await;
        });
    }

    // Pulling has stopped; wait for in-flight entries to report.
    let _ = limiter.acquire_many(concurrency as u32).await;
}

async fn execute_entry(registry: Arc<TaskRegistry>, lease: Box<dyn WorkLease>) {
    let entry = lease.entry().clone();

    let handler = match registry.resolve(&entry.kind) {
        Ok(handler) => handler,
        Err(e) => {
            warn!(id = %entry.id, kind = %entry.kind, "configuration mismatch: {e}");
            report_failure(lease, e.to_string()).await;
            return;
        }
    };

    // The handler runs in its own task so a panic is contained to this
    // entry's failure report instead of unwinding into the pull loop.
    let args = entry.args.clone();
    let invocation = tokio::spawn(async move { handler.run(&args).await });

    match invocation.await {
        Ok(Ok(result)) => {
            debug!(id = %entry.id, kind = %entry.kind, attempt = entry.attempt, "entry succeeded");
            if let Err(e) = lease.ack(result).await {
                warn!(id = %entry.id, error = %e, "success report failed");
            }
        }
        Ok(Err(handler_err)) => {
            debug!(
                id = %entry.id,
                kind = %entry.kind,
                attempt = entry.attempt,
                error = %handler_err,
                "entry failed"
            );
            report_failure(lease, handler_err.to_string()).await;
        }
        Err(join_err) => {
            let reason = if join_err.is_panic() {
                format!("handler for kind '{}' panicked", entry.kind)
            } else {
                format!("handler for kind '{}' was aborted", entry.kind)
            };
            warn!(id = %entry.id, "{reason}");
            report_failure(lease, reason).await;
        }
    }
}

async fn report_failure(lease: Box<dyn WorkLease>, reason: String) {
    let id = lease.entry().id;
    if let Err(e) = lease.fail(reason).await {
        warn!(%id, error = %e, "failure report failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Barrier;
    use ulid::Ulid;

    use super::*;
    use crate::domain::{Outcome, QueueName, RetryPolicy, TaskKind, WorkId, WorkSubmission};
    use crate::engine::{InMemoryEngine, RetryBackoff};
    use crate::ports::Dispatcher;
    use crate::worker::registry::{HandlerError, TaskHandler};

    struct Succeeds;

    #[async_trait]
    impl TaskHandler for Succeeds {
        async fn run(&self, args: &[serde_json::Value]) -> Result<serde_json::Value, HandlerError> {
            Ok(serde_json::json!({"echo": args}))
        }
    }

    struct Panics;

    #[async_trait]
    impl TaskHandler for Panics {
        async fn run(&self, _args: &[serde_json::Value]) -> Result<serde_json::Value, HandlerError> {
            panic!("rehearsal went badly");
        }
    }

    struct AlwaysFails {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl TaskHandler for AlwaysFails {
        async fn run(&self, _args: &[serde_json::Value]) -> Result<serde_json::Value, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::new("render farm unavailable"))
        }
    }

    struct WaitsForPartner {
        barrier: Arc<Barrier>,
    }

    #[async_trait]
    impl TaskHandler for WaitsForPartner {
        async fn run(&self, _args: &[serde_json::Value]) -> Result<serde_json::Value, HandlerError> {
            // Only completes if another invocation reaches the barrier too.
            self.barrier.wait().await;
            Ok(serde_json::json!(null))
        }
    }

    fn submission(kind: &str, max_attempts: u32) -> WorkSubmission {
        WorkSubmission::new(
            WorkId::from_ulid(Ulid::new()),
            TaskKind::new(kind),
            QueueName::new("worker-tests"),
            vec![serde_json::json!("prompt"), serde_json::json!(120)],
        )
        .with_retry(RetryPolicy::new(max_attempts))
    }

    fn worker_on(engine: &Arc<InMemoryEngine>, registry: TaskRegistry, concurrency: usize) -> WorkerHandle {
        let source = Arc::new(engine.source(QueueName::new("worker-tests")));
        Worker::new(source, Arc::new(registry), concurrency).spawn()
    }

    async fn outcome_of(handle: crate::ports::WorkHandle) -> Outcome {
        tokio::time::timeout(Duration::from_secs(2), handle.outcome())
            .await
            .expect("outcome should arrive")
            .expect("engine stays up")
    }

    #[tokio::test]
    async fn panicking_handler_fails_its_entry_without_poisoning_others() {
        let engine = Arc::new(InMemoryEngine::new(RetryBackoff::immediate()));
        let mut registry = TaskRegistry::new();
        registry.register(TaskKind::new("a"), Arc::new(Panics)).unwrap();
        registry.register(TaskKind::new("b"), Arc::new(Succeeds)).unwrap();
        let worker = worker_on(&engine, registry, 2);

        let a = engine.submit(submission("a", 1)).await.unwrap();
        let b = engine.submit(submission("b", 1)).await.unwrap();

        let a_outcome = outcome_of(a).await;
        let b_outcome = outcome_of(b).await;

        assert!(matches!(&a_outcome, Outcome::Failure { reason } if reason.contains("panicked")));
        assert!(b_outcome.is_success());

        worker.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn unregistered_kind_fails_alone_and_the_worker_keeps_going() {
        let engine = Arc::new(InMemoryEngine::new(RetryBackoff::immediate()));
        let mut registry = TaskRegistry::new();
        registry.register(TaskKind::new("known"), Arc::new(Succeeds)).unwrap();
        let worker = worker_on(&engine, registry, 2);

        let stray = engine.submit(submission("never_registered", 1)).await.unwrap();
        let stray_outcome = outcome_of(stray).await;
        assert!(
            matches!(&stray_outcome, Outcome::Failure { reason } if reason.contains("never_registered"))
        );

        // Liveness after the mismatch: registered kinds still complete.
        let ok = engine.submit(submission("known", 1)).await.unwrap();
        assert!(outcome_of(ok).await.is_success());

        worker.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn failing_handler_is_attempted_exactly_max_attempts_times() {
        let engine = Arc::new(InMemoryEngine::new(RetryBackoff::immediate()));
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = TaskRegistry::new();
        registry
            .register(
                TaskKind::new("flaky"),
                Arc::new(AlwaysFails { calls: Arc::clone(&calls) }),
            )
            .unwrap();
        let worker = worker_on(&engine, registry, 1);

        let handle = engine.submit(submission("flaky", 3)).await.unwrap();
        let outcome = outcome_of(handle).await;

        assert_eq!(outcome, Outcome::failure("render farm unavailable"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        worker.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn pool_runs_entries_concurrently() {
        let engine = Arc::new(InMemoryEngine::new(RetryBackoff::immediate()));
        let barrier = Arc::new(Barrier::new(2));
        let mut registry = TaskRegistry::new();
        registry
            .register(TaskKind::new("pair"), Arc::new(WaitsForPartner { barrier }))
            .unwrap();
        let worker = worker_on(&engine, registry, 2);

        // Each entry blocks until its partner is also running: completion
        // proves two entries were in flight at once.
        let first = engine.submit(submission("pair", 1)).await.unwrap();
        let second = engine.submit(submission("pair", 1)).await.unwrap();

        assert!(outcome_of(first).await.is_success());
        assert!(outcome_of(second).await.is_success());

        worker.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn shutdown_stops_an_idle_worker() {
        let engine = Arc::new(InMemoryEngine::new(RetryBackoff::immediate()));
        let worker = worker_on(&engine, TaskRegistry::new(), 2);

        tokio::time::timeout(Duration::from_secs(1), worker.shutdown_and_join())
            .await
            .expect("shutdown should not hang");
    }
}
