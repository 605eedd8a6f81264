//! End-to-end over TCP: gateway client and worker connection talking to a
//! dev engine server, the way the three processes are deployed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ulid::Ulid;

use ostinato_core::domain::{Outcome, QueueName, RetryPolicy, TaskKind, WorkId, WorkSubmission};
use ostinato_core::engine::{Client, EngineServer, InMemoryEngine, RetryBackoff, WorkerConnection};
use ostinato_core::ports::{ConnectError, Dispatcher, SubmitError};
use ostinato_core::worker::{HandlerError, TaskHandler, TaskRegistry, Worker, WorkerHandle};

struct GenerateStub;

#[async_trait]
impl TaskHandler for GenerateStub {
    async fn run(&self, args: &[serde_json::Value]) -> Result<serde_json::Value, HandlerError> {
        let prompt = args
            .first()
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| HandlerError::new("missing prompt argument"))?;
        Ok(serde_json::json!({"midi": format!("score for '{prompt}'")}))
    }
}

struct AlwaysFails {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl TaskHandler for AlwaysFails {
    async fn run(&self, _args: &[serde_json::Value]) -> Result<serde_json::Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::new("tape machine jammed"))
    }
}

async fn start_engine() -> String {
    let engine = Arc::new(InMemoryEngine::new(RetryBackoff::immediate()));
    let server = EngineServer::bind("127.0.0.1:0", engine).await.unwrap();
    let addr = server.local_addr().unwrap().to_string();
    tokio::spawn(server.serve());
    addr
}

async fn start_worker(addr: &str, queue: &str, registry: TaskRegistry) -> WorkerHandle {
    let conn = WorkerConnection::connect(addr).await.expect("worker connect");
    conn.register(QueueName::new(queue), registry.kinds())
        .await
        .expect("register");
    Worker::new(Arc::new(conn), Arc::new(registry), 4).spawn()
}

fn submission(kind: &str, queue: &str, max_attempts: u32) -> WorkSubmission {
    WorkSubmission::new(
        WorkId::from_ulid(Ulid::new()),
        TaskKind::new(kind),
        QueueName::new(queue),
        vec![serde_json::json!("late night tape loop"), serde_json::json!(96)],
    )
    .with_retry(RetryPolicy::new(max_attempts))
}

#[tokio::test]
async fn submit_execute_and_await_over_the_wire() {
    let addr = start_engine().await;

    let mut registry = TaskRegistry::new();
    registry
        .register(TaskKind::new("generate_midi"), Arc::new(GenerateStub))
        .unwrap();
    let worker = start_worker(&addr, "roundtrip", registry).await;

    let client = Client::connect(&addr).await.expect("gateway connect");
    let handle = client
        .submit(submission("generate_midi", "roundtrip", 3))
        .await
        .expect("submit");

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.outcome())
        .await
        .expect("outcome should arrive")
        .expect("session stays up");
    assert_eq!(
        outcome,
        Outcome::success(serde_json::json!({"midi": "score for 'late night tape loop'"}))
    );

    worker.shutdown_and_join().await;
}

#[tokio::test]
async fn retries_are_engine_side_and_bounded() {
    let addr = start_engine().await;

    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = TaskRegistry::new();
    registry
        .register(
            TaskKind::new("generate_midi"),
            Arc::new(AlwaysFails { calls: Arc::clone(&calls) }),
        )
        .unwrap();
    let worker = start_worker(&addr, "bounded", registry).await;

    let client = Client::connect(&addr).await.expect("gateway connect");
    let handle = client
        .submit(submission("generate_midi", "bounded", 3))
        .await
        .expect("submit");

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.outcome())
        .await
        .expect("outcome should arrive")
        .expect("session stays up");
    assert_eq!(outcome, Outcome::failure("tape machine jammed"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    worker.shutdown_and_join().await;
}

#[tokio::test]
async fn duplicate_id_is_rejected_over_the_wire() {
    let addr = start_engine().await;
    let client = Client::connect(&addr).await.expect("gateway connect");

    let first = submission("generate_midi", "dupes", 3);
    let second = first.clone();

    let _handle = client.submit(first).await.expect("first submit");
    let err = client.submit(second).await.unwrap_err();
    assert!(matches!(err, SubmitError::DuplicateId(_)));
}

#[tokio::test]
async fn connect_fails_when_no_engine_listens() {
    // Bind then drop to get an address that is certainly not listening.
    let vacated = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };

    let err = Client::connect(&vacated).await.unwrap_err();
    assert!(matches!(err, ConnectError::Unreachable { .. }));

    let err = WorkerConnection::connect(&vacated).await.unwrap_err();
    assert!(matches!(err, ConnectError::Unreachable { .. }));
}

#[tokio::test]
async fn worker_disconnect_hands_the_entry_back_for_retry() {
    use ostinato_core::engine::wire::{self, ClientFrame, PeerRole, ServerFrame};
    use tokio::io::BufReader;

    let addr = start_engine().await;
    let client = Client::connect(&addr).await.expect("gateway connect");

    // A raw worker session leases the entry and then vanishes mid-flight.
    {
        let stream = tokio::net::TcpStream::connect(&addr).await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        wire::write_frame(&mut writer, &ClientFrame::Hello { role: PeerRole::Worker })
            .await
            .unwrap();
        let hello: ServerFrame = wire::read_frame(&mut reader).await.unwrap().unwrap();
        assert!(matches!(hello, ServerFrame::HelloOk));

        wire::write_frame(
            &mut writer,
            &ClientFrame::Register {
                queue: QueueName::new("failover"),
                kinds: vec![TaskKind::new("generate_midi")],
            },
        )
        .await
        .unwrap();
        let registered: ServerFrame = wire::read_frame(&mut reader).await.unwrap().unwrap();
        assert!(matches!(registered, ServerFrame::Registered { .. }));

        wire::write_frame(&mut writer, &ClientFrame::Lease { seq: 0 }).await.unwrap();

        let handle_submit = client
            .submit(submission("generate_midi", "failover", 3))
            .await
            .expect("submit");

        let entry: ServerFrame = wire::read_frame(&mut reader).await.unwrap().unwrap();
        assert!(matches!(entry, ServerFrame::Entry { .. }));

        // Never completes: both socket halves drop here, which is how the
        // engine learns the worker is gone.
        drop((reader, writer));

        // A healthy worker picks the retried entry up.
        let mut registry = TaskRegistry::new();
        registry
            .register(TaskKind::new("generate_midi"), Arc::new(GenerateStub))
            .unwrap();
        let replacement = start_worker(&addr, "failover", registry).await;

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle_submit.outcome())
            .await
            .expect("outcome should arrive after failover")
            .expect("session stays up");
        assert!(outcome.is_success());

        replacement.shutdown_and_join().await;
    }
}
