//! Worker-side engine connection.
//!
//! Long-lived session through which a worker advertises its task kinds and
//! pulls queue entries. Lease requests correlate on `seq`; a lease response
//! can arrive much later (the engine parks the request until work exists),
//! which is what keeps the worker from busy-polling.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

use crate::domain::{Outcome, QueueEntry, QueueName, TaskKind};
use crate::engine::wire::{self, ClientFrame, PeerRole, ServerFrame};
use crate::ports::{ConnectError, ReportError, WorkLease, WorkSource};

#[derive(Default)]
struct Pending {
    register: Option<oneshot::Sender<QueueName>>,
    leases: HashMap<u64, oneshot::Sender<QueueEntry>>,
    closed: bool,
}

struct Shared {
    writer: Mutex<OwnedWriteHalf>,
    pending: StdMutex<Pending>,
    seq: AtomicU64,
}

/// Durable session from a worker process to the engine.
pub struct WorkerConnection {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for WorkerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConnection").finish_non_exhaustive()
    }
}

impl WorkerConnection {
    /// Establish a session. A failure here is fatal to worker startup:
    /// the process has nothing to do without an engine.
    pub async fn connect(addr: &str) -> Result<Self, ConnectError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ConnectError::Unreachable {
                addr: addr.to_string(),
                source,
            })?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut writer = write_half;

        wire::write_frame(&mut writer, &ClientFrame::Hello { role: PeerRole::Worker })
            .await
            .map_err(|e| ConnectError::Handshake(e.to_string()))?;
        match wire::read_frame::<_, ServerFrame>(&mut reader).await {
            Ok(Some(ServerFrame::HelloOk)) => {}
            Ok(Some(other)) => {
                return Err(ConnectError::Handshake(format!(
                    "unexpected frame during handshake: {other:?}"
                )));
            }
            Ok(None) => {
                return Err(ConnectError::Handshake("engine closed the session".to_string()));
            }
            Err(e) => return Err(ConnectError::Handshake(e.to_string())),
        }

        let shared = Arc::new(Shared {
            writer: Mutex::new(writer),
            pending: StdMutex::new(Pending::default()),
            seq: AtomicU64::new(0),
        });
        tokio::spawn(read_loop(reader, Arc::clone(&shared)));

        debug!(addr, "worker connected to engine");
        Ok(Self { shared })
    }

    /// Advertise every registered kind for `queue`. Must complete before
    /// the pull loop starts: the engine only serves leases to registered
    /// sessions.
    pub async fn register(
        &self,
        queue: QueueName,
        kinds: Vec<TaskKind>,
    ) -> Result<(), ReportError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock().expect("pending lock");
            if pending.closed {
                return Err(ReportError::ConnectionLost);
            }
            pending.register = Some(tx);
        }

        let frame = ClientFrame::Register { queue, kinds };
        {
            let mut writer = self.shared.writer.lock().await;
            wire::write_frame(&mut *writer, &frame)
                .await
                .map_err(|_| ReportError::ConnectionLost)?;
        }

        rx.await.map(|_| ()).map_err(|_| ReportError::ConnectionLost)
    }
}

async fn read_loop(mut reader: BufReader<OwnedReadHalf>, shared: Arc<Shared>) {
    loop {
        match wire::read_frame::<_, ServerFrame>(&mut reader).await {
            Ok(Some(frame)) => route(&shared, frame),
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "engine session read failed");
                break;
            }
        }
    }

    let mut pending = shared.pending.lock().expect("pending lock");
    pending.closed = true;
    pending.register = None;
    pending.leases.clear();
}

fn route(shared: &Shared, frame: ServerFrame) {
    let mut pending = shared.pending.lock().expect("pending lock");
    match frame {
        ServerFrame::Registered { queue } => {
            if let Some(tx) = pending.register.take() {
                let _ = tx.send(queue);
            }
        }
        ServerFrame::Entry { seq, entry } => {
            if let Some(tx) = pending.leases.remove(&seq) {
                let _ = tx.send(entry);
            } else {
                warn!(seq, "lease response without a waiting request");
            }
        }
        other => warn!(?other, "unexpected frame on worker session"),
    }
}

#[async_trait]
impl WorkSource for WorkerConnection {
    async fn lease(&self) -> Option<Box<dyn WorkLease>> {
        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock().expect("pending lock");
            if pending.closed {
                return None;
            }
            pending.leases.insert(seq, tx);
        }

        {
            let mut writer = self.shared.writer.lock().await;
            if wire::write_frame(&mut *writer, &ClientFrame::Lease { seq }).await.is_err() {
                self.shared
                    .pending
                    .lock()
                    .expect("pending lock")
                    .leases
                    .remove(&seq);
                return None;
            }
        }

        match rx.await {
            Ok(entry) => Some(Box::new(RemoteLease {
                entry,
                shared: Arc::clone(&self.shared),
            })),
            Err(_) => None,
        }
    }
}

/// A lease pulled over the wire. Reporting sends one `complete` frame; the
/// engine side owns retry vs. terminal-failure decisions.
struct RemoteLease {
    entry: QueueEntry,
    shared: Arc<Shared>,
}

impl RemoteLease {
    async fn report(self, outcome: Outcome) -> Result<(), ReportError> {
        let frame = ClientFrame::Complete {
            id: self.entry.id,
            outcome,
        };
        let mut writer = self.shared.writer.lock().await;
        wire::write_frame(&mut *writer, &frame)
            .await
            .map_err(|_| ReportError::ConnectionLost)
    }
}

#[async_trait]
impl WorkLease for RemoteLease {
    fn entry(&self) -> &QueueEntry {
        &self.entry
    }

    async fn ack(self: Box<Self>, result: serde_json::Value) -> Result<(), ReportError> {
        self.report(Outcome::success(result)).await
    }

    async fn fail(self: Box<Self>, reason: String) -> Result<(), ReportError> {
        self.report(Outcome::failure(reason)).await
    }
}
