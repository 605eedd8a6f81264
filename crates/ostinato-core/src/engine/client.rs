//! Gateway-side engine client.
//!
//! One TCP session shared by every request handler: submits go out through
//! a mutex-guarded writer, and a background reader task routes responses
//! back into oneshot channels (submit acks by `seq`, outcomes by work id).
//! Losing the connection resolves everything pending as lost.

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

use crate::domain::{Outcome, WorkId, WorkSubmission};
use crate::engine::wire::{self, ClientFrame, PeerRole, ServerFrame, SubmitFault};
use crate::ports::{ConnectError, Dispatcher, SubmitError, WorkHandle};

type SubmitAck = Result<(), (SubmitFault, String)>;

#[derive(Default)]
struct Pending {
    submits: HashMap<u64, oneshot::Sender<SubmitAck>>,
    outcomes: HashMap<WorkId, oneshot::Sender<Outcome>>,
    closed: bool,
}

struct Shared {
    writer: Mutex<OwnedWriteHalf>,
    pending: StdMutex<Pending>,
    seq: AtomicU64,
}

/// Connection-scoped submit/await client.
///
/// Cheap to clone via `Arc`; all request handlers share one session and
/// their submissions stay independent of each other.
pub struct Client {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Establish a session. Not retried internally: callers decide what a
    /// connect failure means for them.
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

        wire::write_frame(&mut writer, &ClientFrame::Hello { role: PeerRole::Gateway })
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

        debug!(addr, "connected to engine");
        Ok(Self { shared })
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

    // Dropping the senders resolves every pending submit and await as
    // connection-lost on the caller's side.
    let mut pending = shared.pending.lock().expect("pending lock");
    pending.closed = true;
    pending.submits.clear();
    pending.outcomes.clear();
}

fn route(shared: &Shared, frame: ServerFrame) {
    let mut pending = shared.pending.lock().expect("pending lock");
    match frame {
        ServerFrame::Submitted { seq } => {
            if let Some(tx) = pending.submits.remove(&seq) {
                let _ = tx.send(Ok(()));
            }
        }
        ServerFrame::Rejected { seq, fault, message } => {
            if let Some(tx) = pending.submits.remove(&seq) {
                let _ = tx.send(Err((fault, message)));
            }
        }
        ServerFrame::Done { id, outcome } => {
            if let Some(tx) = pending.outcomes.remove(&id) {
                let _ = tx.send(outcome);
            } else {
                warn!(%id, "outcome for unknown work id");
            }
        }
        other => warn!(?other, "unexpected frame on gateway session"),
    }
}

#[async_trait]
impl Dispatcher for Client {
    async fn submit(&self, submission: WorkSubmission) -> Result<WorkHandle, SubmitError> {
        let id = submission.id;
        let queue = submission.queue.clone();
        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);

        let (ack_tx, ack_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock().expect("pending lock");
            if pending.closed {
                return Err(SubmitError::ConnectionLost);
            }
            pending.submits.insert(seq, ack_tx);
            pending.outcomes.insert(id, outcome_tx);
        }

        let frame = ClientFrame::Submit { seq, submission };
        {
            let mut writer = self.shared.writer.lock().await;
            if let Err(e) = wire::write_frame(&mut *writer, &frame).await {
                warn!(error = %e, %id, "submit write failed");
                let mut pending = self.shared.pending.lock().expect("pending lock");
                pending.submits.remove(&seq);
                pending.outcomes.remove(&id);
                return Err(SubmitError::ConnectionLost);
            }
        }

        match ack_rx.await {
            Ok(Ok(())) => Ok(WorkHandle::new(id, outcome_rx)),
            Ok(Err((fault, message))) => {
                self.shared
                    .pending
                    .lock()
                    .expect("pending lock")
                    .outcomes
                    .remove(&id);
                Err(fault.into_error(id, &queue, message))
            }
            Err(_) => Err(SubmitError::ConnectionLost),
        }
    }
}
