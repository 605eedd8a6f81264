//! Development engine server.
//!
//! Hosts an [`InMemoryEngine`] behind the wire protocol so the gateway and
//! worker can run as separate processes against one engine address. Stands
//! in for a production engine during development and integration tests;
//! durability across engine restarts is explicitly not its job.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::domain::{Outcome, QueueName, TaskKind, WorkId};
use crate::engine::memory::InMemoryEngine;
use crate::engine::wire::{self, ClientFrame, ServerFrame, SubmitFault};
use crate::ports::{Dispatcher, WorkLease, WorkSource};

pub struct EngineServer {
    engine: Arc<InMemoryEngine>,
    listener: TcpListener,
}

impl EngineServer {
    pub async fn bind(addr: &str, engine: Arc<InMemoryEngine>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { engine, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop. Runs until the listener errors.
    pub async fn serve(self) -> std::io::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let engine = Arc::clone(&self.engine);
            tokio::spawn(handle_peer(engine, stream, peer));
        }
    }
}

async fn write_locked(writer: &Mutex<OwnedWriteHalf>, frame: &ServerFrame) -> std::io::Result<()> {
    let mut writer = writer.lock().await;
    wire::write_frame(&mut *writer, frame).await
}

async fn handle_peer(engine: Arc<InMemoryEngine>, stream: TcpStream, peer: SocketAddr) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let writer = Arc::new(Mutex::new(write_half));

    let role = match wire::read_frame::<_, ClientFrame>(&mut reader).await {
        Ok(Some(ClientFrame::Hello { role })) => role,
        _ => {
            warn!(%peer, "session did not start with hello");
            return;
        }
    };
    if write_locked(&writer, &ServerFrame::HelloOk).await.is_err() {
        return;
    }
    info!(%peer, ?role, "session established");

    // Entries leased on this session, keyed by work id until completion.
    let leases: Arc<Mutex<HashMap<WorkId, Box<dyn WorkLease>>>> = Arc::default();
    let mut tasks = JoinSet::new();
    let mut registered_queue: Option<QueueName> = None;

    loop {
        let frame = match wire::read_frame::<_, ClientFrame>(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, error = %e, "session read failed");
                break;
            }
        };

        match frame {
            ClientFrame::Hello { .. } => {
                warn!(%peer, "duplicate hello");
                break;
            }

            ClientFrame::Submit { seq, submission } => {
                let id = submission.id;
                match engine.submit(submission).await {
                    Ok(handle) => {
                        debug!(%peer, %id, "submission accepted");
                        if write_locked(&writer, &ServerFrame::Submitted { seq }).await.is_err() {
                            break;
                        }
                        // Push the terminal outcome whenever it lands.
                        let writer = Arc::clone(&writer);
                        tasks.spawn(async move {
                            if let Ok(outcome) = handle.outcome().await {
                                let _ =
                                    write_locked(&writer, &ServerFrame::Done { id, outcome }).await;
                            }
                        });
                    }
                    Err(e) => {
                        debug!(%peer, %id, error = %e, "submission rejected");
                        let frame = ServerFrame::Rejected {
                            seq,
                            fault: SubmitFault::of(&e),
                            message: e.to_string(),
                        };
                        if write_locked(&writer, &frame).await.is_err() {
                            break;
                        }
                    }
                }
            }

            ClientFrame::Register { queue, kinds } => {
                // Advertisement only: dispatch is by queue, and a kind the
                // worker never registered surfaces as a per-entry failure
                // on the worker itself.
                info!(
                    %peer,
                    queue = %queue,
                    kinds = ?kinds.iter().map(TaskKind::as_str).collect::<Vec<_>>(),
                    "worker registered"
                );
                registered_queue = Some(queue.clone());
                if write_locked(&writer, &ServerFrame::Registered { queue }).await.is_err() {
                    break;
                }
            }

            ClientFrame::Lease { seq } => {
                let Some(queue) = registered_queue.clone() else {
                    warn!(%peer, "lease before register");
                    break;
                };
                let source = engine.source(queue);
                let writer = Arc::clone(&writer);
                let leases = Arc::clone(&leases);
                // Park until work exists; the response frame may be a long
                // way off and must not block this session's other frames.
                tasks.spawn(async move {
                    if let Some(lease) = source.lease().await {
                        let entry = lease.entry().clone();
                        leases.lock().await.insert(entry.id, lease);
                        let _ = write_locked(&writer, &ServerFrame::Entry { seq, entry }).await;
                    }
                });
            }

            ClientFrame::Complete { id, outcome } => {
                let Some(lease) = leases.lock().await.remove(&id) else {
                    warn!(%peer, %id, "completion for work not leased here");
                    continue;
                };
                let report = match outcome {
                    Outcome::Success { result } => lease.ack(result).await,
                    Outcome::Failure { reason } => lease.fail(reason).await,
                };
                if let Err(e) = report {
                    warn!(%peer, %id, error = %e, "completion report failed");
                }
            }
        }
    }

    // Session over: stop parked lease requests, then hand in-flight entries
    // back so the engine can retry them on a live worker. An entry leased in
    // the abort window is lost until restart; a production engine would
    // reclaim it through a lease timeout instead.
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
    let abandoned: Vec<(WorkId, Box<dyn WorkLease>)> =
        leases.lock().await.drain().collect();
    for (id, lease) in abandoned {
        debug!(%peer, %id, "failing lease abandoned by disconnected worker");
        let _ = lease.fail("worker disconnected".to_string()).await;
    }
    info!(%peer, "session closed");
}
