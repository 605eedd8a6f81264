//! Submit/await port (the gateway side of the engine boundary).

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Outcome, QueueName, WorkId, WorkSubmission};

/// Failure to establish a session with the engine.
///
/// Never retried internally; callers decide whether connect failure is
/// fatal (worker startup) or surfaced per-request (gateway).
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("engine unreachable at {addr}: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine handshake failed: {0}")]
    Handshake(String),
}

/// Failure to enqueue a submission. Submissions are never retried by the
/// submitter; a rejected submission is surfaced to the original caller.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("duplicate work id {0}")]
    DuplicateId(WorkId),

    #[error("invalid submission: {0}")]
    Invalid(String),

    #[error("queue unavailable: {0}")]
    QueueUnavailable(QueueName),

    #[error("engine connection lost")]
    ConnectionLost,

    #[error(transparent)]
    Connect(#[from] ConnectError),
}

/// The engine session ended before a terminal outcome was reported.
#[derive(Debug, Error)]
pub enum AwaitError {
    #[error("engine connection lost before an outcome was reported")]
    ConnectionLost,
}

/// Reference to one submitted unit of work, used exactly once to await its
/// terminal outcome.
///
/// There is no deadline here: `outcome` waits as long as the engine keeps
/// the work alive. Callers that need a bound should wrap the call in
/// `tokio::time::timeout` and treat expiry as its own condition. Dropping
/// the handle does not cancel the work, which runs to completion or to
/// retry exhaustion on the engine.
pub struct WorkHandle {
    id: WorkId,
    rx: oneshot::Receiver<Outcome>,
}

impl std::fmt::Debug for WorkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkHandle").field("id", &self.id).finish()
    }
}

impl WorkHandle {
    /// Pair with the sender half kept by the [`Dispatcher`] implementation;
    /// resolving (or dropping) that sender resolves this handle.
    pub fn new(id: WorkId, rx: oneshot::Receiver<Outcome>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> WorkId {
        self.id
    }

    /// Wait (cooperatively) for the terminal outcome.
    pub async fn outcome(self) -> Result<Outcome, AwaitError> {
        self.rx.await.map_err(|_| AwaitError::ConnectionLost)
    }
}

/// Submission port: hand a unit of work to the engine.
///
/// `submit` is enqueue-only and expected to be fast; execution is awaited
/// separately through the returned handle. Implementations must accept
/// concurrent submits over one shared connection; submissions are
/// independent and do not serialize on each other.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn submit(&self, submission: WorkSubmission) -> Result<WorkHandle, SubmitError>;
}
