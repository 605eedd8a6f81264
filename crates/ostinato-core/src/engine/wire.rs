//! Wire protocol: one JSON frame per line over TCP.
//!
//! Request/response pairs correlate on a client-chosen `seq`; outcome
//! pushes correlate on the work id. A connection starts with `hello` /
//! `hello_ok` and speaks only the frames for its declared role afterwards.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::domain::{Outcome, QueueEntry, QueueName, TaskKind, WorkId, WorkSubmission};
use crate::ports::SubmitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    Gateway,
    Worker,
}

/// Frames sent by a gateway or worker to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Hello { role: PeerRole },
    Submit { seq: u64, submission: WorkSubmission },
    Register { queue: QueueName, kinds: Vec<TaskKind> },
    Lease { seq: u64 },
    Complete { id: WorkId, outcome: Outcome },
}

/// Frames sent by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    HelloOk,
    Submitted { seq: u64 },
    Rejected { seq: u64, fault: SubmitFault, message: String },
    Registered { queue: QueueName },
    Entry { seq: u64, entry: QueueEntry },
    Done { id: WorkId, outcome: Outcome },
}

/// Submission rejection reasons that survive the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitFault {
    DuplicateId,
    Invalid,
    QueueUnavailable,
}

impl SubmitFault {
    pub fn of(error: &SubmitError) -> Self {
        match error {
            SubmitError::DuplicateId(_) => Self::DuplicateId,
            SubmitError::QueueUnavailable(_) => Self::QueueUnavailable,
            // Connection-level failures never originate server-side.
            _ => Self::Invalid,
        }
    }

    pub fn into_error(self, id: WorkId, queue: &QueueName, message: String) -> SubmitError {
        match self {
            Self::DuplicateId => SubmitError::DuplicateId(id),
            Self::Invalid => SubmitError::Invalid(message),
            Self::QueueUnavailable => SubmitError::QueueUnavailable(queue.clone()),
        }
    }
}

/// Write one frame as a JSON line and flush it.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

/// Read one frame. `None` on clean EOF; malformed lines are an error.
pub async fn read_frame<R, T>(reader: &mut R) -> std::io::Result<Option<T>>
where
    R: AsyncBufReadExt + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let frame = serde_json::from_str(&line)?;
    Ok(Some(frame))
}
