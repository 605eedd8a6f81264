//! Pull/report port (the worker side of the engine boundary).

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{QueueEntry, WorkId};

/// Failure to report a completion back to the engine.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("engine connection lost")]
    ConnectionLost,

    #[error("unknown work id {0}")]
    UnknownWork(WorkId),
}

/// A leased queue entry. The holder must consume the lease with either
/// `ack` or `fail`; taking `self: Box<Self>` makes a second report
/// unrepresentable.
///
/// The engine decides what a `fail` means (retry or terminal failure);
/// the worker only reports what happened.
#[async_trait]
pub trait WorkLease: Send {
    fn entry(&self) -> &QueueEntry;

    /// Report a successful attempt with its result payload.
    async fn ack(self: Box<Self>, result: serde_json::Value) -> Result<(), ReportError>;

    /// Report a failed attempt.
    async fn fail(self: Box<Self>, reason: String) -> Result<(), ReportError>;
}

/// Source of queued work for one queue.
///
/// `lease` parks cooperatively until an entry is available; it never busy
/// polls. `None` means the source is gone (connection lost), which ends
/// the caller's pull loop.
#[async_trait]
pub trait WorkSource: Send + Sync {
    async fn lease(&self) -> Option<Box<dyn WorkLease>>;
}
