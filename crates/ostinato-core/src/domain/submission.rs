//! Submissions and queue entries.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::WorkId;
use super::retry::RetryPolicy;

/// Queue both binaries target unless overridden. Submissions and the worker
/// must agree on the queue name or dispatched work is never picked up;
/// sharing this constant is how the default configuration stays consistent.
pub const DEFAULT_TASK_QUEUE: &str = "GENERATE_MIDI_TASK_QUEUE";

/// The string key selecting which registered handler executes a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKind(String);

impl TaskKind {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Name of the queue through which the engine hands work to workers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for QueueName {
    fn default() -> Self {
        Self(DEFAULT_TASK_QUEUE.to_string())
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One durable, retry-governed unit of work handed to the engine.
///
/// Immutable once submitted; the engine owns it from then on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkSubmission {
    pub id: WorkId,
    pub kind: TaskKind,
    pub queue: QueueName,
    pub args: Vec<serde_json::Value>,
    pub retry: RetryPolicy,
}

impl WorkSubmission {
    pub fn new(
        id: WorkId,
        kind: TaskKind,
        queue: QueueName,
        args: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            id,
            kind,
            queue,
            args,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// An in-flight dequeued unit of work, as seen by a worker.
///
/// Exists only between dequeue and completion report. `attempt` is
/// 1-indexed and counts engine-side retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: WorkId,
    pub kind: TaskKind,
    pub args: Vec<serde_json::Value>,
    pub attempt: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn submission_defaults_to_standard_retry() {
        let s = WorkSubmission::new(
            WorkId::from_ulid(Ulid::new()),
            TaskKind::new("generate_midi"),
            QueueName::default(),
            vec![serde_json::json!("prompt"), serde_json::json!(120)],
        );
        assert_eq!(s.retry.max_attempts, 3);
        assert_eq!(s.queue.as_str(), DEFAULT_TASK_QUEUE);
    }

    #[test]
    fn submission_roundtrip_json() {
        let s = WorkSubmission::new(
            WorkId::from_ulid(Ulid::new()),
            TaskKind::new("generate_midi"),
            QueueName::new("q"),
            vec![serde_json::json!("arpeggio study"), serde_json::json!(90)],
        )
        .with_retry(RetryPolicy::new(5));

        let json = serde_json::to_string(&s).unwrap();
        let back: WorkSubmission = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, s.id);
        assert_eq!(back.kind, s.kind);
        assert_eq!(back.args, s.args);
        assert_eq!(back.retry.max_attempts, 5);
    }
}
