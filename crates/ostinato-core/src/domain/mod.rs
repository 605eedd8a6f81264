//! Domain model (ids, submissions, outcomes, retry policy).

pub mod ids;
pub mod outcome;
pub mod retry;
pub mod submission;

pub use ids::WorkId;
pub use outcome::Outcome;
pub use retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};
pub use submission::{DEFAULT_TASK_QUEUE, QueueEntry, QueueName, TaskKind, WorkSubmission};
