//! In-memory orchestration engine.
//!
//! Honors the same contract the pair expects from a production engine:
//! enqueue, blocking lease per queue, per-entry retry up to the
//! submission's `max_attempts`, and a single terminal outcome per
//! submission. State lives in one mutex-guarded struct; queue structures
//! hold ids only, and the record map is the single source of truth.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, oneshot};

use crate::domain::{Outcome, QueueEntry, QueueName, WorkId, WorkSubmission};
use crate::ports::{Dispatcher, ReportError, SubmitError, WorkHandle, WorkLease, WorkSource};

/// Backoff between engine-side retries of one unit of work.
///
/// `delay = base_delay * multiplier^(attempts - 1)`.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl RetryBackoff {
    pub fn new(base_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            multiplier,
        }
    }

    /// No delay between attempts. Keeps retry tests fast.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay_secs)
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

/// Work state inside the engine.
///
/// Transitions:
/// - Queued -> Running -> Succeeded
/// - Queued -> Running -> RetryScheduled -> Queued (until max_attempts)
/// - Queued -> Running -> Failed (max_attempts exhausted)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkState {
    Queued,
    Running,
    RetryScheduled,
    Succeeded,
    Failed,
}

/// Per-state totals, for tests and status logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineCounts {
    pub queued: usize,
    pub running: usize,
    pub retry_scheduled: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Record for one submission: metadata + the waiter that gets the terminal
/// outcome. All state transitions happen through the methods here.
struct WorkRecord {
    submission: WorkSubmission,
    state: WorkState,
    attempts: u32,
    last_error: Option<String>,
    next_run_at: Option<Instant>,
    waiter: Option<oneshot::Sender<Outcome>>,
    outcome: Option<Outcome>,
}

impl WorkRecord {
    fn new(submission: WorkSubmission, waiter: oneshot::Sender<Outcome>) -> Self {
        Self {
            submission,
            state: WorkState::Queued,
            attempts: 0,
            last_error: None,
            next_run_at: None,
            waiter: Some(waiter),
            outcome: None,
        }
    }

    fn start_attempt(&mut self) -> QueueEntry {
        self.state = WorkState::Running;
        self.attempts += 1;
        QueueEntry {
            id: self.submission.id,
            kind: self.submission.kind.clone(),
            args: self.submission.args.clone(),
            attempt: self.attempts,
        }
    }

    fn schedule_retry(&mut self, next_run_at: Instant, error: String) {
        self.state = WorkState::RetryScheduled;
        self.next_run_at = Some(next_run_at);
        self.last_error = Some(error);
    }

    fn requeue(&mut self) {
        self.state = WorkState::Queued;
        self.next_run_at = None;
    }

    /// Reach a terminal state and resolve the waiter.
    ///
    /// The send result is ignored: a submitter that dropped its handle gave
    /// up on the answer, but the work still completed and stays recorded.
    fn finish(&mut self, outcome: Outcome) {
        self.state = if outcome.is_success() {
            WorkState::Succeeded
        } else {
            WorkState::Failed
        };
        if let Outcome::Failure { reason } = &outcome {
            self.last_error = Some(reason.clone());
        }
        if let Some(tx) = self.waiter.take() {
            let _ = tx.send(outcome.clone());
        }
        self.outcome = Some(outcome);
    }
}

/// Retry entry in the scheduled heap. Reverse ordering so `BinaryHeap`
/// acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledRetry {
    next_run_at: Instant,
    id: WorkId,
    queue: QueueName,
}

impl PartialOrd for ScheduledRetry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledRetry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.next_run_at.cmp(&self.next_run_at)
    }
}

struct EngineState {
    records: HashMap<WorkId, WorkRecord>,
    ready: HashMap<QueueName, VecDeque<WorkId>>,
    scheduled: BinaryHeap<ScheduledRetry>,
    notifiers: HashMap<QueueName, Arc<Notify>>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            ready: HashMap::new(),
            scheduled: BinaryHeap::new(),
            notifiers: HashMap::new(),
        }
    }

    fn notifier(&mut self, queue: &QueueName) -> Arc<Notify> {
        Arc::clone(self.notifiers.entry(queue.clone()).or_default())
    }

    /// Move retries whose time has come back into their ready queue.
    fn promote_scheduled(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.scheduled.peek() {
            if entry.next_run_at > now {
                break; // heap is sorted, nothing else is due
            }
            let entry = self.scheduled.pop().expect("peeked entry exists");
            if let Some(record) = self.records.get_mut(&entry.id)
                && record.state == WorkState::RetryScheduled
            {
                record.requeue();
                self.ready.entry(entry.queue).or_default().push_back(entry.id);
            }
        }
    }

    fn counts(&self) -> EngineCounts {
        let mut counts = EngineCounts::default();
        for record in self.records.values() {
            match record.state {
                WorkState::Queued => counts.queued += 1,
                WorkState::Running => counts.running += 1,
                WorkState::RetryScheduled => counts.retry_scheduled += 1,
                WorkState::Succeeded => counts.succeeded += 1,
                WorkState::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

/// In-memory engine. Cheap to share: wrap in an `Arc` and hand it to both
/// sides of the pair.
pub struct InMemoryEngine {
    state: Mutex<EngineState>,
    backoff: RetryBackoff,
}

impl InMemoryEngine {
    pub fn new(backoff: RetryBackoff) -> Self {
        Self {
            state: Mutex::new(EngineState::new()),
            backoff,
        }
    }

    /// A pull handle for one queue.
    pub fn source(self: &Arc<Self>, queue: QueueName) -> InMemorySource {
        InMemorySource {
            engine: Arc::clone(self),
            queue,
        }
    }

    pub async fn counts(&self) -> EngineCounts {
        self.state.lock().await.counts()
    }
}

#[async_trait]
impl Dispatcher for InMemoryEngine {
    async fn submit(&self, submission: WorkSubmission) -> Result<WorkHandle, SubmitError> {
        if submission.kind.as_str().is_empty() {
            return Err(SubmitError::Invalid("empty task kind".to_string()));
        }
        if submission.retry.max_attempts == 0 {
            return Err(SubmitError::Invalid(
                "retry policy must allow at least one attempt".to_string(),
            ));
        }
        if submission.queue.as_str().is_empty() {
            return Err(SubmitError::QueueUnavailable(submission.queue));
        }

        let id = submission.id;
        let queue = submission.queue.clone();
        let (tx, rx) = oneshot::channel();

        let notify = {
            let mut state = self.state.lock().await;
            if state.records.contains_key(&id) {
                return Err(SubmitError::DuplicateId(id));
            }
            state.records.insert(id, WorkRecord::new(submission, tx));
            state.ready.entry(queue.clone()).or_default().push_back(id);
            state.notifier(&queue)
        };

        // Wake a leasing worker outside the lock.
        notify.notify_one();

        Ok(WorkHandle::new(id, rx))
    }
}

/// Pull handle bound to one queue of an [`InMemoryEngine`].
pub struct InMemorySource {
    engine: Arc<InMemoryEngine>,
    queue: QueueName,
}

#[async_trait]
impl WorkSource for InMemorySource {
    async fn lease(&self) -> Option<Box<dyn WorkLease>> {
        loop {
            let (notify, next_wake) = {
                let mut state = self.engine.state.lock().await;
                state.promote_scheduled();

                if let Some(id) = state.ready.get_mut(&self.queue).and_then(VecDeque::pop_front)
                    && let Some(record) = state.records.get_mut(&id)
                {
                    let entry = record.start_attempt();
                    return Some(Box::new(InMemoryLease {
                        entry,
                        engine: Arc::clone(&self.engine),
                    }));
                }

                // Nothing ready: wait for a submit/requeue notification or
                // for the earliest scheduled retry, whichever comes first.
                (
                    state.notifier(&self.queue),
                    state.scheduled.peek().map(|s| s.next_run_at),
                )
            };

            if let Some(wake_at) = next_wake {
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = tokio::time::sleep_until(wake_at.into()) => {}
                }
            } else {
                notify.notified().await;
            }
        }
    }
}

struct InMemoryLease {
    entry: QueueEntry,
    engine: Arc<InMemoryEngine>,
}

#[async_trait]
impl WorkLease for InMemoryLease {
    fn entry(&self) -> &QueueEntry {
        &self.entry
    }

    async fn ack(self: Box<Self>, result: serde_json::Value) -> Result<(), ReportError> {
        let mut state = self.engine.state.lock().await;
        let record = state
            .records
            .get_mut(&self.entry.id)
            .ok_or(ReportError::UnknownWork(self.entry.id))?;
        record.finish(Outcome::success(result));
        Ok(())
    }

    async fn fail(self: Box<Self>, reason: String) -> Result<(), ReportError> {
        let notify = {
            let mut state = self.engine.state.lock().await;
            let backoff = self.engine.backoff.clone();
            let record = state
                .records
                .get_mut(&self.entry.id)
                .ok_or(ReportError::UnknownWork(self.entry.id))?;

            if record.attempts >= record.submission.retry.max_attempts {
                record.finish(Outcome::failure(reason));
                None
            } else {
                let next_run_at = Instant::now() + backoff.next_delay(record.attempts);
                let queue = record.submission.queue.clone();
                record.schedule_retry(next_run_at, reason);
                state.scheduled.push(ScheduledRetry {
                    next_run_at,
                    id: self.entry.id,
                    queue: queue.clone(),
                });
                Some(state.notifier(&queue))
            }
        };

        // Notify outside the lock so a woken worker can take it immediately.
        if let Some(notify) = notify {
            notify.notify_one();
        }
        Ok(())
    }
}
