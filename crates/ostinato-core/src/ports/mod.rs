//! Ports: the trait seams between the gateway/worker logic and the
//! orchestration engine.
//!
//! Both the remote TCP implementations and the in-memory engine plug into
//! these, which keeps the submit/await and pull/report paths independently
//! testable.

pub mod clock;
pub mod dispatch;
pub mod id_generator;
pub mod work_source;

pub use clock::{Clock, FixedClock, SystemClock};
pub use dispatch::{AwaitError, ConnectError, Dispatcher, SubmitError, WorkHandle};
pub use id_generator::{IdGenerator, UlidGenerator};
pub use work_source::{ReportError, WorkLease, WorkSource};
