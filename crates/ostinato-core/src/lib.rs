//! ostinato-core
//!
//! Core building blocks for the ostinato dispatch-and-execute pair.
//!
//! - **domain**: data model (work ids, submissions, outcomes, retry policy)
//! - **ports**: abstraction layer (Clock, IdGenerator, Dispatcher, WorkSource)
//! - **engine**: orchestration engine surface: the in-memory engine used for
//!   development and tests, plus the wire protocol, the gateway-side client,
//!   the worker-side connection, and the dev engine server
//! - **worker**: worker runtime (task registry + bounded executor loop)

pub mod domain;
pub mod engine;
pub mod ports;
pub mod worker;
