//! Orchestration engine surface.
//!
//! The engine itself is an external collaborator; this module holds what
//! the pair needs to talk to one:
//! - **memory**: in-memory engine honoring the submit/lease/retry contract,
//!   used directly in tests and behind the dev server
//! - **wire**: the line-delimited JSON frames both remote ends speak
//! - **client**: gateway-side remote client (`connect` + `submit`/await)
//! - **connection**: worker-side remote connection (`connect` + `register`
//!   + lease/report)
//! - **server**: dev engine server hosting an in-memory engine over TCP

pub mod client;
pub mod connection;
pub mod memory;
pub mod server;
pub mod wire;

pub use client::Client;
pub use connection::WorkerConnection;
pub use memory::{EngineCounts, InMemoryEngine, RetryBackoff};
pub use server::EngineServer;
