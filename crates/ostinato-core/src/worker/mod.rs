//! Worker runtime: registry of task handlers + the bounded execution loop.

pub mod registry;
pub mod runner;

pub use registry::{HandlerError, RegistryError, TaskHandler, TaskRegistry};
pub use runner::{Worker, WorkerHandle};
