//! Task registry: kind -> handler.
//!
//! Built during worker startup (mutable), then shared immutably with the
//! execution loop. No locks needed at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::TaskKind;

/// Error raised by a task handler. Reported as a failed attempt; the
/// engine decides whether to retry.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// A handler for one task kind: given the submission's arguments, produce
/// a result payload or raise. Handlers may suspend for as long as they
/// need (network calls, rendering); the pool only bounds how many run at
/// once.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, args: &[serde_json::Value]) -> Result<serde_json::Value, HandlerError>;
}

impl std::fmt::Debug for dyn TaskHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TaskHandler")
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a handler for kind '{0}' is already registered")]
    DuplicateKind(TaskKind),

    #[error("no handler registered for kind '{0}'")]
    UnknownKind(TaskKind),

    #[error("expected kinds are not registered: {0:?}")]
    MissingKinds(Vec<TaskKind>),
}

/// Registry of handlers, keyed by kind.
#[derive(Default)]
pub struct TaskRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        kind: TaskKind,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(&kind) {
            return Err(RegistryError::DuplicateKind(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    /// Look up the handler for a dispatched kind. An unknown kind is a
    /// configuration mismatch between submitter and worker, not a worker
    /// crash: callers fail the single entry and keep pulling.
    pub fn resolve(&self, kind: &TaskKind) -> Result<Arc<dyn TaskHandler>, RegistryError> {
        self.handlers
            .get(kind)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownKind(kind.clone()))
    }

    /// The kinds to advertise when registering with the engine.
    pub fn kinds(&self) -> Vec<TaskKind> {
        self.handlers.keys().cloned().collect()
    }

    /// Fail fast at startup if an expected kind never got a handler,
    /// instead of discovering the gap one dispatched entry at a time.
    pub fn ensure_registered(&self, expected: &[TaskKind]) -> Result<(), RegistryError> {
        let missing: Vec<TaskKind> = expected
            .iter()
            .filter(|kind| !self.handlers.contains_key(*kind))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::MissingKinds(missing))
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OkHandler;

    #[async_trait]
    impl TaskHandler for OkHandler {
        async fn run(&self, _args: &[serde_json::Value]) -> Result<serde_json::Value, HandlerError> {
            Ok(serde_json::json!(null))
        }
    }

    #[test]
    fn register_then_resolve() {
        let mut registry = TaskRegistry::new();
        registry
            .register(TaskKind::new("generate_midi"), Arc::new(OkHandler))
            .unwrap();

        assert!(registry.resolve(&TaskKind::new("generate_midi")).is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = TaskRegistry::new();
        registry
            .register(TaskKind::new("generate_midi"), Arc::new(OkHandler))
            .unwrap();

        let err = registry
            .register(TaskKind::new("generate_midi"), Arc::new(OkHandler))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateKind(_)));
    }

    #[test]
    fn unknown_kind_is_an_error_not_a_panic() {
        let registry = TaskRegistry::new();
        let err = registry.resolve(&TaskKind::new("missing")).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn ensure_registered_reports_the_gap() {
        let mut registry = TaskRegistry::new();
        registry
            .register(TaskKind::new("generate_midi"), Arc::new(OkHandler))
            .unwrap();

        registry.ensure_registered(&[TaskKind::new("generate_midi")]).unwrap();

        let err = registry
            .ensure_registered(&[TaskKind::new("generate_midi"), TaskKind::new("transpose")])
            .unwrap_err();
        assert!(
            matches!(err, RegistryError::MissingKinds(missing) if missing == vec![TaskKind::new("transpose")])
        );
    }
}
