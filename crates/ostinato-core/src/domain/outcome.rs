//! Outcome model: the terminal result of one unit of work.
//!
//! Produced exactly once per submission (by the engine, after its retries
//! are exhausted or an attempt succeeds) and consumed exactly once by the
//! awaiting submitter.

use serde::{Deserialize, Serialize};

/// Terminal result of a unit of work.
///
/// Serialized with a SCREAMING_SNAKE_CASE `kind` tag:
/// `{"kind":"SUCCESS","result":...}` / `{"kind":"FAILURE","reason":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success { result: serde_json::Value },
    Failure { reason: String },
}

impl Outcome {
    pub fn success(result: serde_json::Value) -> Self {
        Self::Success { result }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}
