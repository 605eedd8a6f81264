//! Work identifiers.
//!
//! Ids are ULID-backed: sortable by creation time, generated without any
//! coordination between processes, 128-bit. The string form carries a
//! `work-` prefix so ids are recognizable in logs.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifier of one submitted unit of work.
///
/// Uniqueness across all submissions to an engine instance is a correctness
/// requirement, not a nicety: the engine keys its records by this id.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkId(Ulid);

impl WorkId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for WorkId {
    fn from(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "work-{}", self.0)
    }
}
