//! Retry policy attached to each submission.
//!
//! The policy governs how many times the *engine* runs a unit of work
//! before reporting a terminal failure. The gateway submits exactly once;
//! it never retries on its own.

use serde::{Deserialize, Serialize};

/// Default number of engine-side attempts per unit of work.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Per-submission retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum execution attempts, including the first one. Must be >= 1.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_three_attempts() {
        assert_eq!(RetryPolicy::default().max_attempts, 3);
    }
}
