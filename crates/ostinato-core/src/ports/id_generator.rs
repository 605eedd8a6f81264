//! Work id generation.
//!
//! Randomness-based rather than counter-based: ids must stay unique across
//! process restarts and across concurrently running gateways without any
//! coordination.

use ulid::Ulid;

use crate::domain::WorkId;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> WorkId;
}

/// ULID-based generator: clock millis for the timestamp half, 80 random
/// bits for the rest.
///
/// If the process entropy source fails, `rand::random` panics: the
/// generator produces no id rather than a weak or duplicate one.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate(&self) -> WorkId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        WorkId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::ports::{FixedClock, SystemClock};

    #[test]
    fn generates_unique_ids() {
        let ids = UlidGenerator::new(SystemClock);
        let a = ids.generate();
        let b = ids.generate();
        assert_ne!(a, b);
    }

    #[test]
    fn fixed_clock_pins_the_timestamp_half() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let ids = UlidGenerator::new(FixedClock::new(at));

        let id = ids.generate();
        assert_eq!(id.as_ulid().timestamp_ms(), at.timestamp_millis() as u64);
    }

    #[test]
    fn ten_thousand_concurrent_ids_do_not_collide() {
        let ids = Arc::new(UlidGenerator::new(SystemClock));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..1250).map(|_| ids.generate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(seen.insert(id), "duplicate id generated: {id}");
            }
        }
        assert_eq!(seen.len(), 10_000);
    }
}
