//! Injectable time and identifier sources.
//!
//! Components take an `Arc<dyn Clock>` and an `Arc<dyn IdGenerator>` at
//! construction instead of reaching for globals, so tests can pin both.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Source of fresh unique identifiers.
pub trait IdGenerator: Send + Sync {
    /// Return a new identifier, never returned before by this generator.
    fn new_id(&self) -> Uuid;
}

/// [`Clock`] backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// [`IdGenerator`] producing random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn new_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn test_random_ids_are_unique() {
        let ids = RandomIds;
        assert_ne!(ids.new_id(), ids.new_id());
    }
}
