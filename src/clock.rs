//! Injectable time source. Production uses the wall clock; scenario tests
//! drive a mutable clock so resolver/daemon eligibility windows are deterministic.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that starts at a fixed instant and only advances when told to.
/// Follows the same in-memory test-double pattern used elsewhere in this
/// crate, generalized here to time instead of storage.
#[derive(Debug, Clone)]
pub struct TestClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().expect("test clock lock poisoned") = instant;
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.now.lock().expect("test clock lock poisoned");
        *guard = *guard + delta;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("test clock lock poisoned")
    }
}
