//! Clock injection.
//!
//! Every aggregator takes a `Clock` rather than calling `Utc::now()`
//! directly, mirroring the original's `timer=datetime.now` constructor
//! parameter threaded through every `Aggregator.__init__`
//! (`google/scc/aggregators/check_request.py`,
//! `endpoints_management/control/quota_request.py`). Tests inject a
//! controllable clock instead of sleeping.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A source of "now", injectable so tests can advance time deterministically.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The default clock: wall-clock `Utc::now()`.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// A clock that returns a fixed, externally-advanceable instant. Used in
/// tests to exercise flush/expiration boundaries exactly.
#[derive(Clone)]
pub struct FixedClock {
    now: Arc<parking_lot::Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(parking_lot::Mutex::new(start)),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn as_clock(&self) -> Clock {
        let inner = self.now.clone();
        Arc::new(move || *inner.lock())
    }
}
