use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub f64);

impl Timestamp {
    pub fn from_secs(secs: f64) -> Self {
        Timestamp(secs)
    }

    pub fn as_secs(self) -> f64 {
        self.0
    }

    /// Wall-clock time.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Timestamp(secs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.0)
    }
}

impl Sub for Timestamp {
    type Output = f64;

    fn sub(self, rhs: Timestamp) -> f64 {
        self.0 - rhs.0
    }
}

impl Sub<f64> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: f64) -> Timestamp {
        Timestamp(self.0 - rhs)
    }
}

impl Add<f64> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: f64) -> Timestamp {
        Timestamp(self.0 + rhs)
    }
}

/// Source of "now" for stamping observations and driving ticks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Reads the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Clock that only moves when told to. Used for replay and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, ts: Timestamp) {
        *self.now.lock() = ts;
    }

    pub fn advance(&self, secs: f64) {
        let mut now = self.now.lock();
        *now = *now + secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}
