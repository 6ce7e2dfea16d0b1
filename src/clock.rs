//! Time source abstraction.
//!
//! The coordinator must never derive a timer deadline from wall-clock time
//! (§9) and must render session timestamps in a named timezone rather than
//! the host's local offset. [`Clock`] keeps the two notions of time
//! separate so a caller can't accidentally cross them.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Monotonic milliseconds for timers, wall-clock for session timestamps.
pub trait Clock: Send + Sync {
    /// Monotonically increasing milliseconds, with an unspecified epoch.
    fn monotonic_ms(&self) -> u64;

    /// Current wall-clock instant, always UTC internally; rendered into a
    /// named timezone only at the point of use (filenames, logs).
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Production clock backed by [`std::time::Instant`] and system wall-clock.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock with independently steppable monotonic and wall-clock readings.
///
/// Scenario tests (§8) drive this directly instead of sleeping in real time.
pub struct ManualClock {
    monotonic_ms: AtomicI64,
    wall: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start_wall: DateTime<Utc>) -> Self {
        Self {
            monotonic_ms: AtomicI64::new(0),
            wall: Mutex::new(start_wall),
        }
    }

    /// Advance both the monotonic reading and wall-clock reading by `ms`.
    pub fn advance_ms(&self, ms: u64) {
        self.monotonic_ms.fetch_add(ms as i64, Ordering::SeqCst);
        let mut wall = self.wall.lock();
        *wall += chrono::Duration::milliseconds(ms as i64);
    }

    pub fn set_wall(&self, wall: DateTime<Utc>) {
        *self.wall.lock() = wall;
    }
}

impl Clock for ManualClock {
    fn monotonic_ms(&self) -> u64 {
        self.monotonic_ms.load(Ordering::SeqCst).max(0) as u64
    }

    fn now_utc(&self) -> DateTime<Utc> {
        *self.wall.lock()
    }
}

/// Render the filename format required by the save worker (§6):
/// `recording-YYYY-MM-DD_HH-MM-SS-{AM|PM}.<ext>`, rendered in `timezone_id`.
///
/// Falls back to UTC if `timezone_id` is not a recognized IANA name; the
/// fallback is logged by the caller, not here, since this is a pure function.
pub fn render_session_filename(
    first_detected_at: DateTime<Utc>,
    timezone_id: &str,
    ext: &str,
) -> String {
    let tz: chrono_tz::Tz = timezone_id.parse().unwrap_or(chrono_tz::UTC);
    let local = first_detected_at.with_timezone(&tz);
    format!("recording-{}.{}", local.format("%Y-%m-%d_%I-%M-%S-%p"), ext)
}

#[cfg(test)]
#[path = "clock_test.rs"]
mod tests;
