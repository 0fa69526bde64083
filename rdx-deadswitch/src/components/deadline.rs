//! The deadline calculator.
//!
//! A pure function of the last check-in, the interval and the current time. It
//! looks only at true elapsed wall-clock time, so it gives the same answer no
//! matter how often or how irregularly it is called.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Remaining time until the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Countdown {
    /// Whole hours left (may exceed 24). Zero once expired.
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
    /// Signed; negative once the deadline has passed.
    pub remaining_ms: i64,
    pub expired: bool,
}

impl Countdown {
    /// Milliseconds elapsed since the deadline, or zero before it.
    pub fn overdue_ms(&self) -> i64 {
        (-self.remaining_ms).max(0)
    }
}

/// `last_check_in + interval`, saturating at the end of representable time.
pub fn deadline(last_check_in: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    last_check_in
        .checked_add_signed(interval)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Computes the countdown for `now`.
pub fn countdown(last_check_in: DateTime<Utc>, interval: Duration, now: DateTime<Utc>) -> Countdown {
    let remaining_ms = (deadline(last_check_in, interval) - now).num_milliseconds();
    let display_secs = remaining_ms.max(0) / 1000;
    Countdown {
        hours: display_secs / 3600,
        minutes: (display_secs % 3600) / 60,
        seconds: display_secs % 60,
        remaining_ms,
        expired: remaining_ms <= 0,
    }
}
