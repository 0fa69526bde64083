//! Contains common, primitive types shared across the Deadswitch engine.
//!
//! This module defines the key types used to identify contacts and devices held
//! by the registry, plus a few time helpers. Using distinct key types keeps a
//! contact handle from ever being used to look up a device.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use slotmap::new_key_type;

new_key_type! {
    /// Uniquely and safely identifies a contact within the registry.
    ///
    /// Keys are never reused, so a stale handle held by a host after removal
    /// simply stops resolving.
    pub struct ContactId;

    /// Uniquely and safely identifies a paired device within the registry.
    pub struct DeviceId;
}

/// Returns `true` when both instants fall on the same calendar day in `tz`.
pub fn same_calendar_day(a: DateTime<Utc>, b: DateTime<Utc>, tz: &Tz) -> bool {
    a.with_timezone(tz).date_naive() == b.with_timezone(tz).date_naive()
}

/// Converts epoch seconds to a UTC timestamp, saturating at the epoch.
pub fn from_epoch_secs(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
