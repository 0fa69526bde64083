//! On-device notification delivery.
//!
//! The engine only ever schedules; whether a notification is actually shown is
//! up to the host platform. Delivery is best effort.

use std::time::Duration;
use tracing::info;

pub trait Notifier: Send + Sync {
    /// Schedules a local notification. A later notification with the same
    /// `id` replaces an earlier one.
    fn schedule_local(&self, id: &str, title: &str, body: &str, delay: Duration);
}

/// Writes notifications to the log. Used by headless hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn schedule_local(&self, id: &str, title: &str, body: &str, delay: Duration) {
        if delay.is_zero() {
            info!("[NOTIFY:{}] {}: {}", id, title, body);
        } else {
            info!("[NOTIFY:{} in {:?}] {}: {}", id, delay, title, body);
        }
    }
}
