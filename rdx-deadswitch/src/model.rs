//! The persisted data model: user status, settings, samples, contacts, devices
//! and the memo.
//!
//! Field names serialize in camelCase so the blobs written by the store keep
//! the shape the remote service and older clients already understand. Every
//! struct tolerates missing fields, falling back to documented defaults.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The escalation stage of the protocol.
///
/// Ordered: `Monitoring < Warning < Executed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Monitoring,
    Warning,
    Executed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Phase::Monitoring => "monitoring",
            Phase::Warning => "warning",
            Phase::Executed => "executed",
        };
        f.write_str(label)
    }
}

/// The engine-owned survival status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    /// The most recent confirmed-alive event, manual or automatic.
    #[serde(default = "Utc::now")]
    pub last_check_in: DateTime<Utc>,
    /// The last phase whose transition effects were announced.
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub is_authorized: bool,
    /// Lifetime-once; never reset by the engine.
    #[serde(default)]
    pub steps_check_in_done: bool,
    #[serde(default)]
    pub last_manual_check_in: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_heart_rate_check_in: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pre_warning_sent: bool,
}

impl UserStatus {
    /// A fresh status whose countdown starts at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_check_in: now,
            phase: Phase::Monitoring,
            is_authorized: false,
            steps_check_in_done: false,
            last_manual_check_in: None,
            last_heart_rate_check_in: None,
            pre_warning_sent: false,
        }
    }

    /// Time elapsed since the last confirmed-alive event.
    pub fn since_last_check_in(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_check_in
    }
}

/// Upper bound on the check-in interval: ten years.
pub const MAX_INTERVAL_HOURS: u32 = 24 * 365 * 10;

/// User-adjustable protocol settings and identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub check_in_interval_hours: u32,
    pub min_steps: u32,
    /// The grace period between a missed deadline and final escalation.
    pub confirmation_delay_minutes: u32,
    pub user_name: String,
    pub user_email: String,
    pub user_phone: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_in_interval_hours: 72,
            min_steps: 2000,
            confirmation_delay_minutes: 60,
            user_name: String::new(),
            user_email: String::new(),
            user_phone: String::new(),
        }
    }
}

impl Settings {
    pub fn interval(&self) -> Duration {
        Duration::hours(i64::from(clamp_interval(self.check_in_interval_hours)))
    }

    /// Brings persisted values back into range. Returns `true` if anything
    /// was out of range.
    pub fn normalize(&mut self) -> bool {
        let hours = clamp_interval(self.check_in_interval_hours);
        let changed = hours != self.check_in_interval_hours;
        self.check_in_interval_hours = hours;
        changed
    }

    pub fn grace_period(&self) -> Duration {
        Duration::minutes(i64::from(self.confirmation_delay_minutes))
    }

    /// Cloud sync is only possible once the owner can be identified and
    /// reached: name, email and phone must all be present.
    pub fn is_cloud_eligible(&self) -> bool {
        [&self.user_name, &self.user_email, &self.user_phone]
            .iter()
            .all(|field| !field.trim().is_empty())
    }

    /// The first identity field that is still missing, if any.
    pub fn missing_identity(&self) -> Option<&'static str> {
        if self.user_name.trim().is_empty() {
            Some("name")
        } else if self.user_email.trim().is_empty() {
            Some("email")
        } else if self.user_phone.trim().is_empty() {
            Some("phone")
        } else {
            None
        }
    }
}

fn clamp_interval(hours: u32) -> u32 {
    hours.clamp(1, MAX_INTERVAL_HOURS)
}

/// A partial update to [`Settings`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub check_in_interval_hours: Option<u32>,
    pub min_steps: Option<u32>,
    pub confirmation_delay_minutes: Option<u32>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub user_phone: Option<String>,
}

impl SettingsPatch {
    /// Applies the patch, returning `true` if anything changed.
    pub fn apply_to(self, settings: &mut Settings) -> bool {
        let before = settings.clone();
        if let Some(hours) = self.check_in_interval_hours {
            settings.check_in_interval_hours = clamp_interval(hours);
        }
        if let Some(steps) = self.min_steps {
            settings.min_steps = steps;
        }
        if let Some(minutes) = self.confirmation_delay_minutes {
            settings.confirmation_delay_minutes = minutes;
        }
        if let Some(name) = self.user_name {
            settings.user_name = name;
        }
        if let Some(email) = self.user_email {
            settings.user_email = email;
        }
        if let Some(phone) = self.user_phone {
            settings.user_phone = phone;
        }
        *settings != before
    }
}

/// A live reading supplied by the sensor bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSample {
    pub heart_rate: u32,
    pub steps: u32,
    pub sample_time: DateTime<Utc>,
}

/// Which escalation stage a contact takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContactRole {
    /// Receives the warning when the deadline is missed.
    Emergency,
    /// Receives the memo when the protocol executes.
    AssetLiaison,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub name: String,
    pub role: ContactRole,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Wrist-worn; the only kind that can vouch for a heart rate.
    Watch,
    Phone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub name: String,
    pub kind: DeviceKind,
    pub connection: ConnectionState,
}

impl Device {
    pub fn is_connected_watch(&self) -> bool {
        self.kind == DeviceKind::Watch && self.connection == ConnectionState::Connected
    }
}

/// The memo released to asset-liaison contacts on execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Memo {
    pub content: String,
    pub is_signed: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub id: Option<String>,
}

impl Memo {
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }
}
