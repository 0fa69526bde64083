//! Defines all configuration structures for the Deadswitch engine.
//!
//! These structs are designed to be deserialized from a configuration file
//! (e.g., a TOML file) using `serde`, layered with `DEADSWITCH__*` environment
//! variables. This allows the engine's cadence, protocol constants, calendar
//! timezone and remote endpoint to be defined externally from the application
//! code.
//!
//! User-editable values (check-in interval, step threshold, identity) are *not*
//! part of this file; they live in [`crate::model::Settings`] and are persisted
//! through the store.

use anyhow::Context;
use chrono::Duration;
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

/// The top-level configuration for the `SwitchEngine`.
#[derive(Debug, Clone, Deserialize)]
pub struct SwitchConfig {
    /// The tick speed of the master `SystemClock`.
    #[serde(default = "default_resolution")]
    pub resolution: ClockResolution,

    /// Timing constants of the survival-confirmation protocol.
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Calendar settings for once-per-day gating.
    #[serde(default)]
    pub calendar: CalendarConfig,

    /// Wearable polling settings.
    #[serde(default)]
    pub sensor: SensorConfig,

    /// Remote heartbeat service settings.
    #[serde(default)]
    pub cloud: CloudConfig,

    /// Where the file-backed store keeps its blobs.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Defines the operational speed of the `SystemClock`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClockResolution {
    /// 4 ticks per second. Smooth enough for a live countdown display.
    Display,
    /// ~1 tick per second. Enough for headless operation.
    Low,
    /// A user-defined speed in ticks per second.
    Custom { ticks_per_second: u64 },
}

impl ClockResolution {
    /// The period between two ticks.
    pub fn period(&self) -> StdDuration {
        match self {
            ClockResolution::Display => StdDuration::from_millis(250),
            ClockResolution::Low => StdDuration::from_secs(1),
            ClockResolution::Custom { ticks_per_second } => {
                StdDuration::from_micros(1_000_000 / (*ticks_per_second).max(1))
            }
        }
    }
}

/// Timing constants of the protocol.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    /// Minimum time between two successful check-ins of any kind.
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: u32,

    /// How long before the deadline the one-shot pre-warning fires.
    #[serde(default = "default_pre_warning_minutes")]
    pub pre_warning_minutes: u32,

    /// Quiet period before a configuration change is pushed to the cloud.
    #[serde(default = "default_sync_debounce_ms")]
    pub sync_debounce_ms: u64,
}

/// Calendar configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    /// The timezone used to decide whether two instants share a calendar day.
    /// Uses the string names from the IANA Time Zone Database
    /// (e.g., "Asia/Shanghai").
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
}

/// Sensor bridge polling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Samples older than this are not evidence of life.
    #[serde(default = "default_max_sample_age_secs")]
    pub max_sample_age_secs: u64,
}

/// Remote heartbeat service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudConfig {
    /// Base URL of the switch service. When absent the engine runs local-only.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// File store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// The protocol constants resolved into `chrono` durations, as consumed by the
/// controller and its components.
#[derive(Debug, Clone)]
pub struct ProtocolRules {
    pub cooldown: Duration,
    pub pre_warning_lead: Duration,
    pub max_sample_age: Duration,
    pub timezone: Tz,
}

impl SwitchConfig {
    /// Loads the configuration from an optional TOML file, overlaid with
    /// `DEADSWITCH__SECTION__KEY` environment variables.
    ///
    /// A missing file is not an error; every field has a default.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        let file = path.unwrap_or_else(|| Path::new("deadswitch.toml"));
        builder = builder.add_source(config::File::from(file).required(path.is_some()));
        builder = builder.add_source(
            config::Environment::with_prefix("DEADSWITCH")
                .prefix_separator("__")
                .separator("__"),
        );
        builder
            .build()
            .with_context(|| format!("failed to read configuration from {}", file.display()))?
            .try_deserialize()
            .context("invalid deadswitch configuration")
    }

    /// Resolves the protocol constants into the form the controller uses.
    pub fn rules(&self) -> ProtocolRules {
        ProtocolRules {
            cooldown: Duration::hours(i64::from(self.protocol.cooldown_hours)),
            pre_warning_lead: Duration::minutes(i64::from(self.protocol.pre_warning_minutes)),
            max_sample_age: Duration::seconds(
                self.sensor.max_sample_age_secs.min(u64::from(u32::MAX)) as i64,
            ),
            timezone: self.calendar.timezone,
        }
    }

    pub fn sync_debounce(&self) -> StdDuration {
        StdDuration::from_millis(self.protocol.sync_debounce_ms)
    }

    pub fn sensor_poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.sensor.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.cloud.request_timeout_secs)
    }
}

impl Default for ProtocolRules {
    fn default() -> Self {
        SwitchConfig::default().rules()
    }
}

// --- Default value functions for serde ---

fn default_resolution() -> ClockResolution {
    ClockResolution::Display
}

fn default_cooldown_hours() -> u32 {
    6
}

fn default_pre_warning_minutes() -> u32 {
    30
}

fn default_sync_debounce_ms() -> u64 {
    3000
}

fn default_timezone() -> Tz {
    Tz::UTC
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_max_sample_age_secs() -> u64 {
    900
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".deadswitch")
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            cooldown_hours: default_cooldown_hours(),
            pre_warning_minutes: default_pre_warning_minutes(),
            sync_debounce_ms: default_sync_debounce_ms(),
        }
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_sample_age_secs: default_max_sample_age_secs(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_protocol() {
        let config = SwitchConfig::default();
        let rules = config.rules();
        assert_eq!(rules.cooldown, Duration::hours(6));
        assert_eq!(rules.pre_warning_lead, Duration::minutes(30));
        assert_eq!(rules.max_sample_age, Duration::minutes(15));
        assert_eq!(config.sync_debounce(), StdDuration::from_millis(3000));
        assert_eq!(config.resolution.period(), StdDuration::from_millis(250));
        assert!(config.cloud.base_url.is_none());
    }

    #[test]
    fn loads_partial_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
resolution = "low"

[calendar]
timezone = "Asia/Shanghai"

[cloud]
base_url = "https://switch.example.com"
"#
        )
        .unwrap();

        let config = SwitchConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.resolution, ClockResolution::Low);
        assert_eq!(config.calendar.timezone, Tz::Asia__Shanghai);
        assert_eq!(
            config.cloud.base_url.as_deref(),
            Some("https://switch.example.com")
        );
        assert_eq!(config.protocol.cooldown_hours, 6);
    }

    #[test]
    fn custom_resolution_never_divides_by_zero() {
        let res = ClockResolution::Custom { ticks_per_second: 0 };
        assert_eq!(res.period(), StdDuration::from_secs(1));
    }
}
