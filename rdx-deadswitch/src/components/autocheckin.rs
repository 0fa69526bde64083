//! The automatic check-in evaluator.
//!
//! Inspects the latest wearable sample and decides whether to check in on the
//! user's behalf. Rules are evaluated in a fixed priority order and at most one
//! fires per tick:
//!
//! 1. **Steps** (lifetime-once): the step count reached `minSteps` and the
//!    step rule has never fired before.
//! 2. **Heart rate** (once per calendar day): a connected watch reports a
//!    positive heart rate and the rule has not fired today.
//!
//! Nothing fires unless the user is authorized, their identity is complete
//! enough for cloud sync, and the global cooldown has elapsed. A sample only
//! counts if it was taken after the last check-in and is no older than the
//! configured sample age; a watch that stopped reporting proves nothing.

use super::checkin::cooldown_remaining;
use crate::common::same_calendar_day;
use crate::config::ProtocolRules;
use crate::model::{HealthSample, Settings, UserStatus};
use crate::registry::Registry;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoRule {
    Steps,
    HeartRate,
}

/// Evaluates the rules for `now`. Pure; mutates nothing.
pub fn evaluate(
    status: &UserStatus,
    settings: &Settings,
    registry: &Registry,
    sample: Option<&HealthSample>,
    rules: &ProtocolRules,
    now: DateTime<Utc>,
) -> Option<AutoRule> {
    if !status.is_authorized || !settings.is_cloud_eligible() {
        return None;
    }
    if cooldown_remaining(status, rules.cooldown, now).is_some() {
        return None;
    }
    let sample = sample?;
    if !is_fresh(sample, status, rules, now) {
        return None;
    }

    if !status.steps_check_in_done && sample.steps >= settings.min_steps {
        return Some(AutoRule::Steps);
    }

    let heart_rate_done_today = status
        .last_heart_rate_check_in
        .is_some_and(|last| same_calendar_day(last, now, &rules.timezone));
    if !heart_rate_done_today && registry.has_connected_watch() && sample.heart_rate > 0 {
        return Some(AutoRule::HeartRate);
    }

    None
}

fn is_fresh(
    sample: &HealthSample,
    status: &UserStatus,
    rules: &ProtocolRules,
    now: DateTime<Utc>,
) -> bool {
    sample.sample_time > status.last_check_in
        && sample.sample_time <= now
        && now - sample.sample_time <= rules.max_sample_age
}

/// Records that `rule` fired, before the shared check-in is applied.
pub fn mark_fired(status: &mut UserStatus, rule: AutoRule, now: DateTime<Utc>) {
    match rule {
        AutoRule::Steps => status.steps_check_in_done = true,
        AutoRule::HeartRate => status.last_heart_rate_check_in = Some(now),
    }
}
