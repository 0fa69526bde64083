//! Check-in gating and the shared check-in transition.
//!
//! Every check-in, manual or automatic, passes the same global cooldown and
//! ends in [`apply`], which resets the countdown, returns the phase to
//! monitoring and re-arms the pre-warning.

use super::deadline::deadline;
use crate::error::CheckInRejection;
use crate::events::{CheckInSource, Effect, Notice, SwitchEvent};
use crate::journal::{LogKind, NoticeCategory};
use crate::model::{Phase, Settings, UserStatus};
use crate::store::StoreKey;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

/// Time left on the global cooldown, or `None` once it has elapsed.
pub fn cooldown_remaining(
    status: &UserStatus,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let elapsed = status.since_last_check_in(now);
    (elapsed < cooldown).then(|| cooldown - elapsed)
}

/// Checks the preconditions of a manual check-in without touching state.
pub fn gate_manual(
    status: &UserStatus,
    cooldown: Duration,
    tz: &Tz,
    now: DateTime<Utc>,
) -> Result<(), CheckInRejection> {
    if let Some(remaining) = cooldown_remaining(status, cooldown, now) {
        return Err(CheckInRejection::CooldownActive { remaining });
    }
    if let Some(last) = status.last_manual_check_in {
        if crate::common::same_calendar_day(last, now, tz) {
            return Err(CheckInRejection::AlreadyCheckedInToday);
        }
    }
    Ok(())
}

/// Applies a successful check-in and returns its effects.
///
/// Source-specific bookkeeping (`lastManualCheckIn`, the step and heart-rate
/// markers) is the caller's job; this handles what every check-in shares.
pub fn apply(
    status: &mut UserStatus,
    settings: &Settings,
    source: CheckInSource,
    description: String,
    now: DateTime<Utc>,
) -> Vec<Effect> {
    let previous_phase = status.phase;
    status.last_check_in = now;
    status.phase = Phase::Monitoring;
    status.pre_warning_sent = false;

    let title = match source {
        CheckInSource::Manual => "Manual check-in",
        CheckInSource::Steps | CheckInSource::HeartRate => "Automatic check-in",
        CheckInSource::Activation => "Deadline aligned with service",
    };

    let mut effects = vec![
        Effect::Persist(StoreKey::Status),
        Effect::Log {
            kind: LogKind::Success,
            title: title.into(),
            description,
        },
        Effect::Notify(Notice {
            id: "check-in",
            title: "Checked in".into(),
            body: "Your survival countdown has been reset.".into(),
            category: NoticeCategory::System,
        }),
        Effect::Announce(SwitchEvent::CheckedIn { source, at: now }),
    ];
    if previous_phase != Phase::Monitoring {
        effects.push(Effect::Announce(SwitchEvent::PhaseChanged {
            from: previous_phase,
            to: Phase::Monitoring,
            at: now,
        }));
    }
    if status.is_authorized && source != CheckInSource::Activation {
        effects.push(Effect::ExtendRemoteDeadline {
            deadline: deadline(now, settings.interval()),
            grace_minutes: settings.confirmation_delay_minutes,
        });
    }
    effects
}
