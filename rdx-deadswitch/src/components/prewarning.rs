//! The one-shot pre-warning, fired shortly before the deadline.
//!
//! Independent of the phase machine. The `preWarningSent` flag lives in the
//! persisted status, so the warning does not repeat after a restart; only a
//! check-in re-arms it.

use super::deadline::Countdown;
use crate::events::{Effect, Notice, SwitchEvent};
use crate::journal::{LogKind, NoticeCategory};
use chrono::{DateTime, Duration, Utc};

/// Returns `true` when the pre-warning is due for this countdown.
pub fn is_due(countdown: &Countdown, lead: Duration, already_sent: bool) -> bool {
    !already_sent && !countdown.expired && countdown.remaining_ms <= lead.num_milliseconds()
}

/// Effects of firing the pre-warning. The caller sets the flag.
pub fn fire(deadline: DateTime<Utc>, lead: Duration, authorized: bool) -> Vec<Effect> {
    let minutes = lead.num_minutes();
    let mut effects = vec![
        Effect::Notify(Notice {
            id: "pre-warning",
            title: "Check-in due soon".into(),
            body: format!("Your check-in deadline is less than {minutes} minutes away."),
            category: NoticeCategory::Emergency,
        }),
        Effect::Log {
            kind: LogKind::Alert,
            title: "Pre-warning sent".into(),
            description: format!("Deadline at {}.", deadline.to_rfc3339()),
        },
        Effect::Announce(SwitchEvent::PreWarning { deadline }),
    ];
    if authorized {
        effects.push(Effect::RequestSelfNotification);
    }
    effects
}
