//! The protocol state machine.
//!
//! ```text
//!              expired                  overdue >= grace
//!  Monitoring ─────────► Warning ─────────────────────► Executed
//!      ▲                    │                              │
//!      └──── check-in ──────┴──────────── check-in ────────┘
//! ```
//!
//! The phase is level-triggered: [`derive_phase`] recomputes it from scratch
//! on every tick using only the countdown and the grace period, so a restart
//! in the middle of a warning lands on the same phase. [`transition_effects`]
//! turns a change between the last announced phase and the derived one into
//! the side effects the engine must perform.

use super::deadline::Countdown;
use crate::events::{Effect, Notice, SwitchEvent};
use crate::journal::{LogKind, NoticeCategory};
use crate::model::Phase;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Derives the phase for a countdown and a grace period.
pub fn derive_phase(countdown: &Countdown, grace: Duration) -> Phase {
    if !countdown.expired {
        Phase::Monitoring
    } else if countdown.overdue_ms() >= grace.num_milliseconds() {
        Phase::Executed
    } else {
        Phase::Warning
    }
}

/// What the state machine needs to know about the world to decide which
/// escalations are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationContext {
    pub authorized: bool,
    pub has_emergency_contact: bool,
    pub has_asset_liaison: bool,
    pub memo_has_content: bool,
}

/// Why the final stage could not release the memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionBlocked {
    NotAuthorized,
    NoAssetLiaison,
    EmptyMemo,
}

impl fmt::Display for ExecutionBlocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ExecutionBlocked::NotAuthorized => "the execution agreement is not authorized",
            ExecutionBlocked::NoAssetLiaison => "no asset-liaison contact is configured",
            ExecutionBlocked::EmptyMemo => "the memo is empty",
        };
        f.write_str(reason)
    }
}

impl EscalationContext {
    pub fn warning_escalates(&self) -> bool {
        self.authorized && self.has_emergency_contact
    }

    /// The first precondition of execution that fails, if any.
    pub fn execution_blocked(&self) -> Option<ExecutionBlocked> {
        if !self.authorized {
            Some(ExecutionBlocked::NotAuthorized)
        } else if !self.has_asset_liaison {
            Some(ExecutionBlocked::NoAssetLiaison)
        } else if !self.memo_has_content {
            Some(ExecutionBlocked::EmptyMemo)
        } else {
            None
        }
    }
}

/// Effects for a move from the last announced phase `from` to the derived
/// phase `to`.
///
/// Skipping straight from monitoring to executed performs the warning stage
/// first. Moving backwards without a check-in (the interval was lengthened)
/// only records a stand-down.
pub fn transition_effects(
    from: Phase,
    to: Phase,
    ctx: &EscalationContext,
    now: DateTime<Utc>,
) -> Vec<Effect> {
    let mut effects = Vec::new();
    if from == to {
        return effects;
    }

    if to < from {
        effects.push(Effect::Log {
            kind: LogKind::Update,
            title: "Protocol stood down".into(),
            description: format!("The deadline moved; phase returned from {from} to {to}."),
        });
    } else {
        if from < Phase::Warning {
            enter_warning(ctx, &mut effects);
        }
        if to == Phase::Executed {
            enter_executed(ctx, &mut effects);
        }
    }

    effects.push(Effect::Announce(SwitchEvent::PhaseChanged { from, to, at: now }));
    effects
}

fn enter_warning(ctx: &EscalationContext, effects: &mut Vec<Effect>) {
    effects.push(Effect::Notify(Notice {
        id: "protocol-warning",
        title: "Check-in overdue".into(),
        body: "Your check-in deadline has passed. Check in before the grace period ends."
            .into(),
        category: NoticeCategory::Emergency,
    }));
    effects.push(Effect::Log {
        kind: LogKind::Alert,
        title: "Deadline missed".into(),
        description: "The protocol entered the warning stage.".into(),
    });
    if ctx.warning_escalates() {
        effects.push(Effect::Announce(SwitchEvent::EscalationRequested {
            stage: Phase::Warning,
        }));
        effects.push(Effect::Log {
            kind: LogKind::Alert,
            title: "Emergency contacts alerted".into(),
            description: "The switch service was asked to warn your emergency contacts.".into(),
        });
    }
}

fn enter_executed(ctx: &EscalationContext, effects: &mut Vec<Effect>) {
    match ctx.execution_blocked() {
        None => {
            effects.push(Effect::Notify(Notice {
                id: "protocol-executed",
                title: "Protocol executed".into(),
                body: "The grace period ended. Your memo is being released to your asset-liaison contacts."
                    .into(),
                category: NoticeCategory::Emergency,
            }));
            effects.push(Effect::Announce(SwitchEvent::EscalationRequested {
                stage: Phase::Executed,
            }));
            effects.push(Effect::Log {
                kind: LogKind::Alert,
                title: "Protocol executed".into(),
                description: "The memo release was handed to the switch service.".into(),
            });
        }
        Some(reason) => {
            effects.push(Effect::Notify(Notice {
                id: "protocol-not-executed",
                title: "Protocol not executed".into(),
                body: format!("Protocol not executed, reason: {reason}."),
                category: NoticeCategory::Emergency,
            }));
            effects.push(Effect::Log {
                kind: LogKind::Alert,
                title: "Protocol not executed".into(),
                description: format!("Reason: {reason}."),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::deadline::countdown;
    use chrono::TimeZone;

    fn ready() -> EscalationContext {
        EscalationContext {
            authorized: true,
            has_emergency_contact: true,
            has_asset_liaison: true,
            memo_has_content: true,
        }
    }

    fn escalations(effects: &[Effect]) -> Vec<Phase> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Announce(SwitchEvent::EscalationRequested { stage }) => Some(*stage),
                _ => None,
            })
            .collect()
    }

    fn notice_ids(effects: &[Effect]) -> Vec<&'static str> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Notify(n) => Some(n.id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn phases_follow_the_reference_scenario() {
        // interval = 72h, grace = 720min.
        let t0 = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();
        let interval = Duration::hours(72);
        let grace = Duration::minutes(720);
        let phase_at = |t| derive_phase(&countdown(t0, interval, t), grace);

        assert_eq!(phase_at(t0), Phase::Monitoring);
        assert_eq!(phase_at(t0 + Duration::hours(72) - Duration::seconds(1)), Phase::Monitoring);
        assert_eq!(phase_at(t0 + Duration::hours(72)), Phase::Warning);
        assert_eq!(phase_at(t0 + Duration::hours(84) - Duration::seconds(1)), Phase::Warning);
        assert_eq!(phase_at(t0 + Duration::hours(84)), Phase::Executed);
        assert_eq!(phase_at(t0 + Duration::days(30)), Phase::Executed);
    }

    #[test]
    fn warning_escalates_only_when_authorized_with_emergency_contact() {
        let now = Utc::now();
        let effects = transition_effects(Phase::Monitoring, Phase::Warning, &ready(), now);
        assert_eq!(escalations(&effects), vec![Phase::Warning]);
        assert_eq!(notice_ids(&effects), vec!["protocol-warning"]);

        let ctx = EscalationContext {
            authorized: false,
            ..ready()
        };
        let effects = transition_effects(Phase::Monitoring, Phase::Warning, &ctx, now);
        assert!(escalations(&effects).is_empty());
        assert_eq!(notice_ids(&effects), vec!["protocol-warning"]);
    }

    #[test]
    fn execution_reports_the_failed_precondition() {
        let now = Utc::now();
        let ctx = EscalationContext {
            memo_has_content: false,
            ..ready()
        };
        let effects = transition_effects(Phase::Warning, Phase::Executed, &ctx, now);
        assert!(escalations(&effects).is_empty());
        assert_eq!(notice_ids(&effects), vec!["protocol-not-executed"]);
        let body = effects
            .iter()
            .find_map(|e| match e {
                Effect::Notify(n) => Some(n.body.clone()),
                _ => None,
            })
            .unwrap();
        assert!(body.contains("the memo is empty"), "{body}");
    }

    #[test]
    fn precondition_order_is_authorization_contacts_memo() {
        let none = EscalationContext {
            authorized: false,
            has_emergency_contact: false,
            has_asset_liaison: false,
            memo_has_content: false,
        };
        assert_eq!(none.execution_blocked(), Some(ExecutionBlocked::NotAuthorized));
        let authorized = EscalationContext {
            authorized: true,
            ..none
        };
        assert_eq!(
            authorized.execution_blocked(),
            Some(ExecutionBlocked::NoAssetLiaison)
        );
        assert_eq!(ready().execution_blocked(), None);
    }

    #[test]
    fn skipping_warning_runs_both_stages_in_order() {
        let effects = transition_effects(Phase::Monitoring, Phase::Executed, &ready(), Utc::now());
        assert_eq!(escalations(&effects), vec![Phase::Warning, Phase::Executed]);
        assert!(matches!(
            effects.last(),
            Some(Effect::Announce(SwitchEvent::PhaseChanged {
                from: Phase::Monitoring,
                to: Phase::Executed,
                ..
            }))
        ));
    }

    #[test]
    fn unchanged_phase_has_no_effects() {
        assert!(transition_effects(Phase::Warning, Phase::Warning, &ready(), Utc::now()).is_empty());
    }

    #[test]
    fn standing_down_never_escalates() {
        let effects = transition_effects(Phase::Warning, Phase::Monitoring, &ready(), Utc::now());
        assert!(escalations(&effects).is_empty());
        assert!(notice_ids(&effects).is_empty());
        assert_eq!(effects.len(), 2);
    }
}
