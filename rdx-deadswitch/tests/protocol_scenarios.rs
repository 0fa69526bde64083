//! End-to-end protocol scenarios driven through the controller.
//!
//! Time is stepped explicitly; every tick is a `handle(Input::Tick, now)`.

use chrono::{DateTime, Duration, TimeZone, Utc};
use deadswitch::components::deadline::countdown;
use deadswitch::config::ProtocolRules;
use deadswitch::controller::Controller;
use deadswitch::error::CheckInRejection;
use deadswitch::events::{CheckInSource, Effect, Input, SwitchEvent};
use deadswitch::model::{
    ConnectionState, Contact, ContactRole, Device, DeviceKind, HealthSample, Phase, SettingsPatch,
    MAX_INTERVAL_HOURS,
};
use deadswitch::store::{MemoryStore, StateStore, StoreKey};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

/// An authorized, cloud-eligible user with both kinds of contact and a memo.
fn ready_controller(now: DateTime<Utc>) -> Controller {
    let mut controller = Controller::fresh(ProtocolRules::default(), now);
    controller.update_settings(SettingsPatch {
        user_name: Some("Ada".into()),
        user_email: Some("ada@example.com".into()),
        user_phone: Some("+1 555 0100".into()),
        ..Default::default()
    });
    controller.add_contact(Contact {
        name: "Grace".into(),
        role: ContactRole::Emergency,
        email: "grace@example.com".into(),
        phone: String::new(),
    });
    controller.add_contact(Contact {
        name: "Linus".into(),
        role: ContactRole::AssetLiaison,
        email: "linus@example.com".into(),
        phone: String::new(),
    });
    controller.update_memo("The keys are with Grace.".into(), true, now);
    controller.set_authorized(true, now);
    controller
}

fn with_watch(controller: &mut Controller) {
    controller.add_device(Device {
        name: "Watch".into(),
        kind: DeviceKind::Watch,
        connection: ConnectionState::Connected,
    });
}

/// Halfway through the default one-hour grace period.
fn mid_warning() -> DateTime<Utc> {
    t0() + Duration::hours(72) + Duration::minutes(30)
}

fn feed(controller: &mut Controller, heart_rate: u32, steps: u32, now: DateTime<Utc>) -> Vec<Effect> {
    controller.handle(
        Input::HealthSample(HealthSample {
            heart_rate,
            steps,
            sample_time: now,
        }),
        now,
    );
    controller.handle(Input::Tick, now)
}

fn check_ins(effects: &[Effect]) -> Vec<CheckInSource> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Announce(SwitchEvent::CheckedIn { source, .. }) => Some(*source),
            _ => None,
        })
        .collect()
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

fn pre_warnings(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|e| matches!(e, Effect::Announce(SwitchEvent::PreWarning { .. })))
        .count()
}

#[test]
fn expiry_matches_the_deadline_for_any_interval() {
    for hours in [1, 24, 72, 168] {
        let interval = Duration::hours(hours);
        let deadline = t0() + interval;
        assert!(!countdown(t0(), interval, deadline - Duration::milliseconds(1)).expired);
        assert!(countdown(t0(), interval, deadline).expired);
        assert!(countdown(t0(), interval, deadline + Duration::days(3)).expired);
    }
}

#[test]
fn reference_scenario_walks_through_every_phase() {
    let mut controller = ready_controller(t0());
    controller.update_settings(SettingsPatch {
        confirmation_delay_minutes: Some(720),
        ..Default::default()
    });

    let mut phase_at = |t: DateTime<Utc>| {
        let effects = controller.handle(Input::Tick, t);
        (controller.status().phase, effects)
    };

    let (phase, _) = phase_at(t0() + Duration::hours(71));
    assert_eq!(phase, Phase::Monitoring);

    let (phase, effects) = phase_at(t0() + Duration::hours(72));
    assert_eq!(phase, Phase::Warning);
    assert_eq!(escalations(&effects), vec![Phase::Warning]);

    let (phase, effects) = phase_at(t0() + Duration::hours(83));
    assert_eq!(phase, Phase::Warning);
    assert!(effects.is_empty(), "no repeated warning while level stays");

    let (phase, effects) = phase_at(t0() + Duration::hours(84));
    assert_eq!(phase, Phase::Executed);
    assert_eq!(escalations(&effects), vec![Phase::Executed]);
    assert!(effects.contains(&Effect::Persist(StoreKey::Status)));
}

#[test]
fn execution_without_a_memo_reports_why() {
    let mut controller = ready_controller(t0());
    controller.update_memo("   ".into(), true, t0());

    let effects = controller.handle(Input::Tick, t0() + Duration::hours(80));
    assert_eq!(controller.status().phase, Phase::Executed);
    assert_eq!(escalations(&effects), vec![Phase::Warning]);
    assert!(effects.iter().any(|e| matches!(
        e,
        Effect::Notify(n) if n.id == "protocol-not-executed" && n.body.contains("memo is empty")
    )));
}

#[test]
fn every_check_in_resets_phase_and_prewarning() {
    // Manual.
    let mut controller = ready_controller(t0());
    controller.handle(Input::Tick, t0() + Duration::hours(72) - Duration::minutes(10));
    controller.handle(Input::Tick, mid_warning());
    assert_eq!(controller.status().phase, Phase::Warning);
    assert!(controller.status().pre_warning_sent);
    controller.manual_check_in(mid_warning()).unwrap();
    assert_eq!(controller.status().phase, Phase::Monitoring);
    assert!(!controller.status().pre_warning_sent);

    // Steps.
    let mut controller = ready_controller(t0());
    controller.handle(Input::Tick, mid_warning());
    let effects = feed(&mut controller, 0, 2500, t0() + Duration::hours(74));
    assert_eq!(check_ins(&effects), vec![CheckInSource::Steps]);
    assert_eq!(controller.status().phase, Phase::Monitoring);
    assert!(!controller.status().pre_warning_sent);

    // Heart rate.
    let mut controller = ready_controller(t0());
    with_watch(&mut controller);
    controller.handle(Input::Tick, mid_warning());
    let effects = feed(&mut controller, 61, 0, t0() + Duration::hours(74));
    assert_eq!(check_ins(&effects), vec![CheckInSource::HeartRate]);
    assert_eq!(controller.status().phase, Phase::Monitoring);
}

#[test]
fn step_rule_fires_exactly_once_per_lifetime() {
    let mut controller = ready_controller(t0());
    let t1 = t0() + Duration::hours(10);

    assert!(check_ins(&feed(&mut controller, 0, 1999, t1 - Duration::minutes(5))).is_empty());
    assert_eq!(check_ins(&feed(&mut controller, 0, 2000, t1)), vec![CheckInSource::Steps]);
    assert!(controller.status().steps_check_in_done);
    assert!(check_ins(&feed(&mut controller, 0, 2000, t1 + Duration::seconds(1))).is_empty());

    let later = t1 + Duration::hours(30);
    assert!(check_ins(&feed(&mut controller, 0, 4000, later)).is_empty());
    assert!(controller.status().steps_check_in_done);
}

#[test]
fn steps_win_when_both_rules_qualify() {
    let mut controller = ready_controller(t0());
    with_watch(&mut controller);
    let now = t0() + Duration::hours(8);

    let effects = feed(&mut controller, 72, 2400, now);
    assert_eq!(check_ins(&effects), vec![CheckInSource::Steps]);
    assert!(controller.status().last_heart_rate_check_in.is_none());

    // The heart-rate rule is now held back by the cooldown, not by Rule A.
    assert!(check_ins(&controller.handle(Input::Tick, now + Duration::minutes(1))).is_empty());
}

#[test]
fn nothing_checks_in_during_the_cooldown() {
    let mut controller = ready_controller(t0());
    with_watch(&mut controller);
    let early = t0() + Duration::hours(6) - Duration::seconds(1);

    assert!(check_ins(&feed(&mut controller, 80, 5000, early)).is_empty());
    assert!(matches!(
        controller.manual_check_in(early),
        Err(CheckInRejection::CooldownActive { .. })
    ));
    assert_eq!(controller.status().last_check_in, t0());
    assert!(!controller.status().steps_check_in_done);

    assert_eq!(
        check_ins(&controller.handle(Input::Tick, t0() + Duration::hours(6))),
        vec![CheckInSource::Steps]
    );
}

#[test]
fn heart_rate_rule_fires_once_per_calendar_day() {
    let mut controller = ready_controller(t0());
    with_watch(&mut controller);
    // Use up the lifetime step rule so only heart rate is in play.
    feed(&mut controller, 0, 3000, t0() + Duration::hours(7));

    let day_d = Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap();
    assert_eq!(check_ins(&feed(&mut controller, 64, 10, day_d)), vec![CheckInSource::HeartRate]);
    assert!(check_ins(&feed(&mut controller, 66, 10, day_d + Duration::hours(9))).is_empty());
    assert_eq!(
        check_ins(&feed(&mut controller, 62, 10, day_d + Duration::days(1))),
        vec![CheckInSource::HeartRate]
    );
}

#[test]
fn heart_rate_without_a_connected_watch_is_ignored() {
    let mut controller = ready_controller(t0());
    controller.add_device(Device {
        name: "Phone".into(),
        kind: DeviceKind::Phone,
        connection: ConnectionState::Connected,
    });
    feed(&mut controller, 0, 3000, t0() + Duration::hours(7));
    assert!(check_ins(&feed(&mut controller, 70, 0, t0() + Duration::days(1))).is_empty());
}

#[test]
fn manual_check_in_is_once_per_calendar_day() {
    let mut controller = Controller::fresh(ProtocolRules::default(), t0());
    let morning = t0() + Duration::days(1) - Duration::hours(2);
    controller.manual_check_in(morning).unwrap();

    let evening = morning + Duration::hours(7);
    assert_eq!(morning.date_naive(), evening.date_naive());
    assert_eq!(
        controller.manual_check_in(evening),
        Err(CheckInRejection::AlreadyCheckedInToday)
    );
    assert_eq!(controller.status().last_check_in, morning);

    controller.manual_check_in(morning + Duration::days(1)).unwrap();
}

#[test]
fn prewarning_fires_once_per_cycle() {
    let mut controller = ready_controller(t0());
    let deadline = t0() + Duration::hours(72);

    assert_eq!(pre_warnings(&controller.handle(Input::Tick, deadline - Duration::minutes(31))), 0);
    let effects = controller.handle(Input::Tick, deadline - Duration::minutes(30));
    assert_eq!(pre_warnings(&effects), 1);
    assert!(effects.contains(&Effect::RequestSelfNotification));

    for minutes_left in [29, 20, 5, 1] {
        let effects = controller.handle(Input::Tick, deadline - Duration::minutes(minutes_left));
        assert_eq!(pre_warnings(&effects), 0);
    }

    // A check-in re-arms it for the next cycle.
    controller.manual_check_in(deadline - Duration::minutes(1)).unwrap();
    let next_deadline = deadline - Duration::minutes(1) + Duration::hours(72);
    assert_eq!(
        pre_warnings(&controller.handle(Input::Tick, next_deadline - Duration::minutes(15))),
        1
    );
}

#[test]
fn restart_mid_warning_does_not_repeat_the_warning() {
    let mut store = StateStore::new(MemoryStore::new());
    let mut controller = ready_controller(t0());
    controller.handle(Input::Tick, mid_warning());
    assert_eq!(controller.status().phase, Phase::Warning);
    for key in [
        StoreKey::Settings,
        StoreKey::Status,
        StoreKey::Contacts,
        StoreKey::Devices,
        StoreKey::Memo,
    ] {
        controller.save(key, &mut store).unwrap();
    }

    let mut restored = Controller::load(&store, ProtocolRules::default(), mid_warning());
    assert_eq!(restored.status().phase, Phase::Warning);
    let effects = restored.handle(Input::Tick, mid_warning() + Duration::seconds(1));
    assert!(effects.is_empty());

    // Crossing into execution after the restart still escalates.
    let effects = restored.handle(Input::Tick, t0() + Duration::hours(74));
    assert_eq!(escalations(&effects), vec![Phase::Executed]);
}

#[test]
fn lengthening_the_interval_stands_the_protocol_down() {
    let mut controller = ready_controller(t0());
    controller.handle(Input::Tick, mid_warning());
    assert_eq!(controller.status().phase, Phase::Warning);

    controller.update_settings(SettingsPatch {
        check_in_interval_hours: Some(96),
        ..Default::default()
    });
    let effects = controller.handle(Input::Tick, mid_warning() + Duration::seconds(1));
    assert_eq!(controller.status().phase, Phase::Monitoring);
    assert!(escalations(&effects).is_empty());
    assert!(effects.iter().any(|e| matches!(
        e,
        Effect::Log { title, .. } if title == "Protocol stood down"
    )));
}

#[test]
fn a_watch_that_stops_reporting_cannot_hold_off_the_protocol() {
    let mut controller = ready_controller(t0());
    with_watch(&mut controller);
    controller.update_settings(SettingsPatch {
        min_steps: Some(1_000_000),
        ..Default::default()
    });
    controller.handle(
        Input::HealthSample(HealthSample {
            heart_rate: 70,
            steps: 0,
            sample_time: t0(),
        }),
        t0(),
    );

    let mut sources = Vec::new();
    for hour in 1..=(30 * 24) {
        let effects = controller.handle(Input::Tick, t0() + Duration::hours(hour));
        sources.extend(check_ins(&effects));
    }

    assert!(sources.is_empty(), "stale reading checked in: {sources:?}");
    assert_eq!(controller.status().last_check_in, t0());
    assert_eq!(controller.status().phase, Phase::Executed);
}

#[test]
fn prewarning_is_not_repeated_after_a_restart() {
    let mut store = StateStore::new(MemoryStore::new());
    let mut controller = ready_controller(t0());
    let deadline = t0() + Duration::hours(72);

    let effects = controller.handle(Input::Tick, deadline - Duration::minutes(25));
    assert_eq!(pre_warnings(&effects), 1);
    for key in [
        StoreKey::Settings,
        StoreKey::Status,
        StoreKey::Contacts,
        StoreKey::Devices,
        StoreKey::Memo,
    ] {
        controller.save(key, &mut store).unwrap();
    }

    let restart = deadline - Duration::minutes(20);
    let mut restored = Controller::load(&store, ProtocolRules::default(), restart);
    assert!(restored.status().pre_warning_sent);
    for minutes_left in [20, 10, 1] {
        let effects = restored.handle(Input::Tick, deadline - Duration::minutes(minutes_left));
        assert_eq!(pre_warnings(&effects), 0);
        assert!(!effects.contains(&Effect::RequestSelfNotification));
    }
}

#[test]
fn oversized_intervals_never_overflow() {
    let mut controller = ready_controller(t0());
    controller.update_settings(SettingsPatch {
        check_in_interval_hours: Some(3_000_000_000),
        ..Default::default()
    });
    assert_eq!(controller.settings().check_in_interval_hours, MAX_INTERVAL_HOURS);

    let effects = controller.handle(Input::Tick, t0() + Duration::days(365));
    assert!(escalations(&effects).is_empty());
    assert_eq!(controller.status().phase, Phase::Monitoring);
    assert!(!controller.snapshot(t0() + Duration::days(365)).countdown.expired);
}
