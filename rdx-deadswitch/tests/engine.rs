//! Engine integration tests.
//!
//! Wall time is replaced by a `ManualClock` and the switch service by a
//! recorder, so the tests drive the protocol clock by hand while the
//! dispatcher, debounce and spawned remote calls run for real.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use deadswitch::prelude::*;
use deadswitch::remote::{ConfigPayload, RemoteStatus, SwitchApi};
use deadswitch::time::ManualClock;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Default)]
struct RecordingApi {
    calls: Mutex<Vec<String>>,
    pushed: Mutex<Vec<ConfigPayload>>,
}

impl RecordingApi {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    fn last_pushed(&self) -> Option<ConfigPayload> {
        self.pushed.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SwitchApi for RecordingApi {
    async fn heartbeat(&self, _deadline: DateTime<Utc>, _grace_minutes: u32) -> bool {
        self.record("heartbeat");
        true
    }

    async fn push_config(&self, payload: &ConfigPayload) -> bool {
        self.pushed.lock().unwrap().push(payload.clone());
        self.record("config");
        true
    }

    async fn status(&self) -> Option<RemoteStatus> {
        None
    }

    async fn notify_self(&self) -> bool {
        self.record("notify-self");
        true
    }

    async fn delete_account(&self) -> bool {
        self.record("delete");
        true
    }

    fn set_device_id(&self, udid: &str) {
        self.record(format!("device:{udid}"));
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 6, 8, 0, 0).unwrap()
}

fn fast_config() -> SwitchConfig {
    let mut config = SwitchConfig::default();
    config.resolution = ClockResolution::Custom {
        ticks_per_second: 200,
    };
    config.protocol.sync_debounce_ms = 100;
    config
}

fn engine_with(config: SwitchConfig) -> (SwitchEngine, Arc<RecordingApi>, ManualClock) {
    let api = Arc::new(RecordingApi::default());
    let clock = ManualClock::new(t0());
    let engine = SwitchEngine::builder(config, StateStore::new(MemoryStore::new()))
        .api(api.clone())
        .clock(Arc::new(clock.clone()))
        .build();
    (engine, api, clock)
}

async fn make_ready(engine: &SwitchEngine) {
    engine
        .update_settings(SettingsPatch {
            user_name: Some("Ada".into()),
            user_email: Some("ada@example.com".into()),
            user_phone: Some("+1 555 0100".into()),
            ..Default::default()
        })
        .await;
    engine
        .add_contact(Contact {
            name: "Grace".into(),
            role: ContactRole::Emergency,
            email: "grace@example.com".into(),
            phone: String::new(),
        })
        .await;
    engine
        .add_contact(Contact {
            name: "Linus".into(),
            role: ContactRole::AssetLiaison,
            email: "linus@example.com".into(),
            phone: String::new(),
        })
        .await;
    engine.update_memo("The keys are with Grace.".into(), true).await;
}

/// Spawns the engine's run loop; sending on the returned channel stops it.
fn start(engine: &SwitchEngine) -> (oneshot::Sender<()>, JoinHandle<anyhow::Result<()>>) {
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let runner = engine.clone();
    let handle = tokio::spawn(async move {
        runner
            .run_until(async {
                stop_rx.await.ok();
            })
            .await
    });
    (stop_tx, handle)
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let waited = tokio::time::timeout(StdDuration::from_secs(3), async {
        while !check() {
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn authorizing_runs_the_activation_handshake() {
    let (engine, api, _clock) = engine_with(SwitchConfig::default());
    make_ready(&engine).await;

    engine.set_authorized(true).await;

    eventually("the activation calls", || api.count("heartbeat") == 1).await;
    let calls = api.calls();
    assert!(calls[0].starts_with("device:"));
    assert_eq!(calls[1..].to_vec(), vec!["config", "heartbeat"]);
    assert!(engine.snapshot().await.is_authorized);
}

#[tokio::test]
async fn authorizing_an_incomplete_profile_stays_local() {
    let (engine, api, _clock) = engine_with(SwitchConfig::default());

    engine.set_authorized(true).await;
    tokio::time::sleep(StdDuration::from_millis(50)).await;

    assert!(engine.snapshot().await.is_authorized);
    assert_eq!(api.calls().len(), 1, "only the device identity was set");
    let logs = engine.logs().await;
    assert!(logs.iter().any(|entry| entry.title == "Cloud sync unavailable"));
}

#[tokio::test]
async fn manual_check_in_respects_the_cooldown() {
    let (engine, api, clock) = engine_with(SwitchConfig::default());

    let early = engine.check_in().await;
    assert!(matches!(
        early,
        Err(EngineError::CheckIn(CheckInRejection::CooldownActive { .. }))
    ));
    assert_eq!(engine.snapshot().await.last_check_in, t0());

    clock.advance(Duration::hours(7));
    engine.check_in().await.unwrap();
    let snapshot = engine.snapshot().await;
    assert_eq!(snapshot.last_check_in, t0() + Duration::hours(7));
    assert_eq!(snapshot.cooldown_minutes, Some(360));

    assert!(engine.logs().await.iter().any(|entry| entry.title == "Manual check-in"));
    assert_eq!(engine.unread_count().await, 1);
    engine.mark_all_read().await;
    assert_eq!(engine.unread_count().await, 0);

    // Not authorized, so the service never heard about it.
    tokio::time::sleep(StdDuration::from_millis(20)).await;
    assert_eq!(api.count("heartbeat"), 0);
}

#[tokio::test]
async fn authorized_check_in_extends_the_remote_deadline() {
    let (engine, api, clock) = engine_with(SwitchConfig::default());
    make_ready(&engine).await;
    engine.set_authorized(true).await;
    eventually("activation", || api.count("heartbeat") == 1).await;

    clock.advance(Duration::hours(7));
    engine.check_in().await.unwrap();

    eventually("the check-in heartbeat", || api.count("heartbeat") == 2).await;
}

#[tokio::test]
async fn missed_deadline_is_announced_by_the_dispatcher() {
    let (engine, _api, clock) = engine_with(fast_config());
    let mut events = engine.subscribe_switch_events();
    let mut system = engine.subscribe_system_events();
    let status = engine.watch_status();
    let (stop, handle) = start(&engine);

    clock.advance(Duration::hours(72) + Duration::minutes(1));

    let announced = tokio::time::timeout(StdDuration::from_secs(3), async {
        loop {
            if let Ok(SwitchEvent::PhaseChanged { from, to, .. }) = events.recv().await {
                return (from, to);
            }
        }
    })
    .await
    .expect("no phase change was announced");
    assert_eq!(announced, (Phase::Monitoring, Phase::Warning));
    assert_eq!(status.borrow().phase, Phase::Warning);

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();

    let mut saw_shutdown = false;
    while let Ok(event) = system.try_recv() {
        saw_shutdown |= matches!(event, SystemEvent::EngineShutdown);
    }
    assert!(saw_shutdown);
}

#[tokio::test]
async fn completed_activation_aligns_the_local_deadline() {
    let (engine, _api, clock) = engine_with(fast_config());
    make_ready(&engine).await;
    let mut events = engine.subscribe_switch_events();
    let (stop, handle) = start(&engine);

    clock.advance(Duration::hours(1));
    engine.set_authorized(true).await;

    let source = tokio::time::timeout(StdDuration::from_secs(3), async {
        loop {
            if let Ok(SwitchEvent::CheckedIn { source, .. }) = events.recv().await {
                return source;
            }
        }
    })
    .await
    .expect("activation never completed");
    assert_eq!(source, CheckInSource::Activation);
    assert_eq!(engine.snapshot().await.last_check_in, t0() + Duration::hours(1));

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn bursts_of_edits_are_pushed_once() {
    let (engine, api, _clock) = engine_with(fast_config());
    make_ready(&engine).await;
    engine.set_authorized(true).await;
    let (stop, handle) = start(&engine);

    // Activation pushes once; the edits made while setting up push once more.
    eventually("the settled sync", || api.count("config") == 2).await;
    tokio::time::sleep(StdDuration::from_millis(300)).await;
    assert_eq!(api.count("config"), 2);

    for name in ["Ann", "Bob", "Cyd"] {
        engine
            .add_contact(Contact {
                name: name.into(),
                role: ContactRole::Emergency,
                email: format!("{}@example.com", name.to_lowercase()),
                phone: String::new(),
            })
            .await;
    }
    eventually("the debounced push", || api.count("config") == 3).await;
    tokio::time::sleep(StdDuration::from_millis(300)).await;
    assert_eq!(api.count("config"), 3);

    let pushed = api.last_pushed().unwrap();
    let names: Vec<_> = pushed.contacts.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Grace", "Linus", "Ann", "Bob", "Cyd"]);

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn engine_refuses_to_run_twice() {
    let (engine, _api, _clock) = engine_with(fast_config());
    let (stop, handle) = start(&engine);
    tokio::time::sleep(StdDuration::from_millis(20)).await;

    let second = engine.run_until(async {}).await;
    assert!(second.is_err());

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn reset_deletes_under_the_old_identity_then_rotates() {
    let (engine, api, _clock) = engine_with(SwitchConfig::default());
    let before = engine.device_udid().await;

    engine.reset_account().await;
    let after = engine.device_udid().await;
    assert_ne!(before, after);

    eventually("the account deletion", || api.calls().len() == 3).await;
    assert_eq!(
        api.calls(),
        vec![format!("device:{before}"), "delete".to_string(), format!("device:{after}")]
    );
}

#[tokio::test]
async fn unknown_handles_are_reported() {
    let (engine, _api, _clock) = engine_with(SwitchConfig::default());
    let id = engine
        .add_device(Device {
            name: "Watch".into(),
            kind: DeviceKind::Watch,
            connection: ConnectionState::Disconnected,
        })
        .await;

    engine.remove_device(id).await.unwrap();
    assert_eq!(engine.remove_device(id).await, Err(EngineError::UnknownDevice));
    assert_eq!(
        engine.set_device_connection(id, ConnectionState::Connected).await,
        Err(EngineError::UnknownDevice)
    );
    assert!(engine.devices().await.is_empty());

    let contact = Contact {
        name: "Grace".into(),
        role: ContactRole::Emergency,
        email: "grace@example.com".into(),
        phone: String::new(),
    };
    let id = engine.add_contact(contact.clone()).await;
    engine.remove_contact(id).await.unwrap();
    assert_eq!(
        engine.update_contact(id, contact).await,
        Err(EngineError::UnknownContact)
    );
}
