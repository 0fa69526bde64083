//! The core engine that drives the Deadswitch protocol.

use crate::common::{ContactId, DeviceId};
use crate::components::sync::SyncCoordinator;
use crate::config::SwitchConfig;
use crate::controller::{Controller, StatusSnapshot};
use crate::error::EngineError;
use crate::events::{Effect, Input, SwitchEvent, SystemEvent};
use crate::journal::{InboxItem, Journal, LogEntry};
use crate::model::{ConnectionState, Contact, Device, HealthSample, Memo, Settings, SettingsPatch};
use crate::notifier::{LogNotifier, Notifier};
use crate::remote::{LocalOnlyApi, RemoteStatus, SwitchApi};
use crate::sensor::{LatestSampleSensor, SensorBridge};
use crate::store::{StateStore, StoreKey};
use crate::time::{Clock, SystemClock, TickEvent, WallClock};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, trace, warn};
use uuid::Uuid;

/// Everything the dispatcher mutates, behind one lock.
struct Core {
    controller: Controller,
    journal: Journal,
    store: StateStore,
    sync: SyncCoordinator,
    udid: String,
}

/// The main Deadswitch engine.
///
/// This struct is the central point of control. It owns the protocol state,
/// runs the tick loop, executes the effects of every transition and publishes
/// the results. The `SwitchEngine` is designed to be cloned and shared across
/// tasks, providing a handle to the running instance.
#[derive(Clone)]
pub struct SwitchEngine {
    config: Arc<SwitchConfig>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    sensor: Arc<dyn SensorBridge>,
    core: Arc<RwLock<Core>>,
    tick_sender: broadcast::Sender<Arc<TickEvent>>,
    system_event_sender: broadcast::Sender<SystemEvent>,
    switch_event_sender: broadcast::Sender<SwitchEvent>,
    snapshot_sender: Arc<watch::Sender<StatusSnapshot>>,
    outcome_receiver: Arc<Mutex<Option<mpsc::UnboundedReceiver<Input>>>>,
}

/// Assembles a [`SwitchEngine`] from its collaborators. Anything not supplied
/// gets a headless default: local-only remote, log notifier, an empty sensor
/// and the wall clock.
pub struct EngineBuilder {
    config: SwitchConfig,
    store: StateStore,
    api: Arc<dyn SwitchApi>,
    notifier: Arc<dyn Notifier>,
    sensor: Arc<dyn SensorBridge>,
    clock: Arc<dyn Clock>,
}

impl EngineBuilder {
    pub fn api(mut self, api: Arc<dyn SwitchApi>) -> Self {
        self.api = api;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn sensor(mut self, sensor: Arc<dyn SensorBridge>) -> Self {
        self.sensor = sensor;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Restores state from the store and wires the channels.
    pub fn build(self) -> SwitchEngine {
        let EngineBuilder {
            config,
            mut store,
            api,
            notifier,
            sensor,
            clock,
        } = self;

        let now = clock.now();
        let udid = store.device_udid();
        api.set_device_id(&udid);

        let controller = Controller::load(&store, config.rules(), now);
        let journal = Journal::new(
            store.load_or(StoreKey::Logs, Vec::new),
            store.load_or(StoreKey::Notifications, Vec::new),
        );

        let (outcome_sender, outcome_receiver) = mpsc::unbounded_channel();
        let sync = SyncCoordinator::new(api, outcome_sender, config.sync_debounce());
        let (snapshot_sender, _) = watch::channel(controller.snapshot(now));

        const CHANNEL_CAPACITY: usize = 256;
        let (tick_sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (system_event_sender, _) = broadcast::channel(64);
        let (switch_event_sender, _) = broadcast::channel(CHANNEL_CAPACITY);

        SwitchEngine {
            config: Arc::new(config),
            clock,
            notifier,
            sensor,
            core: Arc::new(RwLock::new(Core {
                controller,
                journal,
                store,
                sync,
                udid,
            })),
            tick_sender,
            system_event_sender,
            switch_event_sender,
            snapshot_sender: Arc::new(snapshot_sender),
            outcome_receiver: Arc::new(Mutex::new(Some(outcome_receiver))),
        }
    }
}

// Core implementation block for internal logic.
impl SwitchEngine {
    /// Starts assembling an engine over the given store.
    pub fn builder(config: SwitchConfig, store: StateStore) -> EngineBuilder {
        EngineBuilder {
            config,
            store,
            api: Arc::new(LocalOnlyApi),
            notifier: Arc::new(LogNotifier),
            sensor: Arc::new(LatestSampleSensor::new()),
            clock: Arc::new(WallClock),
        }
    }

    /// Runs the engine's main loop until Ctrl+C.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("Press Ctrl+C to shut down.");
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await
    }

    /// Runs the engine's main loop until `signal` resolves.
    ///
    /// This method will:
    /// 1. Spawn the `SystemClock` task.
    /// 2. Spawn the dispatcher task that serializes ticks, sensor polls and
    ///    network outcomes through the controller.
    /// 3. Wait for `signal` to initiate a graceful shutdown.
    pub async fn run_until<F>(&self, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let outcome_rx = self
            .outcome_receiver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| anyhow::anyhow!("the engine is already running"))?;

        info!("SwitchEngine starting up...");
        let (shutdown_tx, _) = broadcast::channel(1);

        let clock = SystemClock::new(self.config.resolution.clone(), self.tick_sender.clone());
        let clock_shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { clock.run(clock_shutdown_rx).await });

        let dispatcher = self.clone();
        let dispatcher_shutdown_rx = shutdown_tx.subscribe();
        let dispatcher_handle = tokio::spawn(async move {
            dispatcher
                .dispatcher_loop(dispatcher_shutdown_rx, outcome_rx)
                .await
        });

        info!("Engine running at {:?}.", self.config.resolution);
        signal.await;

        info!("Shutdown signal received. Broadcasting to all tasks...");
        if shutdown_tx.send(()).is_err() {
            error!("Failed to send shutdown signal. Some tasks may not terminate gracefully.");
        }
        if let Err(e) = dispatcher_handle.await {
            error!("Dispatcher task ended abnormally: {}", e);
        }
        self.system_event_sender
            .send(SystemEvent::EngineShutdown)
            .ok();
        info!("SwitchEngine has shut down.");
        Ok(())
    }

    #[doc(hidden)]
    async fn dispatcher_loop(
        self,
        mut shutdown_rx: broadcast::Receiver<()>,
        mut outcome_rx: mpsc::UnboundedReceiver<Input>,
    ) {
        let mut tick_rx = self.tick_sender.subscribe();
        let mut sensor_poll = tokio::time::interval(self.config.sensor_poll_interval());
        sensor_poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.system_event_sender
            .send(SystemEvent::EngineStarted {
                timestamp: tokio::time::Instant::now(),
            })
            .ok();
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                Some(input) = outcome_rx.recv() => self.process(input).await,
                Ok(tick) = tick_rx.recv() => {
                    trace!("Tick #{} received.", tick.tick_count);
                    self.process_tick().await;
                }
                _ = sensor_poll.tick() => self.poll_sensor().await,
            }
        }
    }

    #[doc(hidden)]
    async fn process_tick(&self) {
        let now = self.clock.now();
        let mut core = self.core.write().await;
        if core.sync.poll_due(Instant::now()) {
            let effects = core.controller.handle(Input::ConfigSyncDue, now);
            self.apply_effects(&mut core, effects, now);
        }
        let effects = core.controller.handle(Input::Tick, now);
        self.apply_effects(&mut core, effects, now);
    }

    #[doc(hidden)]
    async fn poll_sensor(&self) {
        let Some(sample) = self.sensor.query_health_sample().await else {
            return;
        };
        let unchanged = self.core.read().await.controller.latest_sample() == Some(&sample);
        if !unchanged {
            self.process(Input::HealthSample(sample)).await;
        }
    }

    #[doc(hidden)]
    async fn process(&self, input: Input) {
        let now = self.clock.now();
        let mut core = self.core.write().await;
        let effects = core.controller.handle(input, now);
        self.apply_effects(&mut core, effects, now);
    }

    /// Runs a host command against the controller and performs its effects.
    #[doc(hidden)]
    async fn command<T>(
        &self,
        f: impl FnOnce(&mut Controller, DateTime<Utc>) -> (T, Vec<Effect>),
    ) -> T {
        let now = self.clock.now();
        let mut core = self.core.write().await;
        let (output, effects) = f(&mut core.controller, now);
        self.apply_effects(&mut core, effects, now);
        output
    }

    /// Performs every effect of one transition before the lock is released,
    /// then publishes a fresh snapshot.
    #[doc(hidden)]
    fn apply_effects(&self, core: &mut Core, effects: Vec<Effect>, now: DateTime<Utc>) {
        let mut logs_dirty = false;
        let mut inbox_dirty = false;

        for effect in effects {
            match effect {
                Effect::Persist(key) => {
                    if let Err(e) = core.controller.save(key, &mut core.store) {
                        error!("Failed to persist '{}': {}", key.as_str(), e);
                    }
                }
                Effect::Log {
                    kind,
                    title,
                    description,
                } => {
                    core.journal.log(kind, &title, &description, now);
                    logs_dirty = true;
                }
                Effect::Notify(notice) => {
                    self.notifier
                        .schedule_local(notice.id, &notice.title, &notice.body, Duration::ZERO);
                    core.journal
                        .notify(notice.category, &notice.title, &notice.body, now);
                    inbox_dirty = true;
                    self.switch_event_sender
                        .send(SwitchEvent::Notice(notice))
                        .ok();
                }
                Effect::Announce(event) => {
                    self.switch_event_sender.send(event).ok();
                }
                Effect::RequestSelfNotification => core.sync.notify_self(),
                Effect::ExtendRemoteDeadline {
                    deadline,
                    grace_minutes,
                } => core.sync.extend_deadline(deadline, grace_minutes),
                Effect::ConfigChanged => core.sync.config_changed(Instant::now()),
                Effect::PushConfig(payload) => core.sync.push_config(payload),
                Effect::Activate(activation) => core.sync.activate(activation),
                Effect::DeleteRemoteAccount => {
                    let next_udid = Uuid::new_v4().to_string();
                    if let Err(e) = core.store.save(StoreKey::DeviceUdid, &next_udid) {
                        error!("Failed to persist the new device identity: {}", e);
                    }
                    core.sync.cancel_pending();
                    core.sync.delete_account(next_udid.clone());
                    core.udid = next_udid;
                }
            }
        }

        if logs_dirty {
            if let Err(e) = core.store.save(StoreKey::Logs, &core.journal.logs_vec()) {
                warn!("Failed to persist the activity log: {}", e);
            }
        }
        if inbox_dirty {
            if let Err(e) = core
                .store
                .save(StoreKey::Notifications, &core.journal.inbox_vec())
            {
                warn!("Failed to persist the notification inbox: {}", e);
            }
        }
        self.snapshot_sender
            .send_replace(core.controller.snapshot(now));
    }
}

// Public API implementation block.
impl SwitchEngine {
    /// Confirms the user is alive.
    ///
    /// Rejected while the cooldown is running or if a manual check-in already
    /// happened today; a rejection changes nothing.
    pub async fn check_in(&self) -> Result<(), EngineError> {
        self.command(|controller, now| match controller.manual_check_in(now) {
            Ok(effects) => (Ok(()), effects),
            Err(rejection) => (Err(rejection.into()), Vec::new()),
        })
        .await
    }

    /// Grants or revokes the execution agreement. Granting triggers the
    /// activation handshake with the switch service.
    pub async fn set_authorized(&self, authorized: bool) {
        self.command(|controller, now| ((), controller.set_authorized(authorized, now)))
            .await
    }

    pub async fn update_settings(&self, patch: SettingsPatch) {
        self.command(|controller, _| ((), controller.update_settings(patch)))
            .await
    }

    pub async fn add_contact(&self, contact: Contact) -> ContactId {
        self.command(|controller, _| controller.add_contact(contact))
            .await
    }

    pub async fn update_contact(&self, id: ContactId, contact: Contact) -> Result<(), EngineError> {
        self.command(|controller, _| split(controller.update_contact(id, contact)))
            .await
    }

    pub async fn remove_contact(&self, id: ContactId) -> Result<(), EngineError> {
        self.command(|controller, _| split(controller.remove_contact(id)))
            .await
    }

    pub async fn add_device(&self, device: Device) -> DeviceId {
        self.command(|controller, _| controller.add_device(device))
            .await
    }

    pub async fn remove_device(&self, id: DeviceId) -> Result<(), EngineError> {
        self.command(|controller, _| split(controller.remove_device(id)))
            .await
    }

    pub async fn set_device_connection(
        &self,
        id: DeviceId,
        state: ConnectionState,
    ) -> Result<(), EngineError> {
        self.command(|controller, _| split(controller.set_connection(id, state)))
            .await
    }

    pub async fn update_memo(&self, content: String, signed: bool) {
        self.command(|controller, now| ((), controller.update_memo(content, signed, now)))
            .await
    }

    /// Feeds a health sample directly, bypassing the sensor bridge.
    pub async fn record_health_sample(&self, sample: HealthSample) {
        self.process(Input::HealthSample(sample)).await;
    }

    /// Evaluates the protocol immediately instead of waiting for the next tick.
    pub async fn evaluate_now(&self) {
        self.process_tick().await;
    }

    /// Deletes the remote account, issues a new device identity and restarts
    /// the status and memo. Settings, contacts and devices are kept.
    pub async fn reset_account(&self) {
        self.command(|controller, now| ((), controller.reset_account(now)))
            .await
    }

    /// Asks the switch service for its own view of the deadline. Read-only.
    pub async fn remote_status(&self) -> Option<RemoteStatus> {
        let api = self.core.read().await.sync.api();
        api.status().await
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        self.core.read().await.controller.snapshot(self.clock.now())
    }

    pub async fn settings(&self) -> Settings {
        self.core.read().await.controller.settings().clone()
    }

    pub async fn memo(&self) -> Memo {
        self.core.read().await.controller.memo().clone()
    }

    pub async fn contacts(&self) -> Vec<(ContactId, Contact)> {
        let core = self.core.read().await;
        core.controller
            .registry()
            .contacts()
            .map(|(id, contact)| (id, contact.clone()))
            .collect()
    }

    pub async fn devices(&self) -> Vec<(DeviceId, Device)> {
        let core = self.core.read().await;
        core.controller
            .registry()
            .devices()
            .map(|(id, device)| (id, device.clone()))
            .collect()
    }

    /// The activity log, newest first.
    pub async fn logs(&self) -> Vec<LogEntry> {
        self.core.read().await.journal.logs_vec()
    }

    /// The notification inbox, newest first.
    pub async fn inbox(&self) -> Vec<InboxItem> {
        self.core.read().await.journal.inbox_vec()
    }

    pub async fn unread_count(&self) -> usize {
        self.core.read().await.journal.unread_count()
    }

    /// Returns `true` if the item was found.
    pub async fn mark_read(&self, id: &str) -> bool {
        let mut core = self.core.write().await;
        let found = core.journal.mark_read(id);
        if found {
            persist_inbox(&mut core);
        }
        found
    }

    pub async fn mark_all_read(&self) {
        let mut core = self.core.write().await;
        core.journal.mark_all_read();
        persist_inbox(&mut core);
    }

    pub async fn device_udid(&self) -> String {
        self.core.read().await.udid.clone()
    }

    /// Watches the latest `StatusSnapshot`.
    pub fn watch_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.snapshot_sender.subscribe()
    }

    /// Subscribes to the `SwitchEvent` stream.
    pub fn subscribe_switch_events(&self) -> broadcast::Receiver<SwitchEvent> {
        self.switch_event_sender.subscribe()
    }

    /// Subscribes to the `SystemEvent` stream.
    pub fn subscribe_system_events(&self) -> broadcast::Receiver<SystemEvent> {
        self.system_event_sender.subscribe()
    }

    /// Subscribes to the raw `TickEvent` stream.
    pub fn subscribe_ticks(&self) -> broadcast::Receiver<Arc<TickEvent>> {
        self.tick_sender.subscribe()
    }
}

fn split(result: Result<Vec<Effect>, EngineError>) -> (Result<(), EngineError>, Vec<Effect>) {
    match result {
        Ok(effects) => (Ok(()), effects),
        Err(e) => (Err(e), Vec::new()),
    }
}

fn persist_inbox(core: &mut Core) {
    if let Err(e) = core
        .store
        .save(StoreKey::Notifications, &core.journal.inbox_vec())
    {
        warn!("Failed to persist the notification inbox: {}", e);
    }
}
