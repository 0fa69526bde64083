//! The single owner of protocol state.
//!
//! A [`Controller`] holds the user status, settings, registry, memo and latest
//! health sample, and exposes exactly two kinds of mutation:
//!
//! - [`Controller::handle`] consumes an [`Input`] (a tick, a sample, a network
//!   outcome) and returns the [`Effect`]s to perform.
//! - Host commands (check in, authorize, edit settings, contacts, devices and
//!   the memo, reset) do the same for user intent.
//!
//! Nothing here performs I/O or reads the clock. Every method takes `now`
//! explicitly, so a whole protocol cycle can be replayed in a test by stepping
//! a timestamp.

use crate::common::{ContactId, DeviceId};
use crate::components::deadline::{countdown, deadline, Countdown};
use crate::components::protocol::{self, EscalationContext};
use crate::components::{autocheckin, checkin, prewarning};
use crate::config::ProtocolRules;
use crate::error::{CheckInRejection, EngineError, StoreError};
use crate::events::{Activation, ActivationOutcome, CheckInSource, Effect, Input, Notice, RemoteOperation, SwitchEvent};
use crate::journal::{LogKind, NoticeCategory};
use crate::model::{
    ConnectionState, Contact, ContactRole, Device, HealthSample, Memo, Phase, Settings,
    SettingsPatch, UserStatus,
};
use crate::registry::Registry;
use crate::remote::ConfigPayload;
use crate::store::{StateStore, StoreKey};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// A read-only view of the protocol at one instant, published to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub at: DateTime<Utc>,
    pub phase: Phase,
    pub countdown: Countdown,
    pub deadline: DateTime<Utc>,
    pub last_check_in: DateTime<Utc>,
    pub is_authorized: bool,
    pub cloud_eligible: bool,
    /// Whole minutes left on the check-in cooldown, if it is still running.
    pub cooldown_minutes: Option<i64>,
    pub pre_warning_sent: bool,
    pub steps_check_in_done: bool,
    pub latest_sample: Option<HealthSample>,
}

#[derive(Debug, Clone)]
pub struct Controller {
    rules: ProtocolRules,
    status: UserStatus,
    settings: Settings,
    registry: Registry,
    memo: Memo,
    sample: Option<HealthSample>,
}

impl Controller {
    pub fn new(
        rules: ProtocolRules,
        status: UserStatus,
        settings: Settings,
        registry: Registry,
        memo: Memo,
    ) -> Self {
        Self {
            rules,
            status,
            settings,
            registry,
            memo,
            sample: None,
        }
    }

    /// A first-run controller whose countdown starts at `now`.
    pub fn fresh(rules: ProtocolRules, now: DateTime<Utc>) -> Self {
        Self::new(
            rules,
            UserStatus::new(now),
            Settings::default(),
            Registry::new(),
            Memo::default(),
        )
    }

    /// Restores the controller from the store. Missing or corrupt blobs fall
    /// back to defaults; a `lastCheckIn` in the future is clamped to `now`.
    pub fn load(store: &StateStore, rules: ProtocolRules, now: DateTime<Utc>) -> Self {
        let mut status = store.load_or(StoreKey::Status, || UserStatus::new(now));
        if status.last_check_in > now {
            warn!(
                "Stored last check-in {} is in the future; clamping to now.",
                status.last_check_in
            );
            status.last_check_in = now;
        }
        let mut settings = store.load_or(StoreKey::Settings, Settings::default);
        if settings.normalize() {
            warn!(
                "Stored check-in interval out of range; using {} hours.",
                settings.check_in_interval_hours
            );
        }
        let registry = Registry::from_parts(
            store.load_or(StoreKey::Contacts, Default::default),
            store.load_or(StoreKey::Devices, Default::default),
        );
        let mut controller = Self::new(
            rules,
            status,
            settings,
            registry,
            store.load_or(StoreKey::Memo, Memo::default),
        );
        controller.sample = store.load(StoreKey::HealthSample);
        controller
    }

    /// Writes the blob behind `key`. Keys the controller does not own are
    /// left to the caller.
    pub fn save(&self, key: StoreKey, store: &mut StateStore) -> Result<(), StoreError> {
        match key {
            StoreKey::Settings => store.save(key, &self.settings),
            StoreKey::Status => store.save(key, &self.status),
            StoreKey::Contacts => store.save(key, self.registry.contact_map()),
            StoreKey::Devices => store.save(key, self.registry.device_map()),
            StoreKey::Memo => store.save(key, &self.memo),
            StoreKey::HealthSample => match &self.sample {
                Some(sample) => store.save(key, sample),
                None => store.remove(key),
            },
            StoreKey::Logs | StoreKey::Notifications | StoreKey::DeviceUdid => Ok(()),
        }
    }

    pub fn status(&self) -> &UserStatus {
        &self.status
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn memo(&self) -> &Memo {
        &self.memo
    }

    pub fn rules(&self) -> &ProtocolRules {
        &self.rules
    }

    pub fn latest_sample(&self) -> Option<&HealthSample> {
        self.sample.as_ref()
    }

    pub fn countdown(&self, now: DateTime<Utc>) -> Countdown {
        countdown(self.status.last_check_in, self.settings.interval(), now)
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        deadline(self.status.last_check_in, self.settings.interval())
    }

    pub fn config_payload(&self) -> ConfigPayload {
        ConfigPayload::build(
            &self.settings,
            &self.registry,
            &self.memo,
            self.status.is_authorized,
        )
    }

    pub fn escalation_context(&self) -> EscalationContext {
        EscalationContext {
            authorized: self.status.is_authorized,
            has_emergency_contact: self.registry.has_role(ContactRole::Emergency),
            has_asset_liaison: self.registry.has_role(ContactRole::AssetLiaison),
            memo_has_content: self.memo.has_content(),
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> StatusSnapshot {
        StatusSnapshot {
            at: now,
            phase: self.status.phase,
            countdown: self.countdown(now),
            deadline: self.deadline(),
            last_check_in: self.status.last_check_in,
            is_authorized: self.status.is_authorized,
            cloud_eligible: self.settings.is_cloud_eligible(),
            cooldown_minutes: checkin::cooldown_remaining(&self.status, self.rules.cooldown, now)
                .map(|left| (left.num_seconds() + 59) / 60),
            pre_warning_sent: self.status.pre_warning_sent,
            steps_check_in_done: self.status.steps_check_in_done,
            latest_sample: self.sample,
        }
    }

    /// Consumes one input and returns the effects to perform.
    pub fn handle(&mut self, input: Input, now: DateTime<Utc>) -> Vec<Effect> {
        match input {
            Input::Tick => self.tick(now),
            Input::HealthSample(sample) => {
                self.sample = Some(sample);
                vec![Effect::Persist(StoreKey::HealthSample)]
            }
            Input::ConfigSyncDue => self.config_sync_due(),
            Input::RemoteFinished { operation, ok } => remote_finished(operation, ok),
            Input::ActivationFinished(outcome) => self.activation_finished(outcome, now),
        }
    }

    /// One evaluation: automatic check-in first, then the pre-warning, then
    /// the phase. An automatic check-in ends the evaluation, since it resets
    /// everything the later steps would look at.
    fn tick(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        if let Some(effects) = self.auto_check_in(now) {
            return effects;
        }

        let mut effects = Vec::new();
        let countdown = self.countdown(now);

        if prewarning::is_due(&countdown, self.rules.pre_warning_lead, self.status.pre_warning_sent) {
            self.status.pre_warning_sent = true;
            effects.extend(prewarning::fire(
                self.deadline(),
                self.rules.pre_warning_lead,
                self.status.is_authorized,
            ));
        }

        let derived = protocol::derive_phase(&countdown, self.settings.grace_period());
        if derived != self.status.phase {
            info!("Protocol phase {} -> {}.", self.status.phase, derived);
            effects.extend(protocol::transition_effects(
                self.status.phase,
                derived,
                &self.escalation_context(),
                now,
            ));
            self.status.phase = derived;
        }

        if !effects.is_empty() {
            effects.insert(0, Effect::Persist(StoreKey::Status));
        }
        effects
    }

    fn auto_check_in(&mut self, now: DateTime<Utc>) -> Option<Vec<Effect>> {
        let sample = self.sample?;
        let rule = autocheckin::evaluate(
            &self.status,
            &self.settings,
            &self.registry,
            Some(&sample),
            &self.rules,
            now,
        )?;
        autocheckin::mark_fired(&mut self.status, rule, now);
        let (source, description) = match rule {
            autocheckin::AutoRule::Steps => (
                CheckInSource::Steps,
                format!(
                    "{} steps reached the {} step threshold.",
                    sample.steps, self.settings.min_steps
                ),
            ),
            autocheckin::AutoRule::HeartRate => (
                CheckInSource::HeartRate,
                format!("A connected watch reported {} bpm.", sample.heart_rate),
            ),
        };
        info!("Automatic check-in ({}).", source);
        Some(checkin::apply(
            &mut self.status,
            &self.settings,
            source,
            description,
            now,
        ))
    }

    fn config_sync_due(&self) -> Vec<Effect> {
        if !self.status.is_authorized {
            debug!("Config sync skipped: not authorized.");
            return Vec::new();
        }
        if let Some(field) = self.settings.missing_identity() {
            debug!("Config sync skipped: profile {} missing.", field);
            return Vec::new();
        }
        vec![Effect::PushConfig(self.config_payload())]
    }

    fn activation_finished(&mut self, outcome: ActivationOutcome, now: DateTime<Utc>) -> Vec<Effect> {
        match outcome {
            ActivationOutcome::ConfigRejected => vec![alert(
                "Activation failed",
                "The switch service did not accept your configuration. Toggle authorization to try again.",
            )],
            ActivationOutcome::HeartbeatRejected => vec![alert(
                "Activation failed",
                "Your configuration was saved but the server deadline could not be set. Toggle authorization to try again.",
            )],
            ActivationOutcome::Completed { issued_at } => {
                let fresh = issued_at > self.status.last_check_in && issued_at <= now;
                if !self.status.is_authorized || !fresh {
                    return vec![Effect::Log {
                        kind: LogKind::Update,
                        title: "Activation completed".into(),
                        description: "The service is active; the local deadline was already newer."
                            .into(),
                    }];
                }
                checkin::apply(
                    &mut self.status,
                    &self.settings,
                    CheckInSource::Activation,
                    "The local deadline now matches the switch service.".into(),
                    issued_at,
                )
            }
        }
    }

    /// A user-initiated check-in. Rejections leave state untouched.
    pub fn manual_check_in(&mut self, now: DateTime<Utc>) -> Result<Vec<Effect>, CheckInRejection> {
        checkin::gate_manual(&self.status, self.rules.cooldown, &self.rules.timezone, now)?;
        self.status.last_manual_check_in = Some(now);
        info!("Manual check-in accepted.");
        Ok(checkin::apply(
            &mut self.status,
            &self.settings,
            CheckInSource::Manual,
            "Identity confirmed by the user.".into(),
            now,
        ))
    }

    /// Grants or revokes the execution agreement.
    ///
    /// Granting starts the activation handshake when the profile is complete.
    /// Revoking pushes the disabled configuration straight away, bypassing the
    /// debounce, since the debounced push only runs while authorized.
    pub fn set_authorized(&mut self, authorized: bool, now: DateTime<Utc>) -> Vec<Effect> {
        if self.status.is_authorized == authorized {
            return Vec::new();
        }
        self.status.is_authorized = authorized;
        let mut effects = vec![Effect::Persist(StoreKey::Status)];

        if authorized {
            effects.push(Effect::Log {
                kind: LogKind::Success,
                title: "Protocol authorized".into(),
                description: "The execution agreement was signed.".into(),
            });
            effects.push(notify(
                "authorization",
                "Protocol in effect",
                "The execution agreement is signed and in effect.",
                NoticeCategory::System,
            ));
            match self.settings.missing_identity() {
                None => effects.push(Effect::Activate(Activation {
                    payload: self.config_payload(),
                    deadline: deadline(now, self.settings.interval()),
                    grace_minutes: self.settings.confirmation_delay_minutes,
                    issued_at: now,
                })),
                Some(field) => effects.push(alert(
                    "Cloud sync unavailable",
                    &format!("Add your {field} to your profile to enable the switch service."),
                )),
            }
        } else {
            effects.push(alert("Authorization revoked", "The execution agreement was revoked."));
            effects.push(notify(
                "authorization",
                "Protocol revoked",
                "You revoked the execution agreement.",
                NoticeCategory::Emergency,
            ));
            if self.settings.is_cloud_eligible() {
                effects.push(Effect::PushConfig(self.config_payload()));
            }
        }
        effects
    }

    pub fn update_settings(&mut self, patch: SettingsPatch) -> Vec<Effect> {
        if !patch.apply_to(&mut self.settings) {
            return Vec::new();
        }
        vec![
            Effect::Persist(StoreKey::Settings),
            Effect::Log {
                kind: LogKind::Config,
                title: "Settings updated".into(),
                description: format!(
                    "Check in every {}h, {} min grace, {} step threshold.",
                    self.settings.check_in_interval_hours,
                    self.settings.confirmation_delay_minutes,
                    self.settings.min_steps
                ),
            },
            Effect::ConfigChanged,
        ]
    }

    pub fn add_contact(&mut self, contact: Contact) -> (ContactId, Vec<Effect>) {
        let description = format!("Added {} contact {}.", role_label(contact.role), contact.name);
        let id = self.registry.add_contact(contact);
        let effects = vec![
            Effect::Persist(StoreKey::Contacts),
            Effect::Log {
                kind: LogKind::Config,
                title: "Contact added".into(),
                description,
            },
            Effect::ConfigChanged,
        ];
        (id, effects)
    }

    pub fn update_contact(&mut self, id: ContactId, contact: Contact) -> Result<Vec<Effect>, EngineError> {
        let description = format!("Updated {} contact {}.", role_label(contact.role), contact.name);
        self.registry
            .update_contact(id, contact)
            .ok_or(EngineError::UnknownContact)?;
        Ok(vec![
            Effect::Persist(StoreKey::Contacts),
            Effect::Log {
                kind: LogKind::Config,
                title: "Contact updated".into(),
                description,
            },
            Effect::ConfigChanged,
        ])
    }

    pub fn remove_contact(&mut self, id: ContactId) -> Result<Vec<Effect>, EngineError> {
        let contact = self
            .registry
            .remove_contact(id)
            .ok_or(EngineError::UnknownContact)?;
        Ok(vec![
            Effect::Persist(StoreKey::Contacts),
            alert("Contact removed", &format!("Removed contact {}.", contact.name)),
            notify(
                "contact-removed",
                "Contact removed",
                &format!("{} is no longer one of your contacts.", contact.name),
                NoticeCategory::System,
            ),
            Effect::ConfigChanged,
        ])
    }

    pub fn add_device(&mut self, device: Device) -> (DeviceId, Vec<Effect>) {
        let name = device.name.clone();
        let id = self.registry.add_device(device);
        let effects = vec![
            Effect::Persist(StoreKey::Devices),
            Effect::Log {
                kind: LogKind::Config,
                title: "Device paired".into(),
                description: format!("New device connected: {name}."),
            },
            notify(
                "device-paired",
                "Device paired",
                &format!("{name} is paired and syncing."),
                NoticeCategory::System,
            ),
        ];
        (id, effects)
    }

    pub fn remove_device(&mut self, id: DeviceId) -> Result<Vec<Effect>, EngineError> {
        let device = self
            .registry
            .remove_device(id)
            .ok_or(EngineError::UnknownDevice)?;
        Ok(vec![
            Effect::Persist(StoreKey::Devices),
            alert("Device unpaired", &format!("Unpaired {}.", device.name)),
            notify(
                "device-unpaired",
                "Device unpaired",
                &format!("{} was unpaired.", device.name),
                NoticeCategory::System,
            ),
        ])
    }

    pub fn set_connection(
        &mut self,
        id: DeviceId,
        state: ConnectionState,
    ) -> Result<Vec<Effect>, EngineError> {
        if !self.registry.set_connection(id, state) {
            return Err(EngineError::UnknownDevice);
        }
        Ok(vec![Effect::Persist(StoreKey::Devices)])
    }

    /// Replaces the memo. Only a signed memo is mirrored to the service.
    pub fn update_memo(&mut self, content: String, signed: bool, now: DateTime<Utc>) -> Vec<Effect> {
        self.memo.content = content;
        self.memo.is_signed = signed;
        self.memo.updated_at = Some(now);
        self.memo
            .id
            .get_or_insert_with(|| format!("LW-{:06}", now.timestamp_millis().rem_euclid(1_000_000)));

        let mut effects = vec![Effect::Persist(StoreKey::Memo)];
        if signed {
            effects.push(Effect::Log {
                kind: LogKind::Update,
                title: "Memo signed".into(),
                description: "The memo was signed and filed.".into(),
            });
            effects.push(notify(
                "memo-signed",
                "Memo updated",
                "Your memo was saved.",
                NoticeCategory::System,
            ));
            effects.push(Effect::ConfigChanged);
        }
        effects
    }

    /// Erases the remote account and starts a new status and memo. Settings,
    /// contacts and devices are kept.
    pub fn reset_account(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        let previous_phase = self.status.phase;
        self.status = UserStatus::new(now);
        self.memo = Memo::default();
        warn!("Account reset.");

        let mut effects = vec![
            Effect::Persist(StoreKey::Status),
            Effect::Persist(StoreKey::Memo),
            alert("Account reset", "Status and memo were cleared; a new device identity was issued."),
            Effect::DeleteRemoteAccount,
        ];
        if previous_phase != Phase::Monitoring {
            effects.push(Effect::Announce(SwitchEvent::PhaseChanged {
                from: previous_phase,
                to: Phase::Monitoring,
                at: now,
            }));
        }
        effects
    }
}

fn remote_finished(operation: RemoteOperation, ok: bool) -> Vec<Effect> {
    let mut effects = vec![Effect::Announce(SwitchEvent::RemoteFinished { operation, ok })];
    if !ok {
        let description = match operation {
            RemoteOperation::Heartbeat => {
                "The server deadline was not extended. The next check-in will try again."
            }
            RemoteOperation::Config => "Sync failed, will retry on the next change.",
            RemoteOperation::NotifySelf => "The switch service could not alert you remotely.",
            RemoteOperation::DeleteAccount => "The remote account could not be deleted.",
        };
        effects.push(alert(&format!("Remote {operation} failed"), description));
    }
    effects
}

fn alert(title: &str, description: &str) -> Effect {
    Effect::Log {
        kind: LogKind::Alert,
        title: title.into(),
        description: description.into(),
    }
}

fn notify(id: &'static str, title: &str, body: &str, category: NoticeCategory) -> Effect {
    Effect::Notify(Notice {
        id,
        title: title.into(),
        body: body.into(),
        category,
    })
}

fn role_label(role: ContactRole) -> &'static str {
    match role {
        ContactRole::Emergency => "emergency",
        ContactRole::AssetLiaison => "asset-liaison",
    }
}
