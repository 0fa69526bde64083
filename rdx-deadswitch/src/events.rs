//! Defines the messages flowing into and out of the Deadswitch controller.
//!
//! Inputs are discrete occurrences (a clock tick, a new health sample, the
//! outcome of a network call). The controller consumes each one and answers
//! with a list of [`Effect`]s; the engine performs those effects after the
//! transition, never in the middle of it. Subscribers observe the result as
//! strongly-typed [`SwitchEvent`]s and [`SystemEvent`]s.

use crate::journal::{LogKind, NoticeCategory};
use crate::model::{HealthSample, Phase};
use crate::remote::ConfigPayload;
use crate::store::StoreKey;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// A discrete occurrence consumed by [`crate::controller::Controller::handle`].
#[derive(Debug, Clone)]
pub enum Input {
    /// A clock tick: re-evaluate everything from scratch.
    Tick,
    /// A fresh reading from the sensor bridge.
    HealthSample(HealthSample),
    /// The configuration debounce quiet period has elapsed.
    ConfigSyncDue,
    /// A fire-and-forget remote call resolved.
    RemoteFinished { operation: RemoteOperation, ok: bool },
    /// The activation handshake resolved.
    ActivationFinished(ActivationOutcome),
}

/// Work requested by a transition, performed by the engine afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Durably write the given blob before the next input is processed.
    Persist(StoreKey),
    /// Append to the activity log.
    Log {
        kind: LogKind,
        title: String,
        description: String,
    },
    /// Schedule an on-device notification and record it in the inbox.
    Notify(Notice),
    /// Broadcast to subscribers.
    Announce(SwitchEvent),
    /// Ask the remote service to alert the user out of band.
    RequestSelfNotification,
    /// Mirror a check-in: move the server-side deadline.
    ExtendRemoteDeadline {
        deadline: DateTime<Utc>,
        grace_minutes: u32,
    },
    /// Settings, contacts or a signed memo changed; restart the sync quiet period.
    ConfigChanged,
    /// Push this configuration now.
    PushConfig(ConfigPayload),
    /// Run the one-shot activation handshake.
    Activate(Activation),
    /// Erase the account on the remote service.
    DeleteRemoteAccount,
}

/// A local, user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Stable identifier, so a repeated notice replaces the previous one on device.
    pub id: &'static str,
    pub title: String,
    pub body: String,
    pub category: NoticeCategory,
}

/// How a check-in came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckInSource {
    Manual,
    /// Rule A: the daily step count reached the threshold (lifetime-once).
    Steps,
    /// Rule B: a connected watch reported a heart rate (once per day).
    HeartRate,
    /// The server's deadline was aligned during activation.
    Activation,
}

impl std::fmt::Display for CheckInSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CheckInSource::Manual => "manual",
            CheckInSource::Steps => "steps",
            CheckInSource::HeartRate => "heart rate",
            CheckInSource::Activation => "activation",
        };
        f.write_str(label)
    }
}

/// The remote operations the engine dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOperation {
    Heartbeat,
    Config,
    NotifySelf,
    DeleteAccount,
}

impl std::fmt::Display for RemoteOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RemoteOperation::Heartbeat => "heartbeat",
            RemoteOperation::Config => "config sync",
            RemoteOperation::NotifySelf => "self notification",
            RemoteOperation::DeleteAccount => "account deletion",
        };
        f.write_str(label)
    }
}

/// Everything the activation handshake needs, captured when authorization is
/// granted.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub payload: ConfigPayload,
    pub deadline: DateTime<Utc>,
    pub grace_minutes: u32,
    /// The instant the new server deadline counts from.
    pub issued_at: DateTime<Utc>,
}

/// How far the activation handshake got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    ConfigRejected,
    HeartbeatRejected,
    Completed { issued_at: DateTime<Utc> },
}

/// Events related to the protocol, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchEvent {
    PhaseChanged {
        from: Phase,
        to: Phase,
        at: DateTime<Utc>,
    },
    CheckedIn {
        source: CheckInSource,
        at: DateTime<Utc>,
    },
    PreWarning {
        deadline: DateTime<Utc>,
    },
    /// The external notifier should contact the stage's recipients.
    EscalationRequested {
        stage: Phase,
    },
    Notice(Notice),
    RemoteFinished {
        operation: RemoteOperation,
        ok: bool,
    },
}

/// Events related to the lifecycle of the engine itself.
#[derive(Debug, Clone)]
pub enum SystemEvent {
    /// Fired once when the engine's `run` loop begins.
    EngineStarted { timestamp: Instant },
    /// Fired once when the engine's `run` loop is about to exit.
    EngineShutdown,
}
