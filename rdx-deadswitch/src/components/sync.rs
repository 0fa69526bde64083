//! Coordinates every conversation with the remote switch service.
//!
//! The coordinator owns the config debounce token and dispatches network
//! calls as spawned tasks. Nothing here awaits a response on the caller's
//! behalf: each outcome comes back to the dispatcher loop as an [`Input`] over
//! the outcome channel and is folded into state like any other message.

use super::debounce::Debouncer;
use crate::events::{Activation, ActivationOutcome, Input, RemoteOperation};
use crate::remote::{ConfigPayload, SwitchApi};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub struct SyncCoordinator {
    api: Arc<dyn SwitchApi>,
    outcomes: mpsc::UnboundedSender<Input>,
    debounce: Debouncer,
}

impl SyncCoordinator {
    pub fn new(
        api: Arc<dyn SwitchApi>,
        outcomes: mpsc::UnboundedSender<Input>,
        quiet_period: Duration,
    ) -> Self {
        Self {
            api,
            outcomes,
            debounce: Debouncer::new(quiet_period),
        }
    }

    pub fn api(&self) -> Arc<dyn SwitchApi> {
        self.api.clone()
    }

    /// Restarts the config quiet period.
    pub fn config_changed(&mut self, now: Instant) {
        let generation = self.debounce.touch(now);
        debug!("Config changed; sync #{} scheduled.", generation);
    }

    /// Returns `true` once the quiet period after the last change has elapsed.
    pub fn poll_due(&mut self, now: Instant) -> bool {
        self.debounce.fire_if_due(now)
    }

    /// Drops a scheduled push without sending it.
    pub fn cancel_pending(&mut self) {
        self.debounce.cancel();
    }

    pub fn push_config(&self, payload: ConfigPayload) {
        let api = self.api.clone();
        self.dispatch(RemoteOperation::Config, async move {
            api.push_config(&payload).await
        });
    }

    pub fn extend_deadline(&self, deadline: DateTime<Utc>, grace_minutes: u32) {
        let api = self.api.clone();
        self.dispatch(RemoteOperation::Heartbeat, async move {
            api.heartbeat(deadline, grace_minutes).await
        });
    }

    pub fn notify_self(&self) {
        let api = self.api.clone();
        self.dispatch(RemoteOperation::NotifySelf, async move { api.notify_self().await });
    }

    /// Deletes the remote account, then switches the client to `next_udid`
    /// so the deletion still goes out under the old identity.
    pub fn delete_account(&self, next_udid: String) {
        let api = self.api.clone();
        self.dispatch(RemoteOperation::DeleteAccount, async move {
            let ok = api.delete_account().await;
            api.set_device_id(&next_udid);
            ok
        });
    }

    pub fn activate(&self, activation: Activation) {
        let api = self.api.clone();
        let outcomes = self.outcomes.clone();
        tokio::spawn(async move {
            let outcome = run_activation(api.as_ref(), &activation).await;
            outcomes.send(Input::ActivationFinished(outcome)).ok();
        });
    }

    fn dispatch<F>(&self, operation: RemoteOperation, call: F)
    where
        F: std::future::Future<Output = bool> + Send + 'static,
    {
        let outcomes = self.outcomes.clone();
        debug!("Dispatching remote {}.", operation);
        tokio::spawn(async move {
            let ok = call.await;
            outcomes
                .send(Input::RemoteFinished { operation, ok })
                .ok();
        });
    }
}

/// The activation handshake: push the configuration, then move the server
/// deadline. Stops at the first failure; never retries.
pub async fn run_activation(api: &dyn SwitchApi, activation: &Activation) -> ActivationOutcome {
    if !api.push_config(&activation.payload).await {
        return ActivationOutcome::ConfigRejected;
    }
    if !api
        .heartbeat(activation.deadline, activation.grace_minutes)
        .await
    {
        return ActivationOutcome::HeartbeatRejected;
    }
    info!(
        "Activation completed; server deadline set to {}.",
        activation.deadline
    );
    ActivationOutcome::Completed {
        issued_at: activation.issued_at,
    }
}
