//! The client side of the remote switch service.
//!
//! The service mirrors the deadline server-side and performs the outbound
//! contact messaging when the local engine escalates. Every call is
//! idempotent from the engine's point of view and none of them error: a
//! failure is logged here and surfaces as `false` (or `None`), so callers can
//! degrade to local-only operation.
//!
//! All requests carry the device identity in the `X-Device-UDID` header.

use crate::common::from_epoch_secs;
use crate::model::{ContactRole, Memo, Settings};
use crate::registry::Registry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

pub const UDID_HEADER: &str = "X-Device-UDID";

/// The full configuration mirrored to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPayload {
    pub is_enabled: bool,
    pub owner: OwnerNotification,
    pub interval_hours: u32,
    /// Minutes.
    pub grace_period: u32,
    pub contacts: Vec<ContactTarget>,
    pub memo: MemoPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerNotification {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactTarget {
    pub name: String,
    pub target: String,
    pub role: ContactRole,
    #[serde(rename = "type")]
    pub channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoPayload {
    pub content: String,
    pub is_signed: bool,
}

impl ConfigPayload {
    /// Builds the payload from the current state. Contacts without a usable
    /// email address are left out: email is the only delivery channel.
    pub fn build(settings: &Settings, registry: &Registry, memo: &Memo, authorized: bool) -> Self {
        let contacts = registry
            .contacts()
            .filter(|(_, c)| c.email.contains('@'))
            .map(|(_, c)| ContactTarget {
                name: c.name.clone(),
                target: c.email.clone(),
                role: c.role,
                channel: "email".to_string(),
            })
            .collect();
        Self {
            is_enabled: authorized,
            owner: OwnerNotification {
                name: settings.user_name.clone(),
                email: settings.user_email.clone(),
                phone: settings.user_phone.clone(),
            },
            interval_hours: settings.check_in_interval_hours,
            grace_period: settings.confirmation_delay_minutes,
            contacts,
            memo: MemoPayload {
                content: memo.content.clone(),
                is_signed: memo.is_signed,
            },
        }
    }
}

/// The service's own view of the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    Monitoring,
    Warning,
    Triggered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStatus {
    pub state: RemoteState,
    pub deadline: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RemoteStatusBody {
    state: RemoteState,
    /// Epoch seconds.
    deadline: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatBody {
    next_deadline: i64,
    grace_period: u32,
}

/// The operations the engine calls on the remote switch service.
#[async_trait]
pub trait SwitchApi: Send + Sync {
    /// Moves the server-side deadline.
    async fn heartbeat(&self, deadline: DateTime<Utc>, grace_minutes: u32) -> bool;
    async fn push_config(&self, payload: &ConfigPayload) -> bool;
    async fn status(&self) -> Option<RemoteStatus>;
    /// Asks the service to alert the owner out of band.
    async fn notify_self(&self) -> bool;
    async fn delete_account(&self) -> bool;
    /// Switches the identity sent with subsequent requests.
    fn set_device_id(&self, _udid: &str) {}
}

/// Talks to the service over HTTPS with JSON bodies.
pub struct HttpSwitchApi {
    client: reqwest::Client,
    base_url: String,
    udid: RwLock<String>,
}

impl HttpSwitchApi {
    pub fn new(
        base_url: impl Into<String>,
        udid: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            udid: RwLock::new(udid.into()),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/v1/switch/{}", self.base_url, endpoint)
    }

    fn udid(&self) -> String {
        self.udid
            .read()
            .map(|udid| udid.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Sends a request, logging and swallowing every failure.
    async fn send(&self, operation: &str, request: reqwest::RequestBuilder) -> Option<reqwest::Response> {
        let response = match request.header(UDID_HEADER, self.udid()).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Switch service {} failed: {}", operation, e);
                return None;
            }
        };
        if response.status().is_success() {
            debug!("Switch service {} succeeded.", operation);
            Some(response)
        } else {
            warn!("Switch service {} rejected with {}.", operation, response.status());
            None
        }
    }
}

#[async_trait]
impl SwitchApi for HttpSwitchApi {
    async fn heartbeat(&self, deadline: DateTime<Utc>, grace_minutes: u32) -> bool {
        let body = HeartbeatBody {
            next_deadline: deadline.timestamp(),
            grace_period: grace_minutes,
        };
        let request = self.client.post(self.url("heartbeat")).json(&body);
        self.send("heartbeat", request).await.is_some()
    }

    async fn push_config(&self, payload: &ConfigPayload) -> bool {
        let request = self.client.post(self.url("config")).json(payload);
        self.send("config sync", request).await.is_some()
    }

    async fn status(&self) -> Option<RemoteStatus> {
        let request = self.client.get(self.url("status"));
        let response = self.send("status query", request).await?;
        match response.json::<RemoteStatusBody>().await {
            Ok(body) => Some(RemoteStatus {
                state: body.state,
                deadline: from_epoch_secs(body.deadline),
            }),
            Err(e) => {
                warn!("Switch service returned an unreadable status: {}", e);
                None
            }
        }
    }

    async fn notify_self(&self) -> bool {
        let request = self.client.post(self.url("notify-self"));
        self.send("self notification", request).await.is_some()
    }

    async fn delete_account(&self) -> bool {
        let request = self.client.delete(self.url("account"));
        self.send("account deletion", request).await.is_some()
    }

    fn set_device_id(&self, udid: &str) {
        match self.udid.write() {
            Ok(mut current) => *current = udid.to_string(),
            Err(e) => *e.into_inner() = udid.to_string(),
        }
    }
}

/// Used when no service is configured. Every call fails, so the engine keeps
/// running local-only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalOnlyApi;

#[async_trait]
impl SwitchApi for LocalOnlyApi {
    async fn heartbeat(&self, _deadline: DateTime<Utc>, _grace_minutes: u32) -> bool {
        debug!("No switch service configured; heartbeat kept local.");
        false
    }

    async fn push_config(&self, _payload: &ConfigPayload) -> bool {
        debug!("No switch service configured; config kept local.");
        false
    }

    async fn status(&self) -> Option<RemoteStatus> {
        None
    }

    async fn notify_self(&self) -> bool {
        false
    }

    async fn delete_account(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Contact;

    #[test]
    fn payload_drops_contacts_without_email() {
        let mut registry = Registry::new();
        registry.add_contact(Contact {
            name: "Grace".into(),
            role: ContactRole::Emergency,
            email: "grace@example.com".into(),
            phone: String::new(),
        });
        registry.add_contact(Contact {
            name: "Linus".into(),
            role: ContactRole::AssetLiaison,
            email: "no-email".into(),
            phone: "+1 555 0199".into(),
        });

        let payload = ConfigPayload::build(&Settings::default(), &registry, &Memo::default(), true);
        assert_eq!(payload.contacts.len(), 1);
        assert_eq!(payload.contacts[0].target, "grace@example.com");

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["isEnabled"], true);
        assert_eq!(json["gracePeriod"], 60);
        assert_eq!(json["contacts"][0]["type"], "email");
        assert_eq!(json["contacts"][0]["role"], "emergency");
    }

    #[test]
    fn base_url_trailing_slash_is_ignored() {
        let api = HttpSwitchApi::new("https://switch.example.com/", "udid", Duration::from_secs(1))
            .unwrap();
        assert_eq!(
            api.url("heartbeat"),
            "https://switch.example.com/api/v1/switch/heartbeat"
        );
    }

    #[test]
    fn device_id_can_be_rotated() {
        let api = HttpSwitchApi::new("https://switch.example.com", "old", Duration::from_secs(1))
            .unwrap();
        api.set_device_id("new");
        assert_eq!(api.udid(), "new");
    }
}
