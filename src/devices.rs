//! Paired remote sessions for the signed-in account.
//!
//! The backend owns the session list. The registry keeps a read-through
//! cache that is re-fetched after a successful pairing and after every
//! revocation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::backend::Backend;
use crate::client::responses::DisconnectRequest;
use crate::errors::{TetherError, TetherResult};
use crate::identity::{Identity, IdentityProvider};
use crate::notice::{Notice, NoticeSink};

/// Descriptor of the remote device behind a session.
///
/// Older servers send a bare user-agent string, newer ones an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawDeviceInfo", rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: Option<String>,
    pub user_agent: Option<String>,
    pub name: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDeviceInfo {
    Text(String),
    Fields {
        #[serde(default)]
        platform: Option<String>,
        #[serde(default, rename = "userAgent", alias = "user_agent")]
        user_agent: Option<String>,
        #[serde(default, alias = "deviceName")]
        name: Option<String>,
    },
    Missing(()),
}

impl From<RawDeviceInfo> for DeviceInfo {
    fn from(raw: RawDeviceInfo) -> Self {
        match raw {
            RawDeviceInfo::Text(user_agent) => Self {
                user_agent: Some(user_agent).filter(|s| !s.is_empty()),
                ..Self::default()
            },
            RawDeviceInfo::Fields {
                platform,
                user_agent,
                name,
            } => Self {
                platform,
                user_agent,
                name,
            },
            RawDeviceInfo::Missing(()) => Self::default(),
        }
    }
}

impl DeviceInfo {
    /// Short label for lists: the device name, else platform, else user agent.
    pub fn describe(&self) -> String {
        self.name
            .as_deref()
            .or(self.platform.as_deref())
            .or(self.user_agent.as_deref())
            .unwrap_or("Unknown device")
            .to_string()
    }
}

/// One paired remote session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSession {
    /// Server-issued, opaque.
    pub session_id: String,
    #[serde(default)]
    pub device_info: DeviceInfo,
    /// RFC 3339 timestamp of the last request seen from this session.
    #[serde(default)]
    pub last_active_at: Option<String>,
}

impl DeviceSession {
    pub fn last_active(&self) -> Option<DateTime<Utc>> {
        self.last_active_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Result of a single revocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    /// The server no longer knows the session.
    AlreadyRevoked,
    /// Another call is revoking the same session right now.
    InProgress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokeFailure {
    pub session_id: String,
    pub reason: String,
}

/// Aggregate result of [`DeviceSessionRegistry::revoke_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevocationReport {
    pub revoked: Vec<String>,
    pub failed: Vec<RevokeFailure>,
}

impl RevocationReport {
    pub fn attempted(&self) -> usize {
        self.revoked.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Removes a session id from the in-flight set when dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    session_id: String,
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a Mutex<HashSet<String>>, session_id: &str) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.to_string());

        inserted.then(|| Self {
            set,
            session_id: session_id.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.session_id);
    }
}

fn is_gone_message(message: Option<&str>) -> bool {
    message
        .map(|m| {
            let m = m.to_lowercase();
            m.contains("not found") || m.contains("already")
        })
        .unwrap_or(false)
}

pub struct DeviceSessionRegistry {
    backend: Arc<dyn Backend>,
    identity: Arc<dyn IdentityProvider>,
    notices: Arc<dyn NoticeSink>,
    cache: RwLock<Vec<DeviceSession>>,
    in_flight: Mutex<HashSet<String>>,
}

impl DeviceSessionRegistry {
    pub fn new(
        backend: Arc<dyn Backend>,
        identity: Arc<dyn IdentityProvider>,
        notices: Arc<dyn NoticeSink>,
    ) -> Self {
        Self {
            backend,
            identity,
            notices,
            cache: RwLock::new(Vec::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn require_identity(&self) -> TetherResult<Identity> {
        self.identity.current().ok_or_else(|| {
            TetherError::AuthRequired("sign in to manage connected devices".to_string())
        })
    }

    fn store(&self, sessions: Vec<DeviceSession>) {
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = sessions;
    }

    /// Last fetched session list.
    pub fn cached(&self) -> Vec<DeviceSession> {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Fetch the current sessions and refresh the cache.
    ///
    /// Fails only when nobody is signed in. Any other failure yields an empty
    /// list and a `DeviceListUnavailable` notice.
    pub async fn list(&self) -> TetherResult<Vec<DeviceSession>> {
        let identity = self.require_identity()?;

        let reason = match self
            .backend
            .connected_devices(&identity.id_token, &identity.account_id)
            .await
        {
            Ok(resp) if resp.success => {
                debug!(count = resp.devices.len(), "fetched connected devices");
                self.store(resp.devices.clone());
                return Ok(resp.devices);
            }
            Ok(resp) => resp
                .error
                .unwrap_or_else(|| "server reported a failure".to_string()),
            Err(e) => e.to_string(),
        };

        warn!(reason = %reason, "could not fetch connected devices");
        self.store(Vec::new());
        self.notices.notify(Notice::DeviceListUnavailable { reason });
        Ok(Vec::new())
    }

    async fn revoke_with(
        &self,
        identity: &Identity,
        session_id: &str,
    ) -> TetherResult<RevokeOutcome> {
        let Some(_claim) = InFlight::claim(&self.in_flight, session_id) else {
            debug!(session_id, "revocation already in progress");
            return Ok(RevokeOutcome::InProgress);
        };

        let request = DisconnectRequest {
            session_id: session_id.to_string(),
            account_id: identity.account_id.clone(),
        };

        let outcome = match self
            .backend
            .disconnect_device(&identity.id_token, &request)
            .await
        {
            Ok(resp) if resp.success => RevokeOutcome::Revoked,
            Ok(resp) if is_gone_message(resp.error.as_deref()) => RevokeOutcome::AlreadyRevoked,
            Ok(resp) => {
                return Err(TetherError::ServerError(
                    resp.error
                        .unwrap_or_else(|| "failed to disconnect device".to_string()),
                ))
            }
            Err(TetherError::Api(e)) if e.is_not_found() => RevokeOutcome::AlreadyRevoked,
            Err(e) => return Err(e),
        };

        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|s| s.session_id != session_id);

        Ok(outcome)
    }

    /// Revoke one session. Failure is reported and returned but leaves other
    /// sessions untouched.
    pub async fn revoke_one(&self, session_id: &str) -> TetherResult<RevokeOutcome> {
        let identity = self.require_identity()?;

        let result = self.revoke_with(&identity, session_id).await;

        match &result {
            Ok(outcome) => info!(session_id, ?outcome, "device session revoked"),
            Err(e) => {
                warn!(session_id, error = %e, "failed to revoke device session");
                self.notices.notify(Notice::DeviceRevokeFailed {
                    session_id: session_id.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        self.list().await?;
        result
    }

    /// Revoke every listed session, one after another.
    ///
    /// A failing device is recorded in the report and the loop moves on.
    pub async fn revoke_all(&self) -> TetherResult<RevocationReport> {
        let identity = self.require_identity()?;
        let sessions = self.list().await?;
        let mut report = RevocationReport::default();

        for session in &sessions {
            match self.revoke_with(&identity, &session.session_id).await {
                Ok(_) => report.revoked.push(session.session_id.clone()),
                Err(e) => {
                    warn!(
                        session_id = %session.session_id,
                        error = %e,
                        "failed to revoke device session, continuing"
                    );
                    report.failed.push(RevokeFailure {
                        session_id: session.session_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            revoked = report.revoked.len(),
            failed = report.failed.len(),
            "revoked all device sessions"
        );

        if report.attempted() > 0 {
            self.list().await?;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_info_from_object() {
        let session: DeviceSession = serde_json::from_str(
            r#"{
                "sessionId": "sess-1",
                "deviceInfo": {"platform": "iPhone", "userAgent": "Mobile Safari"},
                "lastActiveAt": "2026-01-15T12:00:00Z"
            }"#,
        )
        .unwrap();

        assert_eq!(session.device_info.platform.as_deref(), Some("iPhone"));
        assert_eq!(session.device_info.user_agent.as_deref(), Some("Mobile Safari"));
        assert_eq!(session.device_info.describe(), "iPhone");
        assert!(session.last_active().is_some());
    }

    #[test]
    fn device_info_from_string() {
        let session: DeviceSession = serde_json::from_str(
            r#"{"sessionId": "sess-2", "deviceInfo": "Mozilla/5.0 (Android)"}"#,
        )
        .unwrap();

        assert_eq!(
            session.device_info.user_agent.as_deref(),
            Some("Mozilla/5.0 (Android)")
        );
        assert_eq!(session.last_active_at, None);
    }

    #[test]
    fn device_info_missing_or_null() {
        let missing: DeviceSession = serde_json::from_str(r#"{"sessionId": "a"}"#).unwrap();
        let null: DeviceSession =
            serde_json::from_str(r#"{"sessionId": "b", "deviceInfo": null}"#).unwrap();

        assert_eq!(missing.device_info, DeviceInfo::default());
        assert_eq!(null.device_info.describe(), "Unknown device");
    }

    #[test]
    fn unparseable_last_active_is_none() {
        let session = DeviceSession {
            session_id: "x".to_string(),
            device_info: DeviceInfo::default(),
            last_active_at: Some("yesterday".to_string()),
        };
        assert!(session.last_active().is_none());
    }

    #[test]
    fn gone_messages() {
        assert!(is_gone_message(Some("Session not found")));
        assert!(is_gone_message(Some("Device already disconnected")));
        assert!(!is_gone_message(Some("Permission denied")));
        assert!(!is_gone_message(None));
    }

    #[test]
    fn in_flight_claim_is_exclusive_until_dropped() {
        let set = Mutex::new(HashSet::new());

        let first = InFlight::claim(&set, "sess-1");
        assert!(first.is_some());
        assert!(InFlight::claim(&set, "sess-1").is_none());
        assert!(InFlight::claim(&set, "sess-2").is_some());

        drop(first);
        assert!(InFlight::claim(&set, "sess-1").is_some());
    }
}
