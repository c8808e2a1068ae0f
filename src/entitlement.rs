//! Access determination and the revocation cascade on access loss.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::client::backend::Backend;
use crate::config::EntitlementConfig;
use crate::devices::DeviceSessionRegistry;
use crate::notice::{Notice, NoticeSink};

/// Access state as reported by `GET /entitlement/verify`.
///
/// Replaced wholesale on every refresh. The three access flags must be
/// present: a body without them is an error reply, not a determination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementState {
    pub has_access: bool,
    pub is_subscribed: bool,
    pub is_verified: bool,
    /// Trial days left; absent for subscribed or verified accounts.
    #[serde(default)]
    pub days_remaining: Option<i64>,
    #[serde(default)]
    pub no_trial: bool,
    #[serde(default)]
    pub no_trial_reason: Option<String>,
    /// This hardware already used its trial on another account.
    #[serde(default)]
    pub trial_blocked: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Derived access level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessTier {
    NoAccess,
    Trial,
    Subscribed,
    Verified,
}

impl EntitlementState {
    /// State used when the check itself failed: access is granted.
    pub fn fail_open(reason: impl Into<String>) -> Self {
        Self {
            has_access: true,
            error: Some(reason.into()),
            ..Self::default()
        }
    }

    /// No access by any route. Triggers the revocation cascade.
    pub fn is_access_lost(&self) -> bool {
        !self.has_access && !self.is_subscribed && !self.is_verified
    }

    pub fn tier(&self) -> AccessTier {
        if self.is_verified {
            AccessTier::Verified
        } else if self.is_subscribed {
            AccessTier::Subscribed
        } else if self.has_access {
            AccessTier::Trial
        } else {
            AccessTier::NoAccess
        }
    }

    fn trial_days_within(&self, warning_days: i64) -> Option<i64> {
        if self.tier() != AccessTier::Trial {
            return None;
        }
        self.days_remaining
            .filter(|days| (1..=warning_days).contains(days))
    }
}

/// Keeps the current [`EntitlementState`] and tears down paired sessions
/// when access is lost.
pub struct EntitlementMonitor {
    backend: Arc<dyn Backend>,
    registry: Arc<DeviceSessionRegistry>,
    notices: Arc<dyn NoticeSink>,
    trial_warning_days: i64,
    /// Serializes refreshes so each one runs at most one cascade.
    gate: Mutex<()>,
    state: watch::Sender<Arc<EntitlementState>>,
    trial_warned: AtomicBool,
}

impl EntitlementMonitor {
    pub fn new(
        backend: Arc<dyn Backend>,
        registry: Arc<DeviceSessionRegistry>,
        notices: Arc<dyn NoticeSink>,
        config: &EntitlementConfig,
    ) -> Self {
        let (state, _) = watch::channel(Arc::new(EntitlementState::default()));

        Self {
            backend,
            registry,
            notices,
            trial_warning_days: config.trial_warning_days,
            gate: Mutex::new(()),
            state,
            trial_warned: AtomicBool::new(false),
        }
    }

    /// Last published state. `EntitlementState::default()` until the first
    /// refresh completes.
    pub fn current(&self) -> Arc<EntitlementState> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<EntitlementState>> {
        self.state.subscribe()
    }

    /// Re-check access for `hardware_id`.
    ///
    /// A failed check grants access. When the check succeeds and reports no
    /// access, every paired session is revoked before this returns.
    /// Overlapping calls run one after another.
    pub async fn refresh(&self, hardware_id: &str) -> EntitlementState {
        let _turn = self.gate.lock().await;

        let state = match self.backend.verify_entitlement(hardware_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "entitlement check failed, granting access");
                let state = EntitlementState::fail_open(e.to_string());
                self.state.send_replace(Arc::new(state.clone()));
                return state;
            }
        };

        debug!(
            tier = ?state.tier(),
            days_remaining = ?state.days_remaining,
            "entitlement refreshed"
        );
        self.state.send_replace(Arc::new(state.clone()));

        if let Some(days_remaining) = state.trial_days_within(self.trial_warning_days) {
            if !self.trial_warned.swap(true, Ordering::SeqCst) {
                self.notices.notify(Notice::TrialEndingSoon { days_remaining });
            }
        }

        if state.is_access_lost() {
            info!(
                trial_blocked = state.trial_blocked,
                "access lost, revoking paired sessions"
            );
            match self.registry.revoke_all().await {
                Ok(report) if report.attempted() > 0 => {
                    self.notices.notify(Notice::AccessRevoked {
                        revoked: report.revoked.len(),
                        failed: report.failed.len(),
                    })
                }
                Ok(_) => debug!("no paired sessions to revoke"),
                Err(e) => warn!(error = %e, "could not revoke paired sessions"),
            }
        }

        state
    }
}
