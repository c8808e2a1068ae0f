//! One pairing code from request to terminal state.
//!
//! `Idle -> Active -> {Connected, Expired, Cancelled}`, and `cancel` always
//! settles back to `Idle`. While a code is
//! active two timers race: a countdown that expires the code and a status
//! poll that detects the second device connecting. Every transition out of
//! `Active` goes through [`Inner::finish`], which cancels both timers and
//! clears the code under the state lock before any notice is sent. The
//! first terminal condition wins and later ones find the state no longer
//! `Active`.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::backend::Backend;
use crate::client::responses::GenerateCodeRequest;
use crate::config::PairingConfig;
use crate::devices::DeviceSessionRegistry;
use crate::errors::{TetherError, TetherResult};
use crate::identity::{Identity, IdentityProvider};
use crate::notice::{Notice, NoticeSink};
use crate::qr;
use crate::scheduler::{Scheduler, TimerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingStatus {
    #[default]
    Idle,
    Active,
    Connected,
    Expired,
    Cancelled,
}

impl PairingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PairingStatus::Connected | PairingStatus::Expired | PairingStatus::Cancelled
        )
    }
}

/// An issued pairing code, ready to display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingCode {
    pub code: String,
    /// URL the second device opens; encoded in `qr_payload`.
    pub connect_url: String,
    /// `data:image/svg+xml;base64,...` rendering of `connect_url`.
    pub qr_payload: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// The server handed back a code that was already active.
    pub existing: bool,
}

/// What observers see. `code` is `None` outside `Active`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairingSnapshot {
    pub status: PairingStatus,
    pub code: Option<PairingCode>,
    pub remaining_secs: u64,
}

#[derive(Default)]
struct Inner {
    status: PairingStatus,
    code: Option<PairingCode>,
    remaining_secs: u64,
    /// Bumped by every activation and every cancel. Timers and in-flight
    /// requests carry the value they started with and stand down on mismatch.
    generation: u64,
    /// `generate-code` requests currently awaiting the server.
    starting: usize,
    /// A cancel already claimed the pending requests.
    start_cancelled: bool,
    countdown: Option<TimerHandle>,
    poll: Option<TimerHandle>,
}

impl Inner {
    fn snapshot(&self) -> PairingSnapshot {
        PairingSnapshot {
            status: self.status,
            code: self.code.clone(),
            remaining_secs: self.remaining_secs,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.status == PairingStatus::Active && self.generation == generation
    }

    fn cancel_timers(&mut self) {
        for handle in [self.countdown.take(), self.poll.take()].into_iter().flatten() {
            handle.cancel();
        }
    }

    /// The single exit from `Active`.
    fn finish(&mut self, status: PairingStatus) {
        self.cancel_timers();
        self.status = status;
        self.code = None;
        self.remaining_secs = 0;
    }
}

struct Shared {
    inner: Mutex<Inner>,
    snapshot: watch::Sender<PairingSnapshot>,
    scheduler: Scheduler,
    backend: Arc<dyn Backend>,
    identity: Arc<dyn IdentityProvider>,
    registry: Arc<DeviceSessionRegistry>,
    notices: Arc<dyn NoticeSink>,
    config: PairingConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, inner: &Inner) {
        self.snapshot.send_replace(inner.snapshot());
    }

    async fn request_code(&self, identity: &Identity) -> TetherResult<(PairingCode, u64)> {
        let request = GenerateCodeRequest {
            account_id: identity.account_id.clone(),
            display_name: identity
                .display_name
                .clone()
                .unwrap_or_else(|| self.config.display_name.clone()),
        };

        let resp = self
            .backend
            .generate_code(&identity.id_token, &request)
            .await?;

        if !resp.success {
            return Err(TetherError::ServerError(
                resp.error
                    .unwrap_or_else(|| "failed to generate pairing code".to_string()),
            ));
        }

        let code = resp
            .code
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                TetherError::ServerError("server returned no pairing code".to_string())
            })?;

        let expires_in = resp
            .expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(self.config.default_expires_in_secs);

        let connect_url = qr::connect_url(&self.config.connect_url, &code);
        let qr_payload = qr::render_data_url(&connect_url)?;
        let issued_at = Utc::now();
        let expires_at = i64::try_from(expires_in)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .unwrap_or(issued_at);

        let pairing = PairingCode {
            code,
            connect_url,
            qr_payload,
            issued_at,
            expires_at,
            existing: resp.existing,
        };

        Ok((pairing, expires_in))
    }

    fn on_countdown_tick(&self, generation: u64) {
        {
            let mut inner = self.lock();
            if !inner.is_current(generation) {
                return;
            }

            inner.remaining_secs = inner.remaining_secs.saturating_sub(1);
            if inner.remaining_secs > 0 {
                self.publish(&inner);
                return;
            }

            inner.finish(PairingStatus::Expired);
            self.publish(&inner);
        }

        info!("pairing code expired");
        self.notices.notify(Notice::PairingCodeExpired);
    }

    async fn on_poll_tick(&self, generation: u64) {
        let code = {
            let inner = self.lock();
            if !inner.is_current(generation) {
                return;
            }
            match &inner.code {
                Some(code) => code.code.clone(),
                None => return,
            }
        };

        match self.backend.connection_status(&code).await {
            Ok(resp) if resp.is_connected() => {}
            Ok(resp) => {
                debug!(status = ?resp.status, "pairing not connected yet");
                return;
            }
            Err(e) => {
                debug!(error = %e, "connection status poll failed, retrying next tick");
                return;
            }
        }

        {
            let mut inner = self.lock();
            // Expiry or cancel may have won while the request was out.
            if !inner.is_current(generation) {
                return;
            }
            inner.finish(PairingStatus::Connected);
            self.publish(&inner);
        }

        info!("remote device connected");
        if let Err(e) = self.registry.list().await {
            warn!(error = %e, "could not refresh device list after pairing");
        }
        self.notices.notify(Notice::PairingConnected);
    }
}

/// Drives one pairing code at a time for the signed-in account.
///
/// Dropping the session cancels its timers.
pub struct PairingSession {
    shared: Arc<Shared>,
}

impl PairingSession {
    /// `scheduler` is scoped, so dropping this session leaves other timers
    /// on it alone.
    pub fn new(
        scheduler: &Scheduler,
        backend: Arc<dyn Backend>,
        identity: Arc<dyn IdentityProvider>,
        registry: Arc<DeviceSessionRegistry>,
        notices: Arc<dyn NoticeSink>,
        config: PairingConfig,
    ) -> Self {
        let (snapshot, _) = watch::channel(PairingSnapshot::default());

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                snapshot,
                scheduler: scheduler.scope(),
                backend,
                identity,
                registry,
                notices,
                config,
            }),
        }
    }

    pub fn status(&self) -> PairingStatus {
        self.shared.lock().status
    }

    pub fn snapshot(&self) -> PairingSnapshot {
        self.shared.lock().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<PairingSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Request a pairing code and start the countdown and status poll.
    ///
    /// While a code is already active it is returned as-is and no request
    /// is made. Fails with `AuthRequired` when nobody is signed in and with
    /// `PairingCancelled` when [`cancel`](Self::cancel) runs before the
    /// server answers.
    pub async fn start(&self) -> TetherResult<PairingCode> {
        let identity = self.shared.identity.current().ok_or_else(|| {
            TetherError::AuthRequired("sign in to pair a device".to_string())
        })?;

        let generation = {
            let mut inner = self.shared.lock();
            if inner.status == PairingStatus::Active {
                if let Some(code) = &inner.code {
                    debug!("pairing code already active, reusing it");
                    return Ok(code.clone());
                }
            }
            if inner.status.is_terminal() {
                inner.status = PairingStatus::Idle;
                self.shared.publish(&inner);
            }
            inner.starting += 1;
            inner.start_cancelled = false;
            inner.generation
        };

        let requested = self.shared.request_code(&identity).await;

        let (pairing, expires_in) = {
            let mut inner = self.shared.lock();
            inner.starting -= 1;

            if inner.generation != generation {
                // Either cancelled, or a concurrent start already activated.
                return match (&inner.status, &inner.code) {
                    (PairingStatus::Active, Some(code)) => Ok(code.clone()),
                    _ => Err(TetherError::PairingCancelled),
                };
            }
            let (pairing, expires_in) = requested?;

            inner.generation += 1;
            let generation = inner.generation;
            inner.status = PairingStatus::Active;
            inner.code = Some(pairing.clone());
            inner.remaining_secs = expires_in;
            inner.countdown = Some(self.arm_countdown(generation));
            inner.poll = Some(self.arm_poll(generation));
            self.shared.publish(&inner);

            (pairing, expires_in)
        };

        info!(expires_in, existing = pairing.existing, "pairing code issued");
        self.shared.notices.notify(Notice::PairingCodeIssued {
            code: pairing.code.clone(),
            existing: pairing.existing,
        });

        Ok(pairing)
    }

    fn arm_countdown(&self, generation: u64) -> TimerHandle {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        self.shared
            .scheduler
            .every(self.shared.config.countdown_tick(), move || {
                let weak = weak.clone();
                async move {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_countdown_tick(generation);
                    }
                }
            })
    }

    fn arm_poll(&self, generation: u64) -> TimerHandle {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        self.shared
            .scheduler
            .every(self.shared.config.poll_interval(), move || {
                let weak = weak.clone();
                async move {
                    if let Some(shared) = weak.upgrade() {
                        shared.on_poll_tick(generation).await;
                    }
                }
            })
    }

    /// Stop pairing: cancel both timers, drop the code, make any in-flight
    /// `start` fail with `PairingCancelled`, and leave the session `Idle`.
    ///
    /// Returns `true` if this call stopped an active or pending code, in
    /// which case observers see `Cancelled` before `Idle` and one
    /// `PairingCancelled` notice is sent. Otherwise it only resets a
    /// terminal session to `Idle`, and a call on an `Idle` session changes
    /// nothing.
    pub fn cancel(&self) -> bool {
        let cancelled = {
            let mut inner = self.shared.lock();
            let pending_start = inner.starting > 0
                && !inner.start_cancelled
                && inner.status == PairingStatus::Idle;
            let active = inner.status == PairingStatus::Active;

            inner.generation += 1;
            if active || pending_start {
                inner.start_cancelled = inner.starting > 0;
                inner.finish(PairingStatus::Cancelled);
                self.shared.publish(&inner);
            } else {
                inner.cancel_timers();
            }

            if inner.status != PairingStatus::Idle {
                inner.status = PairingStatus::Idle;
                self.shared.publish(&inner);
            }
            active || pending_start
        };

        if cancelled {
            info!("pairing cancelled");
            self.shared.notices.notify(Notice::PairingCancelled);
        }
        cancelled
    }
}

impl Drop for PairingSession {
    fn drop(&mut self) {
        self.shared.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_inner() -> Inner {
        Inner {
            status: PairingStatus::Active,
            remaining_secs: 42,
            generation: 3,
            ..Inner::default()
        }
    }

    #[test]
    fn finish_clears_code_and_remaining() {
        let mut inner = active_inner();
        inner.finish(PairingStatus::Expired);

        let snap = inner.snapshot();
        assert_eq!(snap.status, PairingStatus::Expired);
        assert_eq!(snap.code, None);
        assert_eq!(snap.remaining_secs, 0);
    }

    #[test]
    fn stale_generation_is_not_current() {
        let inner = active_inner();
        assert!(inner.is_current(3));
        assert!(!inner.is_current(2));
    }

    #[test]
    fn terminal_states() {
        assert!(!PairingStatus::Idle.is_terminal());
        assert!(!PairingStatus::Active.is_terminal());
        assert!(PairingStatus::Connected.is_terminal());
        assert!(PairingStatus::Expired.is_terminal());
        assert!(PairingStatus::Cancelled.is_terminal());
    }
}
