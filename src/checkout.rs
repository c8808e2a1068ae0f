//! Payment verification with bounded exponential backoff.
//!
//! Each checkout session id gets at most one verification in flight.
//! Attempts are chained through the scheduler, so retries for one session
//! are strictly sequential. Progress is published as [`CheckoutAttempt`]
//! values on a `watch` channel. A finished session stays answerable for a
//! short window so a repeated callback link does not verify twice.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::backend::Backend;
use crate::client::responses::CheckoutRequest;
use crate::config::CheckoutConfig;
use crate::deeplink::{parse_checkout_callback, CheckoutCallback};
use crate::entitlement::EntitlementMonitor;
use crate::identity::IdentityProvider;
use crate::notice::{Notice, NoticeSink};
use crate::retry::{classify_message, FailureKind, RetryPolicy};
use crate::scheduler::Scheduler;

const DEFAULT_FAILURE_MESSAGE: &str = "Payment could not be verified";
const SIGN_IN_MESSAGE: &str = "Sign in to finish verifying your payment";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutOutcome {
    Pending,
    Verified,
    /// The last attempt failed and another one is scheduled.
    TransientFailure,
    PermanentFailure,
    RetriesExhausted,
}

impl CheckoutOutcome {
    /// Nothing further is scheduled after a terminal outcome.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CheckoutOutcome::Verified
                | CheckoutOutcome::PermanentFailure
                | CheckoutOutcome::RetriesExhausted
        )
    }
}

/// Progress of one verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutAttempt {
    pub session_id: String,
    /// Retries scheduled so far; never exceeds `max_retries`.
    pub retry_count: u32,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub outcome: CheckoutOutcome,
    /// Last failure reason reported by the server or transport.
    pub message: Option<String>,
}

impl CheckoutAttempt {
    fn new(session_id: &str, policy: &RetryPolicy) -> Self {
        Self {
            session_id: session_id.to_string(),
            retry_count: 0,
            max_retries: policy.max_retries,
            base_delay_ms: u64::try_from(policy.base_delay.as_millis()).unwrap_or(u64::MAX),
            outcome: CheckoutOutcome::Pending,
            message: None,
        }
    }
}

type Step = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Shared {
    backend: Arc<dyn Backend>,
    identity: Arc<dyn IdentityProvider>,
    entitlement: Arc<EntitlementMonitor>,
    notices: Arc<dyn NoticeSink>,
    scheduler: Scheduler,
    policy: RetryPolicy,
    identity_wait: Duration,
    hardware_id: String,
    debounce: Duration,
    sessions: Mutex<Sessions>,
}

#[derive(Default)]
struct Sessions {
    in_flight: HashMap<String, watch::Receiver<CheckoutAttempt>>,
    /// Finished sessions and when they finished.
    recent: HashMap<String, (Instant, watch::Receiver<CheckoutAttempt>)>,
}

impl Shared {
    fn sessions(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn schedule(
        self: &Arc<Self>,
        delay: Duration,
        tx: watch::Sender<CheckoutAttempt>,
        deferred: bool,
    ) {
        let shared = Arc::clone(self);
        self.scheduler
            .after(delay, move || -> Step { Box::pin(shared.attempt(tx, deferred)) });
    }

    fn release(&self, session_id: &str) {
        let mut sessions = self.sessions();
        if let Some(rx) = sessions.in_flight.remove(session_id) {
            sessions
                .recent
                .insert(session_id.to_string(), (Instant::now(), rx));
        }
    }

    fn conclude(
        &self,
        tx: &watch::Sender<CheckoutAttempt>,
        outcome: CheckoutOutcome,
        message: Option<String>,
    ) {
        let session_id = tx.borrow().session_id.clone();

        tx.send_modify(|a| {
            a.outcome = outcome;
            a.message = message.clone();
        });
        self.release(&session_id);

        match outcome {
            CheckoutOutcome::Verified => {
                info!(session_id = %session_id, "payment verified");
                self.notices.notify(Notice::PaymentVerified { session_id });
            }
            _ => {
                let message = message.unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
                warn!(
                    session_id = %session_id,
                    ?outcome,
                    message = %message,
                    "payment verification failed"
                );
                self.notices
                    .notify(Notice::PaymentFailed { session_id, message });
            }
        }
    }

    /// One verification attempt. Schedules the next one or concludes.
    async fn attempt(self: Arc<Self>, tx: watch::Sender<CheckoutAttempt>, deferred: bool) {
        let (session_id, retry_count) = {
            let current = tx.borrow();
            (current.session_id.clone(), current.retry_count)
        };

        let Some(identity) = self.identity.current() else {
            if deferred {
                self.conclude(
                    &tx,
                    CheckoutOutcome::PermanentFailure,
                    Some(SIGN_IN_MESSAGE.to_string()),
                );
            } else {
                debug!(session_id = %session_id, "no account yet, deferring verification");
                self.schedule(self.identity_wait, tx, true);
            }
            return;
        };

        let request = CheckoutRequest {
            session_id: session_id.clone(),
            account_id: identity.account_id.clone(),
        };

        let verified = self
            .backend
            .verify_checkout(&identity.id_token, &request)
            .await;

        let (kind, message) = match verified {
            Ok(resp) if resp.success => {
                self.entitlement.refresh(&self.hardware_id).await;
                self.conclude(&tx, CheckoutOutcome::Verified, None);
                return;
            }
            Ok(resp) => (
                classify_message(resp.message()),
                resp.message().map(str::to_string),
            ),
            Err(e) => {
                debug!(
                    session_id = %session_id,
                    retryable = e.is_retryable(),
                    error = %e,
                    "verification request failed"
                );
                (FailureKind::Transient, Some(e.to_string()))
            }
        };

        match kind {
            FailureKind::Transient if self.policy.can_retry(retry_count) => {
                let delay = self.policy.delay(retry_count);
                debug!(
                    session_id = %session_id,
                    retry = retry_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    "payment verification failed, retrying"
                );
                if retry_count == 0 {
                    self.notices.notify(Notice::PaymentVerifying { wait: delay });
                }

                tx.send_modify(|a| {
                    a.outcome = CheckoutOutcome::TransientFailure;
                    a.retry_count += 1;
                    a.message = message;
                });
                self.schedule(delay, tx, deferred);
            }
            FailureKind::Transient => {
                debug!(
                    session_id = %session_id,
                    attempts = self.policy.max_attempts(),
                    "retry budget spent"
                );
                self.conclude(&tx, CheckoutOutcome::RetriesExhausted, message);
            }
            FailureKind::Permanent => {
                self.conclude(&tx, CheckoutOutcome::PermanentFailure, message);
            }
        }
    }
}

/// Confirms completed checkout sessions with the backend.
///
/// A successful verification refreshes entitlement before it is reported.
/// Dropping the verifier stops any scheduled retries.
pub struct CheckoutVerifier {
    shared: Arc<Shared>,
}

impl CheckoutVerifier {
    pub fn new(
        scheduler: &Scheduler,
        backend: Arc<dyn Backend>,
        identity: Arc<dyn IdentityProvider>,
        entitlement: Arc<EntitlementMonitor>,
        notices: Arc<dyn NoticeSink>,
        hardware_id: impl Into<String>,
        config: &CheckoutConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                identity,
                entitlement,
                notices,
                scheduler: scheduler.scope(),
                policy: RetryPolicy::from(config),
                identity_wait: Duration::from_millis(config.identity_wait_ms),
                hardware_id: hardware_id.into(),
                debounce: Duration::from_millis(config.callback_debounce_ms),
                sessions: Mutex::new(Sessions::default()),
            }),
        }
    }

    /// Start verifying `session_id` and return a receiver for its progress.
    ///
    /// While a verification for the same id is still running, its existing
    /// receiver is returned and no new attempt starts. The same holds for a
    /// session that finished less than `checkout.callback_debounce_ms` ago.
    pub fn verify(&self, session_id: &str) -> watch::Receiver<CheckoutAttempt> {
        let tx = {
            let mut sessions = self.shared.sessions();

            if let Some(rx) = sessions.in_flight.get(session_id) {
                debug!(session_id, "verification already in progress");
                return rx.clone();
            }

            let debounce = self.shared.debounce;
            sessions
                .recent
                .retain(|_, (finished, _)| finished.elapsed() < debounce);
            if let Some((_, rx)) = sessions.recent.get(session_id) {
                debug!(session_id, "verification just finished, reusing result");
                return rx.clone();
            }

            let (tx, rx) = watch::channel(CheckoutAttempt::new(session_id, &self.shared.policy));
            sessions.in_flight.insert(session_id.to_string(), rx);
            tx
        };

        info!(session_id, "verifying payment");
        let rx = tx.subscribe();
        self.shared.schedule(Duration::ZERO, tx, false);
        rx
    }

    /// Handle a checkout deep link. Starts verification for a success link;
    /// returns `None` for a cancelled checkout or an unrelated link.
    pub fn handle_callback(&self, link: &str) -> Option<watch::Receiver<CheckoutAttempt>> {
        match parse_checkout_callback(link)? {
            CheckoutCallback::Success { session_id } => Some(self.verify(&session_id)),
            CheckoutCallback::Canceled => {
                info!("checkout canceled by user");
                None
            }
        }
    }

    pub fn is_in_progress(&self, session_id: &str) -> bool {
        self.shared.sessions().in_flight.contains_key(session_id)
    }
}

impl Drop for CheckoutVerifier {
    fn drop(&mut self) {
        self.shared.scheduler.shutdown();
    }
}
