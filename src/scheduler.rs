//! Delayed and repeating callbacks with explicit cancellation handles.
//!
//! Every timer runs as its own tokio task guarded by a
//! [`CancellationToken`]. A cancelled handle's callback never starts: the
//! token is checked again after the wake-up, so a cancel that lands while the
//! wake-up is already queued still wins.
//!
//! A callback that is already running is not interrupted. Flows that race
//! several timers to one terminal state must re-check their own state under
//! their lock before acting (see `pairing`).
//!
//! All methods must be called from within a tokio runtime.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::trace;

/// Handle to one scheduled callback.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    id: u64,
    token: CancellationToken,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Prevent any further invocation of this timer's callback.
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            trace!(timer = self.id, "timer cancelled");
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Spawns timers and owns their collective lifetime.
///
/// Cloning shares the same scope; [`Scheduler::scope`] creates a child whose
/// [`Scheduler::shutdown`] only affects timers created through it.
#[derive(Debug, Clone)]
pub struct Scheduler {
    root: CancellationToken,
    tracker: TaskTracker,
    next_id: Arc<AtomicU64>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Child scheduler for one component. Shutting down the parent also
    /// cancels the child's timers.
    pub fn scope(&self) -> Scheduler {
        Self {
            root: self.root.child_token(),
            tracker: TaskTracker::new(),
            next_id: Arc::clone(&self.next_id),
        }
    }

    fn new_handle(&self) -> TimerHandle {
        TimerHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            token: self.root.child_token(),
        }
    }

    /// Run `callback` once after `delay`.
    pub fn after<F, Fut>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = self.new_handle();
        let token = handle.token.clone();
        let id = handle.id;

        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = time::sleep(delay) => {}
            }

            // The wake-up may have been queued before a cancel landed.
            if token.is_cancelled() {
                return;
            }

            trace!(timer = id, "one-shot timer fired");
            callback().await;
        });

        handle
    }

    /// Run `callback` every `period`, first after one full period.
    ///
    /// Ticks never overlap: the next tick is scheduled only after the
    /// previous callback has finished.
    pub fn every<F, Fut>(&self, period: Duration, mut callback: F) -> TimerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = self.new_handle();
        let token = handle.token.clone();

        self.tracker.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if token.is_cancelled() {
                    break;
                }

                callback().await;
            }
        });

        handle
    }

    pub fn cancel(&self, handle: &TimerHandle) {
        handle.cancel();
    }

    /// Cancel every timer created through this scheduler and its children.
    ///
    /// Timers created afterwards start out cancelled.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.tracker.close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Number of timer tasks created through this scheduler (not its
    /// children) that have not exited yet.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }
}
