//! Tracked background tasks and deadline-precise scheduling.
//!
//! Every task spawned through [`BackgroundTasks`] is tracked until
//! completion so shutdown can drain them with a bounded wait. Deadline
//! scheduling sleeps until shortly before the target and then spins on
//! the monotonic clock, keeping firing skew within a few milliseconds
//! of the deadline.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

use crate::clock::MonotonicClock;
use crate::consts::SCHEDULE_SPIN_WINDOW;

/// Error type for background task management.
#[derive(Debug, Error)]
pub enum BackgroundError {
    /// A tracked task panicked; carries the panic payload description.
    #[error("background task panicked: {0}")]
    TaskPanicked(String),
}

struct Inner {
    clock: MonotonicClock,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Tracked background task manager, shared by handle.
#[derive(Clone)]
pub struct BackgroundTasks {
    inner: Arc<Inner>,
}

impl BackgroundTasks {
    /// Create a manager driven by the given clock.
    pub fn new(clock: MonotonicClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The clock this manager schedules against.
    pub fn clock(&self) -> MonotonicClock {
        self.inner.clock
    }

    /// Spawn a tracked background task.
    pub fn spawn<F>(&self, fut: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        let abort = handle.abort_handle();
        let mut handles = self.inner.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        abort
    }

    /// Schedule `f` to run at a monotonic clock deadline.
    ///
    /// The waiter sleeps until [`SCHEDULE_SPIN_WINDOW`] before the
    /// deadline and then spins on the clock. A deadline already in the
    /// past fires immediately; callers that need past deadlines rejected
    /// must validate before scheduling.
    pub fn spawn_at<F>(&self, deadline: f64, f: F) -> AbortHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let clock = self.inner.clock;
        self.spawn(async move {
            let target = clock.instant_at(deadline) - SCHEDULE_SPIN_WINDOW;
            tokio::time::sleep_until(target).await;

            while clock.now() < deadline {
                std::hint::spin_loop();
            }

            debug!(deadline, fired = clock.now(), "scheduled task firing");
            f();
        })
    }

    /// Schedule `f` to run `delay` seconds from now.
    pub fn spawn_after<F>(&self, delay: f64, f: F) -> AbortHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_at(self.inner.clock.now() + delay, f)
    }

    /// Number of tracked tasks that have not yet finished.
    pub fn active_count(&self) -> usize {
        self.inner
            .handles
            .lock()
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Wait for all tracked tasks to finish.
    ///
    /// Tasks still running when `timeout` elapses are aborted and their
    /// cancellation awaited. The first panic observed among tracked
    /// tasks is surfaced as [`BackgroundError::TaskPanicked`];
    /// cancellations are not errors.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), BackgroundError> {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.handles.lock());
        let deadline = tokio::time::Instant::now() + timeout;
        let mut first_panic: Option<String> = None;

        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let result = match tokio::time::timeout(remaining, &mut handle).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    handle.abort();
                    handle.await
                }
            };

            if let Err(e) = result {
                if e.is_panic() && first_panic.is_none() {
                    first_panic = Some(e.to_string());
                }
            }
        }

        match first_panic {
            Some(msg) => Err(BackgroundError::TaskPanicked(msg)),
            None => Ok(()),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
