//! # Scheduled Tasks
//!
//! A background loop paired with the handle that stops it. The reconnect loop
//! of the streaming transport and the interval loop of the polling transport
//! both run inside one of these, so teardown is a single `cancel()` call
//! rather than a hunt for stray timers.
//!
//! The spawned future receives a child [`CancellationToken`] and is expected
//! to `select!` on `token.cancelled()` at each of its suspension points
//! (connect, read, sleep, tick).

use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A named, cancellable background task.
pub struct ScheduledTask {
    name: String,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledTask {
    /// Spawns `make(token)` on the current tokio runtime.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime, like `tokio::spawn`.
    pub fn spawn<F, Fut>(name: impl Into<String>, make: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let task_name = name.clone();
        let fut = make(token.child_token());
        let handle = tokio::spawn(async move {
            fut.await;
            log::debug!("Scheduled task '{}' finished.", task_name);
        });
        Self {
            name,
            token,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Task name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requests cancellation. Safe to call any number of times.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            log::debug!("Cancelling scheduled task '{}'.", self.name);
            self.token.cancel();
        }
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the task has run to completion.
    pub fn is_finished(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Waits for the task to exit. Only the first caller actually awaits;
    /// later calls return immediately.
    pub async fn join(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    log::error!("Scheduled task '{}' panicked: {}", self.name, e);
                }
            }
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
