//! One-shot cancelable timers on the tokio runtime

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::clock::Clock;

/// Schedules a future to run once after a delay.
#[derive(Clone)]
pub struct TimerService {
    clock: Arc<dyn Clock>,
}

impl TimerService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Spawn `task` after `delay`. Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let fire_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| self.clock.now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });

        debug!("Timer scheduled to fire at {}", fire_at);
        TimerHandle { handle, fire_at }
    }
}

/// Handle to a scheduled timer. Dropping the handle does not cancel it.
#[derive(Debug)]
pub struct TimerHandle {
    handle: JoinHandle<()>,
    fire_at: DateTime<Utc>,
}

impl TimerHandle {
    /// Abort the timer. A no-op if it already fired.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn fire_at(&self) -> DateTime<Utc> {
        self.fire_at
    }
}
