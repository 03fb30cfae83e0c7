//! # Recurring Triggers
//!
//! Thin scheduling layer: each trigger is one tokio task waking on a fixed
//! interval to run the drain callback. Registrations are in-memory only —
//! restarting the process forgets them, which matches the external
//! scheduler's role as a collaborator rather than durable state.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// Owns the recurring trigger tasks.
#[derive(Default)]
pub struct TriggerManager {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TriggerManager {
    /// No triggers registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a task invoking `task` every `interval_minutes` minutes. The
    /// first invocation happens one interval after registration, not
    /// immediately.
    pub fn create_recurring_trigger<F, Fut>(&self, interval_minutes: u64, task: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let period = Duration::from_secs(interval_minutes * 60);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // A tokio interval fires immediately; swallow that tick so the
            // cadence starts one period out.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                task().await;
            }
        });
        debug!(interval_minutes, "trigger registered");
        self.lock_tasks().push(handle);
    }

    /// Aborts every registered trigger task.
    pub fn delete_all_triggers(&self) {
        let mut tasks = self.lock_tasks();
        for handle in tasks.drain(..) {
            handle.abort();
        }
        debug!("all triggers deleted");
    }

    /// Number of live trigger tasks.
    pub fn active_triggers(&self) -> usize {
        let mut tasks = self.lock_tasks();
        tasks.retain(|handle| !handle.is_finished());
        tasks.len()
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for TriggerManager {
    fn drop(&mut self) {
        self.delete_all_triggers();
    }
}
