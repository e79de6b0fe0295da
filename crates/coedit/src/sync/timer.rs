use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// The independent timers an editing session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Quiet period before pending edits are written
    Debounce,
    /// Delay after a write before an "Auto-save" version is recorded
    AutoSnapshot,
    /// Periodic presence refresh
    Heartbeat,
}

/// One cancellable timer per [`TimerKind`]
///
/// Scheduling a kind that is already pending replaces it. Dropping the set
/// cancels everything still pending.
#[derive(Default)]
pub struct SessionTimers {
    handles: Mutex<HashMap<TimerKind, JoinHandle<()>>>,
}

impl SessionTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once after `delay`, replacing any pending timer of `kind`
    pub fn schedule<F>(&self, kind: TimerKind, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        self.replace(kind, handle);
    }

    /// Run `tick` every `period`, starting after the first period
    pub fn schedule_every<F, Fut>(&self, kind: TimerKind, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !tick().await {
                    break;
                }
            }
        });
        self.replace(kind, handle);
    }

    /// Cancel a pending timer; returns whether one was pending
    pub fn cancel(&self, kind: TimerKind) -> bool {
        match self.lock().remove(&kind) {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                if pending {
                    debug!("Cancelled {:?} timer", kind);
                }
                pending
            }
            None => false,
        }
    }

    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.lock()
            .get(&kind)
            .map_or(false, |handle| !handle.is_finished())
    }

    pub fn cancel_all(&self) {
        for (_, handle) in self.lock().drain() {
            handle.abort();
        }
    }

    fn replace(&self, kind: TimerKind, handle: JoinHandle<()>) {
        if let Some(previous) = self.lock().insert(kind, handle) {
            previous.abort();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TimerKind, JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
