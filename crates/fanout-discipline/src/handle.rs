//! Shared handle on a live instance
//!
//! The scheduler, the scatter builders and the gather all reach an instance
//! through an [`InstanceHandle`]. The instance sits behind a short-lived
//! mutex; the running task is tracked so reconciliation can cancel it.

use parking_lot::{Mutex, MutexGuard};
use tokio::task::AbortHandle;

use crate::instance::DisciplineInstance;
use crate::state::InstanceState;

/// Instance plus the task currently running it
#[derive(Debug)]
pub struct InstanceHandle {
    instance: Mutex<DisciplineInstance>,
    task: Mutex<Option<AbortHandle>>,
}

impl InstanceHandle {
    /// Wrap an instance
    #[must_use]
    pub fn new(instance: DisciplineInstance) -> Self {
        Self {
            instance: Mutex::new(instance),
            task: Mutex::new(None),
        }
    }

    /// Lock the instance
    ///
    /// Never hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, DisciplineInstance> {
        self.instance.lock()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> InstanceState {
        self.instance.lock().state()
    }

    /// Remember the task running this instance
    pub fn track(&self, task: AbortHandle) {
        *self.task.lock() = Some(task);
    }

    /// Forget the task once it has completed
    pub fn untrack(&self) {
        self.task.lock().take();
    }

    /// Abort the running task, if any; returns `true` if one was aborted
    pub fn cancel(&self) -> bool {
        match self.task.lock().take() {
            Some(task) if !task.is_finished() => {
                task.abort();
                true
            }
            _ => false,
        }
    }
}
