use crate::runtime::RuntimeHandle;
use crate::DelayedTaskId;

/// Handle to a task queued with [`RuntimeHandle::schedule_after`].
///
/// Dropping the registration cancels the task if it has not run yet.
pub struct DelayedTaskRegistration {
    runtime: RuntimeHandle,
    id: Option<DelayedTaskId>,
}

impl DelayedTaskRegistration {
    pub(crate) fn new(runtime: RuntimeHandle, id: DelayedTaskId) -> Self {
        Self {
            runtime,
            id: Some(id),
        }
    }

    pub(crate) fn inactive(runtime: RuntimeHandle) -> Self {
        Self { runtime, id: None }
    }

    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }

    /// Cancels the task. Returns `true` when it was still queued.
    pub fn cancel(mut self) -> bool {
        match self.id.take() {
            Some(id) => self.runtime.cancel_delayed_task(id),
            None => false,
        }
    }
}

impl Drop for DelayedTaskRegistration {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.runtime.cancel_delayed_task(id);
        }
    }
}
