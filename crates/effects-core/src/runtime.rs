use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use crate::delayed_task::DelayedTaskRegistration;
use crate::platform::{Clock, RuntimeScheduler};
use crate::DelayedTaskId;

struct RuntimeInner {
    scheduler: Arc<dyn RuntimeScheduler>,
    clock: Arc<dyn Clock>,
    // Sorted by (deadline, id) so tasks sharing a deadline run in scheduling order.
    delayed_tasks: RefCell<Vec<DelayedTaskEntry>>, // FUTURE(no_std): replace Vec with a bounded heap.
    next_task_id: Cell<DelayedTaskId>,
}

impl RuntimeInner {
    fn new(scheduler: Arc<dyn RuntimeScheduler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            scheduler,
            clock,
            delayed_tasks: RefCell::new(Vec::new()),
            next_task_id: Cell::new(1),
        }
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    fn schedule_after(&self, delay: Duration, task: Box<dyn FnOnce() + 'static>) -> DelayedTaskId {
        let id = self.next_task_id.get();
        self.next_task_id.set(id + 1);
        let delay_millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let deadline = self.now_millis().saturating_add(delay_millis);
        {
            let mut tasks = self.delayed_tasks.borrow_mut();
            let index = tasks.partition_point(|entry| (entry.deadline, entry.id) <= (deadline, id));
            tasks.insert(
                index,
                DelayedTaskEntry {
                    id,
                    deadline,
                    task: Some(task),
                },
            );
        }
        log::trace!("delayed task {id} scheduled for {deadline}ms");
        self.scheduler.schedule_wakeup(deadline);
        id
    }

    fn cancel_delayed_task(&self, id: DelayedTaskId) -> bool {
        let mut tasks = self.delayed_tasks.borrow_mut();
        match tasks.iter().position(|entry| entry.id == id) {
            Some(index) => {
                tasks.remove(index);
                log::trace!("delayed task {id} cancelled");
                true
            }
            None => false,
        }
    }

    fn pop_due_task(&self, now: u64) -> Option<(DelayedTaskId, Box<dyn FnOnce() + 'static>)> {
        let mut tasks = self.delayed_tasks.borrow_mut();
        if tasks.first().map_or(true, |entry| entry.deadline > now) {
            return None;
        }
        let mut entry = tasks.remove(0);
        entry.task.take().map(|task| (entry.id, task))
    }

    /// Runs every task whose deadline is not after the current clock reading.
    ///
    /// Tasks are popped one at a time and no borrow is held while a task
    /// runs, so a task may schedule or cancel other tasks.
    fn drain_due_tasks(&self) -> usize {
        let now = self.now_millis();
        let mut executed = 0;
        while let Some((id, task)) = self.pop_due_task(now) {
            log::trace!("running delayed task {id} at {now}ms");
            task();
            executed += 1;
        }
        if let Some(deadline) = self.next_deadline() {
            self.scheduler.schedule_wakeup(deadline);
        }
        executed
    }

    fn next_deadline(&self) -> Option<u64> {
        self.delayed_tasks.borrow().first().map(|entry| entry.deadline)
    }

    fn pending_task_count(&self) -> usize {
        self.delayed_tasks.borrow().len()
    }
}

/// Owner of the delayed-task queue.
///
/// Cloning is cheap and every clone refers to the same queue. Components hold
/// a [`RuntimeHandle`] instead so that dropping the last `Runtime` tears the
/// queue down.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>, // FUTURE(no_std): replace Rc with arena-managed runtime storage.
}

impl Runtime {
    pub fn new(scheduler: Arc<dyn RuntimeScheduler>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Rc::new(RuntimeInner::new(scheduler, clock)),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle(Rc::downgrade(&self.inner))
    }

    pub fn now_millis(&self) -> u64 {
        self.inner.now_millis()
    }

    pub fn drain_due_tasks(&self) -> usize {
        self.inner.drain_due_tasks()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.inner.next_deadline()
    }

    pub fn has_pending_tasks(&self) -> bool {
        self.inner.pending_task_count() > 0
    }
}

/// Scheduler that ignores wake-up requests; the host polls instead.
#[derive(Default)]
pub struct DefaultScheduler;

impl RuntimeScheduler for DefaultScheduler {
    fn schedule_wakeup(&self, _deadline_millis: u64) {}
}

#[derive(Clone)]
pub struct RuntimeHandle(Weak<RuntimeInner>);

impl RuntimeHandle {
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    /// Queues `task` to run once `delay` has elapsed.
    ///
    /// Returns an inactive registration when the runtime is gone; the task is
    /// dropped without running in that case.
    pub fn schedule_after(
        &self,
        delay: Duration,
        task: impl FnOnce() + 'static,
    ) -> DelayedTaskRegistration {
        match self.0.upgrade() {
            Some(inner) => {
                let id = inner.schedule_after(delay, Box::new(task));
                DelayedTaskRegistration::new(self.clone(), id)
            }
            None => DelayedTaskRegistration::inactive(self.clone()),
        }
    }

    pub(crate) fn cancel_delayed_task(&self, id: DelayedTaskId) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.cancel_delayed_task(id))
            .unwrap_or(false)
    }

    pub fn drain_due_tasks(&self) -> usize {
        self.0
            .upgrade()
            .map(|inner| inner.drain_due_tasks())
            .unwrap_or(0)
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.0.upgrade().and_then(|inner| inner.next_deadline())
    }

    pub fn has_pending_tasks(&self) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.pending_task_count() > 0)
            .unwrap_or(false)
    }
}

struct DelayedTaskEntry {
    id: DelayedTaskId,
    deadline: u64,
    task: Option<Box<dyn FnOnce() + 'static>>,
}

#[cfg(test)]
#[derive(Default)]
pub struct TestScheduler {
    last_wakeup: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl TestScheduler {
    pub fn last_wakeup(&self) -> u64 {
        self.last_wakeup.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl RuntimeScheduler for TestScheduler {
    fn schedule_wakeup(&self, deadline_millis: u64) {
        self.last_wakeup
            .store(deadline_millis, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct TestClock {
    now: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl TestClock {
    pub fn advance(&self, millis: u64) {
        self.now
            .fetch_add(millis, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for TestClock {
    fn now_millis(&self) -> u64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Runtime driven by a virtual clock.
#[cfg(test)]
pub struct TestRuntime {
    runtime: Runtime,
    scheduler: Arc<TestScheduler>,
    clock: Arc<TestClock>,
}

#[cfg(test)]
impl TestRuntime {
    pub fn new() -> Self {
        let scheduler = Arc::new(TestScheduler::default());
        let clock = Arc::new(TestClock::default());
        Self {
            runtime: Runtime::new(scheduler.clone(), clock.clone()),
            scheduler,
            clock,
        }
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime.clone()
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub fn scheduler(&self) -> &TestScheduler {
        &self.scheduler
    }

    /// Moves the virtual clock forward and runs whatever became due.
    pub fn advance(&self, millis: u64) -> usize {
        self.clock.advance(millis);
        self.runtime.drain_due_tasks()
    }
}
