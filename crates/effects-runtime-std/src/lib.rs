//! Standard runtime services backed by Rust's `std` library.
//!
//! This crate provides concrete implementations of the platform
//! abstraction traits defined in `effects-core`. Applications can
//! construct a [`StdRuntime`] and either pump it from their own event loop
//! or let it sleep until the next delayed unmount is due.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use effects_core::{
    Clock, EffectsRoot, LifecycleOptions, Runtime, RuntimeHandle, RuntimeScheduler,
};

const NO_WAKEUP: u64 = u64::MAX;

/// Scheduler that records the earliest requested wake-up.
pub struct StdScheduler {
    next_wakeup: AtomicU64,
    waker: RwLock<Option<Arc<dyn Fn(u64) + Send + Sync + 'static>>>,
}

impl StdScheduler {
    pub fn new() -> Self {
        Self {
            next_wakeup: AtomicU64::new(NO_WAKEUP),
            waker: RwLock::new(None),
        }
    }

    /// Returns the earliest requested wake-up since the last call, if any.
    pub fn take_wakeup(&self) -> Option<u64> {
        match self.next_wakeup.swap(NO_WAKEUP, Ordering::SeqCst) {
            NO_WAKEUP => None,
            deadline => Some(deadline),
        }
    }

    /// Registers a waker that is invoked with the deadline whenever a wake-up
    /// is requested. Event loops use this to arm their own timers.
    pub fn set_waker(&self, waker: impl Fn(u64) + Send + Sync + 'static) {
        if let Ok(mut slot) = self.waker.write() {
            *slot = Some(Arc::new(waker));
        }
    }

    /// Clears any registered waker.
    pub fn clear_waker(&self) {
        if let Ok(mut slot) = self.waker.write() {
            *slot = None;
        }
    }

    fn wake(&self, deadline_millis: u64) {
        let waker = self.waker.read().ok().and_then(|slot| slot.clone());
        if let Some(waker) = waker {
            waker(deadline_millis);
        }
    }
}

impl Default for StdScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdScheduler")
            .field("next_wakeup", &self.next_wakeup.load(Ordering::SeqCst))
            .finish()
    }
}

impl RuntimeScheduler for StdScheduler {
    fn schedule_wakeup(&self, deadline_millis: u64) {
        self.next_wakeup.fetch_min(deadline_millis, Ordering::SeqCst);
        self.wake(deadline_millis);
    }
}

/// Clock implementation backed by [`std::time::Instant`].
#[derive(Debug, Clone)]
pub struct StdClock {
    origin: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Returns the elapsed time since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Convenience container bundling the standard scheduler and clock.
#[derive(Clone)]
pub struct StdRuntime {
    scheduler: Arc<StdScheduler>,
    clock: Arc<StdClock>,
    runtime: Runtime,
}

impl StdRuntime {
    /// Creates a new standard runtime instance.
    pub fn new() -> Self {
        let scheduler = Arc::new(StdScheduler::default());
        let clock = Arc::new(StdClock::default());
        let runtime = Runtime::new(scheduler.clone(), clock.clone());
        Self {
            scheduler,
            clock,
            runtime,
        }
    }

    /// Returns an [`effects_core::Runtime`] configured with the standard scheduler.
    pub fn runtime(&self) -> Runtime {
        self.runtime.clone()
    }

    /// Returns a handle to the runtime.
    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    /// Creates an [`EffectsRoot`] driven by this runtime.
    pub fn root(&self) -> EffectsRoot {
        self.root_with_options(LifecycleOptions::default())
    }

    pub fn root_with_options(&self, options: LifecycleOptions) -> EffectsRoot {
        EffectsRoot::with_runtime(self.runtime(), options)
    }

    /// Returns the scheduler implementation.
    pub fn scheduler(&self) -> Arc<StdScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Returns the clock implementation.
    pub fn clock(&self) -> Arc<StdClock> {
        Arc::clone(&self.clock)
    }

    /// Registers a waker to be called when the runtime requests a wake-up.
    pub fn set_waker(&self, waker: impl Fn(u64) + Send + Sync + 'static) {
        self.scheduler.set_waker(waker);
    }

    /// Clears any previously registered waker.
    pub fn clear_waker(&self) {
        self.scheduler.clear_waker();
    }

    /// Runs every delayed task that is due now.
    pub fn pump(&self) -> usize {
        self.runtime.drain_due_tasks()
    }

    /// Time until the next delayed task is due, or `None` when idle.
    pub fn time_until_next_task(&self) -> Option<Duration> {
        let deadline = self.runtime.next_deadline()?;
        let now = self.clock.now_millis();
        Some(Duration::from_millis(deadline.saturating_sub(now)))
    }

    /// Blocks the current thread for `duration`, running delayed tasks as
    /// they become due. Returns the number of tasks executed.
    pub fn run_for(&self, duration: Duration) -> usize {
        let end = Instant::now() + duration;
        let mut executed = self.pump();
        loop {
            let now = Instant::now();
            if now >= end {
                break;
            }
            let remaining = end - now;
            let nap = self
                .time_until_next_task()
                .map_or(remaining, |due| due.min(remaining));
            thread::sleep(nap);
            executed += self.pump();
        }
        executed
    }

    /// Blocks until no delayed task is queued.
    pub fn run_until_idle(&self) -> usize {
        let mut executed = self.pump();
        while let Some(due) = self.time_until_next_task() {
            if !due.is_zero() {
                thread::sleep(due);
            }
            executed += self.pump();
        }
        log::trace!("runtime idle after {executed} delayed task(s)");
        executed
    }
}

impl fmt::Debug for StdRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdRuntime")
            .field("scheduler", &self.scheduler)
            .field("clock", &self.clock)
            .finish()
    }
}

impl Default for StdRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use effects_core::{LeafOptions, LifecycleOptions};

    use super::{StdRuntime, StdScheduler};
    use effects_core::RuntimeScheduler;

    #[test]
    fn scheduler_keeps_earliest_wakeup() {
        let scheduler = StdScheduler::new();
        assert_eq!(scheduler.take_wakeup(), None);
        scheduler.schedule_wakeup(300);
        scheduler.schedule_wakeup(100);
        scheduler.schedule_wakeup(200);
        assert_eq!(scheduler.take_wakeup(), Some(100));
        assert_eq!(scheduler.take_wakeup(), None);
    }

    #[test]
    fn waker_receives_deadline() {
        let scheduler = StdScheduler::new();
        let seen = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&seen);
        scheduler.set_waker(move |deadline| sink.store(deadline, Ordering::SeqCst));
        scheduler.schedule_wakeup(42);
        assert_eq!(seen.load(Ordering::SeqCst), 42);

        scheduler.clear_waker();
        scheduler.schedule_wakeup(7);
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn std_runtime_unmounts_after_real_grace_period() {
        let runtime = StdRuntime::new();
        let root = runtime.root_with_options(
            LifecycleOptions::default().with_grace_period(Duration::from_millis(20)),
        );
        let unmounts = Rc::new(Cell::new(0));
        let counter = Rc::clone(&unmounts);
        let devices = root.leaf(
            LeafOptions::new("devices", 0u32, |_| Ok(())).with_unmount(move |_| {
                counter.set(counter.get() + 1);
                Ok(())
            }),
        );

        let (_, subscription) = root.subscribe(&devices).expect("attach");
        subscription.release();

        assert!(runtime.time_until_next_task().is_some());
        assert_eq!(unmounts.get(), 0);

        let executed = runtime.run_until_idle();
        assert_eq!(executed, 1);
        assert_eq!(unmounts.get(), 1);
        assert!(runtime.time_until_next_task().is_none());
    }

    #[test]
    fn run_for_returns_after_duration_when_idle() {
        let runtime = StdRuntime::new();
        let started = std::time::Instant::now();
        assert_eq!(runtime.run_for(Duration::from_millis(5)), 0);
        assert!(started.elapsed() >= Duration::from_millis(5));
    }
}
