use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use effects_core::{
    Clock, EffectError, EffectsRoot, LeafOptions, LifecycleOptions, RuntimeScheduler, Setter,
};

/// Clock that only moves when a test tells it to.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, millis: u64) -> u64 {
        self.now.fetch_add(millis, Ordering::SeqCst) + millis
    }

    /// Moves the clock to `millis`. Earlier instants are ignored.
    pub fn set(&self, millis: u64) {
        self.now.fetch_max(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ManualClock").field(&self.now_millis()).finish()
    }
}

/// Scheduler that records every wake-up the runtime asks for.
#[derive(Default)]
pub struct RecordingScheduler {
    requests: Mutex<Vec<u64>>,
}

impl RecordingScheduler {
    pub fn requests(&self) -> Vec<u64> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn last_request(&self) -> Option<u64> {
        self.requests().last().copied()
    }
}

impl RuntimeScheduler for RecordingScheduler {
    fn schedule_wakeup(&self, deadline_millis: u64) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(deadline_millis);
        }
    }
}

/// An [`EffectsRoot`] on a manual clock.
///
/// Time only passes through [`TestRoot::advance_by`] and
/// [`TestRoot::advance_to`], both of which run whatever delayed unmounts
/// became due.
pub struct TestRoot {
    root: EffectsRoot,
    clock: ManualClock,
    scheduler: Arc<RecordingScheduler>,
}

impl TestRoot {
    pub fn new() -> Self {
        Self::with_options(LifecycleOptions::default())
    }

    pub fn with_options(options: LifecycleOptions) -> Self {
        let clock = ManualClock::new();
        let scheduler = Arc::new(RecordingScheduler::default());
        let root = EffectsRoot::with_options(scheduler.clone(), Arc::new(clock.clone()), options);
        Self {
            root,
            clock,
            scheduler,
        }
    }

    pub fn root(&self) -> &EffectsRoot {
        &self.root
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn scheduler(&self) -> &RecordingScheduler {
        &self.scheduler
    }

    pub fn now_millis(&self) -> u64 {
        self.root.runtime().now_millis()
    }

    /// Advances the clock and runs the delayed tasks that became due.
    pub fn advance_by(&self, duration: Duration) -> usize {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.clock.advance(millis);
        self.root.drain_due_tasks()
    }

    pub fn advance_to(&self, millis: u64) -> usize {
        self.clock.set(millis);
        self.root.drain_due_tasks()
    }

    /// Runs every queued delayed task, advancing the clock to each deadline.
    pub fn run_until_idle(&self) -> usize {
        let mut executed = 0;
        while let Some(deadline) = self.root.runtime().next_deadline() {
            executed += self.advance_to(deadline);
        }
        executed
    }
}

impl Default for TestRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TestRoot {
    type Target = EffectsRoot;

    fn deref(&self) -> &Self::Target {
        &self.root
    }
}

/// Lifecycle event seen by an [`EffectProbe`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeEvent {
    Mount(String),
    Unmount(String),
}

/// Shared log of mount and unmount calls, in call order.
#[derive(Clone, Default)]
pub struct EffectProbe {
    events: Rc<RefCell<Vec<ProbeEvent>>>,
    failing_mounts: Rc<Cell<bool>>,
}

impl EffectProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leaf options whose callbacks log to this probe.
    pub fn leaf<T: Clone + 'static>(&self, name: &str, initial: T) -> LeafOptions<T> {
        let (mount_probe, unmount_probe) = (self.clone(), self.clone());
        let (mount_name, unmount_name) = (name.to_string(), name.to_string());
        LeafOptions::new(name, initial, move |_: &Setter<T>| {
            mount_probe.record(ProbeEvent::Mount(mount_name.clone()));
            if mount_probe.failing_mounts.get() {
                return Err(EffectError::from(format!("{mount_name} refused to mount")));
            }
            Ok(())
        })
        .with_unmount(move |_: &Setter<T>| {
            unmount_probe.record(ProbeEvent::Unmount(unmount_name.clone()));
            Ok(())
        })
    }

    /// Makes every later mount callback fail after logging.
    pub fn fail_mounts(&self, fail: bool) {
        self.failing_mounts.set(fail);
    }

    pub fn events(&self) -> Vec<ProbeEvent> {
        self.events.borrow().clone()
    }

    pub fn mounts(&self, name: &str) -> usize {
        self.count(|event| matches!(event, ProbeEvent::Mount(n) if n == name))
    }

    pub fn unmounts(&self, name: &str) -> usize {
        self.count(|event| matches!(event, ProbeEvent::Unmount(n) if n == name))
    }

    pub fn total_mounts(&self) -> usize {
        self.count(|event| matches!(event, ProbeEvent::Mount(_)))
    }

    pub fn total_unmounts(&self) -> usize {
        self.count(|event| matches!(event, ProbeEvent::Unmount(_)))
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    fn record(&self, event: ProbeEvent) {
        self.events.borrow_mut().push(event);
    }

    fn count(&self, predicate: impl Fn(&ProbeEvent) -> bool) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|event| predicate(event))
            .count()
    }
}

impl fmt::Debug for EffectProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectProbe")
            .field("events", &self.events.borrow())
            .finish()
    }
}
