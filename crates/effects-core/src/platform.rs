//! Platform abstraction traits for the lifecycle runtime.
//!
//! These traits let the runtime delegate wake-ups and time keeping to the
//! host, so the same bookkeeping runs under a real clock, an event loop, or
//! a virtual clock in tests.

/// Receives wake-up requests from the runtime.
///
/// The runtime never blocks or spawns threads. When a delayed task is queued
/// it asks the host to call back no later than the given deadline; the host
/// then calls `RuntimeHandle::drain_due_tasks`.
pub trait RuntimeScheduler: Send + Sync {
    /// Request a wake-up at `deadline_millis` on the [`Clock`] timeline.
    fn schedule_wakeup(&self, deadline_millis: u64);
}

/// Provides timing information for the runtime.
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed on a monotonic timeline.
    fn now_millis(&self) -> u64;
}
