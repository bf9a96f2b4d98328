//! Lifecycle coordinator.
//!
//! Owns the leaf subscriber table and the dependency graph, and is the only
//! way to mutate either. Leaf keys are mounted and unmounted directly;
//! derived keys are resolved through their recorded dependencies down to
//! leaves.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::binding::{AttachError, Subscription};
use crate::graph::{DependencyGraph, DependencySet};
use crate::runtime::RuntimeHandle;
use crate::subscribers::{Acquire, LeafSubscriberTable, Release};
use crate::{EffectCallback, LifecycleError, LifecyclePhase, NodeKey};

/// Delay between a leaf losing its last reference and its unmount callback.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleOptions {
    pub grace_period: Duration,
}

impl LifecycleOptions {
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// What a key resolved to when it was mounted or unmounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The key is a registered leaf.
    Leaf,
    /// The key has a recorded dependency edge.
    Derived,
    /// Neither; nothing happened.
    NotTracked,
}

struct CoordinatorInner {
    runtime: RuntimeHandle,
    options: LifecycleOptions,
    leaves: RefCell<LeafSubscriberTable>,
    graph: RefCell<DependencyGraph>,
}

#[derive(Clone)]
pub struct LifecycleCoordinator {
    inner: Rc<CoordinatorInner>, // FUTURE(no_std): replace Rc with arena-managed coordinator storage.
}

impl LifecycleCoordinator {
    pub fn new(runtime: RuntimeHandle) -> Self {
        Self::with_options(runtime, LifecycleOptions::default())
    }

    pub fn with_options(runtime: RuntimeHandle, options: LifecycleOptions) -> Self {
        Self {
            inner: Rc::new(CoordinatorInner {
                runtime,
                options,
                leaves: RefCell::new(LeafSubscriberTable::default()),
                graph: RefCell::new(DependencyGraph::default()),
            }),
        }
    }

    pub fn options(&self) -> LifecycleOptions {
        self.inner.options
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.inner.runtime.clone()
    }

    /// Registers the mount and unmount callbacks of a leaf with a zero count.
    ///
    /// A missing unmount callback behaves as a no-op. Registering a key twice
    /// replaces the earlier entry.
    pub fn register_leaf(
        &self,
        key: NodeKey,
        mount: EffectCallback,
        unmount: Option<EffectCallback>,
    ) {
        let unmount = unmount.unwrap_or_else(|| Rc::new(|| Ok(())));
        let replaced = self
            .inner
            .leaves
            .borrow_mut()
            .register(key.clone(), mount, unmount);
        if replaced {
            log::warn!("leaf `{key}` registered twice; previous registration replaced");
        } else {
            log::debug!("leaf `{key}` registered");
        }
    }

    /// Replaces the dependency edge of a derived key with the reads of its
    /// latest computation.
    pub fn record_dependencies(&self, key: &NodeKey, dependencies: DependencySet) {
        log::trace!(
            "derived `{key}` read [{}]",
            dependencies
                .iter()
                .map(NodeKey::name)
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.inner
            .graph
            .borrow_mut()
            .replace(key.clone(), dependencies);
    }

    /// Takes a reference on a leaf, running its mount callback on the first
    /// reference unless a teardown was still pending.
    ///
    /// Returns `Ok(false)` when `key` is not a registered leaf. The count is
    /// updated before the callback runs and is kept even if it fails.
    pub fn handle_mount(&self, key: &NodeKey) -> Result<bool, LifecycleError> {
        self.acquire_leaf(key, &mut Vec::new())
    }

    /// Like [`handle_mount`](Self::handle_mount), pushing `key` onto
    /// `acquired` as soon as its count has been taken.
    fn acquire_leaf(&self, key: &NodeKey, acquired: &mut Vec<NodeKey>) -> Result<bool, LifecycleError> {
        let taken = self.inner.leaves.borrow_mut().acquire(key);
        let Some((outcome, refcount)) = taken else {
            return Ok(false);
        };
        acquired.push(key.clone());
        log::trace!("leaf `{key}` refcount -> {refcount}");
        match outcome {
            Acquire::Mount(mount) => {
                log::debug!("mounting leaf `{key}`");
                mount().map_err(|source| LifecycleError::Effect {
                    key: key.clone(),
                    phase: LifecyclePhase::Mount,
                    source,
                })?;
            }
            Acquire::Revived => {
                log::debug!("leaf `{key}` reattached inside grace period; unmount cancelled");
            }
            Acquire::Shared => {}
        }
        Ok(true)
    }

    /// Drops a reference on a leaf. When the count reaches zero the unmount
    /// callback is scheduled after the grace period.
    ///
    /// Returns `false` when `key` is not a registered leaf.
    pub fn handle_unmount(&self, key: &NodeKey) -> bool {
        let released = self.inner.leaves.borrow_mut().release(key);
        match released {
            None => false,
            Some(Release::Held(refcount)) => {
                log::trace!("leaf `{key}` refcount -> {refcount}");
                true
            }
            Some(Release::Underflow) => {
                log::trace!("leaf `{key}` released with no holders; refcount stays at 0");
                true
            }
            Some(Release::Idle) => {
                log::trace!("leaf `{key}` refcount -> 0");
                self.schedule_unmount(key);
                true
            }
        }
    }

    fn schedule_unmount(&self, key: &NodeKey) {
        let grace_period = self.inner.options.grace_period;
        let weak = Rc::downgrade(&self.inner);
        let task_key = key.clone();
        let registration = self.inner.runtime.schedule_after(grace_period, move || {
            if let Some(inner) = weak.upgrade() {
                LifecycleCoordinator { inner }.run_due_unmount(&task_key);
            }
        });
        if registration.is_active() {
            log::debug!("unmount of leaf `{key}` scheduled in {grace_period:?}");
        } else {
            log::warn!("runtime dropped; unmount of leaf `{key}` will never run");
        }
        self.inner.leaves.borrow_mut().arm(key, registration);
    }

    fn run_due_unmount(&self, key: &NodeKey) {
        let unmount = self.inner.leaves.borrow_mut().take_due_unmount(key);
        if let Some(unmount) = unmount {
            log::debug!("unmounting leaf `{key}`");
            if let Err(source) = unmount() {
                let err = LifecycleError::Effect {
                    key: key.clone(),
                    phase: LifecyclePhase::Unmount,
                    source,
                };
                log::error!("{err}");
            }
        }
    }

    pub fn resolve_and_mount(&self, key: &NodeKey) -> Result<Resolution, LifecycleError> {
        self.resolve(key, LifecyclePhase::Mount, &mut Vec::new())
    }

    /// Releases `key` through the edges recorded now. Consumers that need
    /// to release exactly what they took hold a [`Subscription`] instead.
    pub fn resolve_and_unmount(&self, key: &NodeKey) -> Result<Resolution, LifecycleError> {
        self.resolve(key, LifecyclePhase::Unmount, &mut Vec::new())
    }

    /// Attaches one consumer to `key`. The returned subscription remembers
    /// every leaf reference it took and releases exactly those, once, on
    /// [`Subscription::release`] or drop.
    ///
    /// When resolution fails partway, the references taken before the
    /// failure are not rolled back; they travel in the [`AttachError`] so the
    /// caller still owns their release.
    pub fn subscribe(&self, key: &NodeKey) -> Result<Subscription, AttachError> {
        let mut acquired = Vec::new();
        match self.resolve(key, LifecyclePhase::Mount, &mut acquired) {
            Ok(resolution) => {
                if resolution == Resolution::NotTracked {
                    log::trace!("`{key}` has no lifecycle; subscription is inert");
                }
                Ok(Subscription::new(self.clone(), key.clone(), resolution, acquired))
            }
            Err(error) => {
                let resolution = if self.is_leaf(key) {
                    Resolution::Leaf
                } else {
                    Resolution::Derived
                };
                let subscription = Subscription::new(self.clone(), key.clone(), resolution, acquired);
                Err(AttachError::new(error, subscription))
            }
        }
    }

    /// Drops one reference on each of `leaves`.
    pub(crate) fn release_leaves(&self, leaves: &[NodeKey]) {
        for leaf in leaves {
            self.handle_unmount(leaf);
        }
    }

    fn resolve(
        &self,
        key: &NodeKey,
        phase: LifecyclePhase,
        acquired: &mut Vec<NodeKey>,
    ) -> Result<Resolution, LifecycleError> {
        if self.apply_to_leaf(key, phase, acquired)? {
            return Ok(Resolution::Leaf);
        }
        let mut path = Vec::new();
        if self.resolve_derived(key, phase, &mut path, acquired)? {
            Ok(Resolution::Derived)
        } else {
            Ok(Resolution::NotTracked)
        }
    }

    fn apply_to_leaf(
        &self,
        key: &NodeKey,
        phase: LifecyclePhase,
        acquired: &mut Vec<NodeKey>,
    ) -> Result<bool, LifecycleError> {
        match phase {
            LifecyclePhase::Mount => self.acquire_leaf(key, acquired),
            LifecyclePhase::Unmount => Ok(self.handle_unmount(key)),
        }
    }

    /// Walks the recorded edges of `key`. `path` holds the derived keys on the
    /// current descent and is how a cycle is detected.
    fn resolve_derived(
        &self,
        key: &NodeKey,
        phase: LifecyclePhase,
        path: &mut Vec<NodeKey>,
        acquired: &mut Vec<NodeKey>,
    ) -> Result<bool, LifecycleError> {
        let dependencies = self.inner.graph.borrow().dependencies(key).cloned();
        let Some(dependencies) = dependencies else {
            return Ok(false);
        };
        if path.contains(key) {
            let mut cycle = path.clone();
            cycle.push(key.clone());
            return Err(LifecycleError::CyclicDependency { path: cycle });
        }
        path.push(key.clone());
        for dependency in &dependencies {
            let is_derived = self.inner.graph.borrow().contains(dependency);
            if is_derived {
                self.resolve_derived(dependency, phase, path, acquired)?;
            } else {
                self.apply_to_leaf(dependency, phase, acquired)?;
            }
        }
        path.pop();
        Ok(true)
    }

    pub fn is_leaf(&self, key: &NodeKey) -> bool {
        self.inner.leaves.borrow().contains(key)
    }

    pub fn is_derived(&self, key: &NodeKey) -> bool {
        self.inner.graph.borrow().contains(key)
    }

    /// Direct dependencies recorded by the last computation of `key`.
    pub fn dependencies_of(&self, key: &NodeKey) -> Option<DependencySet> {
        self.inner.graph.borrow().dependencies(key).cloned()
    }

    pub fn refcount(&self, key: &NodeKey) -> Option<usize> {
        self.inner.leaves.borrow().refcount(key)
    }

    /// Whether the leaf's resource is live: mounted and not yet torn down,
    /// including while a teardown is pending.
    pub fn is_mounted(&self, key: &NodeKey) -> bool {
        self.inner.leaves.borrow().is_mounted(key)
    }

    pub fn has_pending_unmount(&self, key: &NodeKey) -> bool {
        self.inner.leaves.borrow().has_pending_unmount(key)
    }

    pub fn leaf_count(&self) -> usize {
        self.inner.leaves.borrow().len()
    }

    pub fn derived_count(&self) -> usize {
        self.inner.graph.borrow().len()
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
