use std::sync::Arc;

use crate::binding::{AttachError, ConsumerScope, Subscription};
use crate::coordinator::{LifecycleCoordinator, LifecycleOptions};
use crate::node::{self, Derived, DerivedOptions, Leaf, LeafOptions, ReadScope, Readable};
use crate::platform::{Clock, RuntimeScheduler};
use crate::runtime::{Runtime, RuntimeHandle};
use crate::store::Store;
use crate::NodeKey;

/// Runtime, coordinator and store bundled for one application.
///
/// Nodes declared through a root share its coordinator, so two roots never
/// see each other's reference counts.
pub struct EffectsRoot {
    runtime: Runtime,
    coordinator: LifecycleCoordinator,
    store: Store,
}

impl EffectsRoot {
    pub fn new(scheduler: Arc<dyn RuntimeScheduler>, clock: Arc<dyn Clock>) -> Self {
        Self::with_options(scheduler, clock, LifecycleOptions::default())
    }

    pub fn with_options(
        scheduler: Arc<dyn RuntimeScheduler>,
        clock: Arc<dyn Clock>,
        options: LifecycleOptions,
    ) -> Self {
        Self::with_runtime(Runtime::new(scheduler, clock), options)
    }

    pub fn with_runtime(runtime: Runtime, options: LifecycleOptions) -> Self {
        let coordinator = LifecycleCoordinator::with_options(runtime.handle(), options);
        Self {
            runtime,
            coordinator,
            store: Store::new(),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub fn coordinator(&self) -> &LifecycleCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn leaf<T: Clone + 'static>(&self, options: LeafOptions<T>) -> Leaf<T> {
        node::leaf(&self.coordinator, &self.store, options)
    }

    pub fn derived<T: Clone + 'static>(
        &self,
        key: impl Into<NodeKey>,
        compute: impl Fn(&mut ReadScope) -> T + 'static,
    ) -> Derived<T> {
        node::derived(&self.coordinator, &self.store, key, compute)
    }

    /// Declares a derived node that may also be written through
    /// [`DerivedOptions::with_set`].
    pub fn derived_with_options<T: Clone + 'static>(&self, options: DerivedOptions<T>) -> Derived<T> {
        node::derived_with_options(&self.coordinator, &self.store, options)
    }

    /// Reads `node`, then attaches one consumer to it.
    pub fn subscribe<N: Readable + ?Sized>(
        &self,
        node: &N,
    ) -> Result<(N::Value, Subscription), AttachError> {
        let value = node.read();
        let subscription = self.coordinator.subscribe(node.key())?;
        Ok((value, subscription))
    }

    pub fn consumer_scope(&self) -> ConsumerScope {
        ConsumerScope::new(self.coordinator.clone())
    }

    /// Runs every delayed unmount whose grace period has elapsed.
    pub fn drain_due_tasks(&self) -> usize {
        self.runtime.drain_due_tasks()
    }
}
