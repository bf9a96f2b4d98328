//! Consumer binding: one attach and one detach per logical consumer lifetime.

use std::cell::{Cell, RefCell};
use std::fmt;

use indexmap::IndexMap;

use crate::coordinator::{LifecycleCoordinator, Resolution};
use crate::node::{Readable, Setter, Writable};
use crate::{LifecycleError, NodeKey};

/// A consumer's hold on a node.
///
/// Created by [`LifecycleCoordinator::subscribe`], which performs the
/// attach and records each leaf reference it took. The matching detach
/// releases exactly those references, once, either through
/// [`Subscription::release`] or when the subscription is dropped. Edges
/// recorded after the attach do not change what is released.
#[must_use = "dropping a Subscription detaches it immediately"]
pub struct Subscription {
    coordinator: LifecycleCoordinator,
    key: NodeKey,
    resolution: Resolution,
    held: Vec<NodeKey>,
    released: bool,
}

impl Subscription {
    pub(crate) fn new(
        coordinator: LifecycleCoordinator,
        key: NodeKey,
        resolution: Resolution,
        held: Vec<NodeKey>,
    ) -> Self {
        Self {
            coordinator,
            key,
            resolution,
            held,
            released: false,
        }
    }

    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Leaf references this subscription owns, one entry per reference.
    pub fn held_leaves(&self) -> &[NodeKey] {
        &self.held
    }

    pub fn is_active(&self) -> bool {
        !self.released && self.resolution != Resolution::NotTracked
    }

    /// Detaches now.
    pub fn release(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let held = std::mem::take(&mut self.held);
        self.coordinator.release_leaves(&held);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("resolution", &self.resolution)
            .field("held", &self.held)
            .field("released", &self.released)
            .finish()
    }
}

/// An attach that failed partway.
///
/// The leaf references taken before the failure are owned by the carried
/// subscription. Dropping the error releases them; [`AttachError::into_parts`]
/// hands them to the caller instead.
pub struct AttachError {
    error: LifecycleError,
    subscription: Subscription,
}

impl AttachError {
    pub(crate) fn new(error: LifecycleError, subscription: Subscription) -> Self {
        Self {
            error,
            subscription,
        }
    }

    pub fn error(&self) -> &LifecycleError {
        &self.error
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn into_parts(self) -> (LifecycleError, Subscription) {
        (self.error, self.subscription)
    }
}

impl From<AttachError> for LifecycleError {
    fn from(err: AttachError) -> Self {
        err.error
    }
}

impl fmt::Debug for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachError")
            .field("error", &self.error)
            .field("subscription", &self.subscription)
            .finish()
    }
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attach to `{}` failed: {}", self.subscription.key, self.error)
    }
}

impl std::error::Error for AttachError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Attachment state for a consumer that is re-evaluated many times.
///
/// Every evaluation calls [`ConsumerScope::use_node`] again; only the first
/// call per key attaches, even when that attach failed. [`ConsumerScope::dispose`]
/// (or dropping the scope) ends the lifetime and detaches every key exactly
/// once.
pub struct ConsumerScope {
    coordinator: LifecycleCoordinator,
    subscriptions: RefCell<IndexMap<NodeKey, Subscription>>,
    disposed: Cell<bool>,
}

impl ConsumerScope {
    pub fn new(coordinator: LifecycleCoordinator) -> Self {
        Self {
            coordinator,
            subscriptions: RefCell::new(IndexMap::new()),
            disposed: Cell::new(false),
        }
    }

    /// Reads `node` and attaches to it if this scope has not already.
    ///
    /// The read happens first so a derived node has recorded its
    /// dependencies by the time it is resolved.
    pub fn use_node<N: Readable + ?Sized>(&self, node: &N) -> Result<N::Value, LifecycleError> {
        let value = node.read();
        self.attach(node.key())?;
        Ok(value)
    }

    /// [`use_node`](Self::use_node) for a writable node, also returning a
    /// setter for it.
    pub fn use_state<N: Writable + ?Sized>(
        &self,
        node: &N,
    ) -> Result<(N::Value, Setter<N::Value>), LifecycleError> {
        let value = self.use_node(node)?;
        Ok((value, node.setter()))
    }

    /// Attaches to `key` once for this scope's lifetime.
    ///
    /// A failed attach is still recorded: its error is returned this time,
    /// later calls do nothing, and dispose releases whatever it took.
    pub fn attach(&self, key: &NodeKey) -> Result<(), LifecycleError> {
        if self.disposed.get() {
            log::warn!("attach to `{key}` after consumer scope was disposed; ignored");
            return Ok(());
        }
        if self.subscriptions.borrow().contains_key(key) {
            return Ok(());
        }
        let (subscription, result) = match self.coordinator.subscribe(key) {
            Ok(subscription) => (subscription, Ok(())),
            Err(failure) => {
                let (error, subscription) = failure.into_parts();
                (subscription, Err(error))
            }
        };
        self.subscriptions
            .borrow_mut()
            .insert(key.clone(), subscription);
        result
    }

    pub fn is_attached(&self, key: &NodeKey) -> bool {
        self.subscriptions.borrow().contains_key(key)
    }

    pub fn attached_keys(&self) -> Vec<NodeKey> {
        self.subscriptions.borrow().keys().cloned().collect()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Detaches every key this scope attached, in attach order. Later calls
    /// do nothing.
    pub fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        let subscriptions: Vec<Subscription> = self
            .subscriptions
            .borrow_mut()
            .drain(..)
            .map(|(_, subscription)| subscription)
            .collect();
        log::trace!("consumer scope releasing {} subscription(s)", subscriptions.len());
        for subscription in subscriptions {
            subscription.release();
        }
    }
}

impl Drop for ConsumerScope {
    fn drop(&mut self) {
        self.dispose();
    }
}
