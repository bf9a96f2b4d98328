//! Minimal value store the node types share.
//!
//! The store only tracks a write epoch: every leaf write bumps it, and a
//! derived node reuses its cached value while the epoch is unchanged.

use std::cell::Cell;
use std::rc::{Rc, Weak};

struct StoreInner {
    epoch: Cell<u64>,
}

#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(StoreInner {
                epoch: Cell::new(0),
            }),
        }
    }

    pub fn handle(&self) -> StoreHandle {
        StoreHandle(Rc::downgrade(&self.inner))
    }

    /// Number of leaf writes so far.
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.get()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct StoreHandle(Weak<StoreInner>);

impl StoreHandle {
    pub(crate) fn bump(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.epoch.set(inner.epoch.get().wrapping_add(1));
        }
    }

    /// Current epoch, or `None` once the store is gone; callers must not
    /// cache values then.
    pub(crate) fn epoch(&self) -> Option<u64> {
        self.0.upgrade().map(|inner| inner.epoch.get())
    }
}
