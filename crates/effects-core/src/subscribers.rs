//! Leaf subscriber table.
//!
//! Holds the mount/unmount callbacks, reference count and pending teardown
//! for every leaf node. The table only makes bookkeeping decisions; invoking
//! callbacks and arming timers is left to the coordinator so that no borrow
//! of the table is held while user code runs.

use std::rc::Rc;

use crate::collections::NodeMap;
use crate::delayed_task::DelayedTaskRegistration;
use crate::{EffectCallback, NodeKey};

pub(crate) struct LeafEntry {
    mount: EffectCallback,
    unmount: EffectCallback,
    refcount: usize,
    pending_unmount: Option<DelayedTaskRegistration>,
    mounted: bool,
}

impl LeafEntry {
    fn new(mount: EffectCallback, unmount: EffectCallback) -> Self {
        Self {
            mount,
            unmount,
            refcount: 0,
            pending_unmount: None,
            mounted: false,
        }
    }
}

/// Outcome of taking a reference on a leaf.
pub(crate) enum Acquire {
    /// First reference with no teardown pending; the mount callback must run.
    Mount(EffectCallback),
    /// First reference inside the grace window; the pending teardown was cancelled.
    Revived,
    /// The leaf already had references.
    Shared,
}

/// Outcome of dropping a reference on a leaf.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Release {
    /// The count reached zero; a teardown has to be armed.
    Idle,
    Held(usize),
    /// The count was already zero and stays there.
    Underflow,
}

#[derive(Default)]
pub(crate) struct LeafSubscriberTable {
    entries: NodeMap<LeafEntry>, // FUTURE(no_std): replace HashMap with arena-backed map.
}

impl LeafSubscriberTable {
    /// Registers a leaf, replacing any previous entry under the same key.
    ///
    /// Returns `true` when an entry was replaced. A replaced entry's pending
    /// teardown is cancelled along with it.
    pub(crate) fn register(
        &mut self,
        key: NodeKey,
        mount: EffectCallback,
        unmount: EffectCallback,
    ) -> bool {
        self.entries
            .insert(key, LeafEntry::new(mount, unmount))
            .is_some()
    }

    pub(crate) fn contains(&self, key: &NodeKey) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn refcount(&self, key: &NodeKey) -> Option<usize> {
        self.entries.get(key).map(|entry| entry.refcount)
    }

    pub(crate) fn is_mounted(&self, key: &NodeKey) -> bool {
        self.entries.get(key).is_some_and(|entry| entry.mounted)
    }

    pub(crate) fn has_pending_unmount(&self, key: &NodeKey) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.pending_unmount.is_some())
    }

    /// Takes a reference, returning the outcome and the new count.
    ///
    /// A pending teardown is always cancelled before deciding whether the
    /// mount callback has to run.
    pub(crate) fn acquire(&mut self, key: &NodeKey) -> Option<(Acquire, usize)> {
        let entry = self.entries.get_mut(key)?;
        let outcome = if entry.refcount == 0 {
            match entry.pending_unmount.take() {
                Some(registration) => {
                    registration.cancel();
                    Acquire::Revived
                }
                None => {
                    entry.mounted = true;
                    Acquire::Mount(Rc::clone(&entry.mount))
                }
            }
        } else {
            Acquire::Shared
        };
        entry.refcount += 1;
        Some((outcome, entry.refcount))
    }

    pub(crate) fn release(&mut self, key: &NodeKey) -> Option<Release> {
        let entry = self.entries.get_mut(key)?;
        if entry.refcount == 0 {
            return Some(Release::Underflow);
        }
        entry.refcount -= 1;
        if entry.refcount == 0 {
            Some(Release::Idle)
        } else {
            Some(Release::Held(entry.refcount))
        }
    }

    /// Stores the teardown armed after a [`Release::Idle`].
    pub(crate) fn arm(&mut self, key: &NodeKey, registration: DelayedTaskRegistration) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.pending_unmount = Some(registration);
        }
    }

    /// Called when a teardown timer fires. Returns the unmount callback when
    /// the leaf is still unreferenced and the teardown was not cancelled.
    pub(crate) fn take_due_unmount(&mut self, key: &NodeKey) -> Option<EffectCallback> {
        let entry = self.entries.get_mut(key)?;
        if entry.refcount != 0 {
            return None;
        }
        entry.pending_unmount.take()?;
        entry.mounted = false;
        Some(Rc::clone(&entry.unmount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn noop() -> EffectCallback {
        Rc::new(|| Ok(()))
    }

    fn table_with(key: &NodeKey) -> LeafSubscriberTable {
        let mut table = LeafSubscriberTable::default();
        table.register(key.clone(), noop(), noop());
        table
    }

    #[test]
    fn unknown_key_is_not_tracked() {
        let mut table = LeafSubscriberTable::default();
        let key = NodeKey::new("missing");
        assert!(table.acquire(&key).is_none());
        assert!(table.release(&key).is_none());
        assert!(table.take_due_unmount(&key).is_none());
        assert_eq!(table.refcount(&key), None);
    }

    #[test]
    fn first_acquire_requests_mount_then_shares() {
        let key = NodeKey::new("devices");
        let mut table = table_with(&key);

        let (first, count) = table.acquire(&key).expect("tracked");
        assert!(matches!(first, Acquire::Mount(_)));
        assert_eq!(count, 1);

        let (second, count) = table.acquire(&key).expect("tracked");
        assert!(matches!(second, Acquire::Shared));
        assert_eq!(count, 2);
        assert!(table.is_mounted(&key));
    }

    #[test]
    fn release_clamps_at_zero() {
        let key = NodeKey::new("devices");
        let mut table = table_with(&key);
        table.acquire(&key);

        assert_eq!(table.release(&key), Some(Release::Idle));
        assert_eq!(table.release(&key), Some(Release::Underflow));
        assert_eq!(table.release(&key), Some(Release::Underflow));
        assert_eq!(table.refcount(&key), Some(0));
    }

    #[test]
    fn release_reports_remaining_holders() {
        let key = NodeKey::new("devices");
        let mut table = table_with(&key);
        table.acquire(&key);
        table.acquire(&key);
        assert_eq!(table.release(&key), Some(Release::Held(1)));
    }

    #[test]
    fn register_replaces_previous_entry() {
        let key = NodeKey::new("devices");
        let calls = Rc::new(Cell::new(0));
        let mut table = table_with(&key);
        table.acquire(&key);

        let counter = Rc::clone(&calls);
        let replaced = table.register(
            key.clone(),
            Rc::new(move || {
                counter.set(counter.get() + 1);
                Ok(())
            }),
            noop(),
        );
        assert!(replaced);
        assert_eq!(table.refcount(&key), Some(0));
        match table.acquire(&key) {
            Some((Acquire::Mount(mount), _)) => mount().expect("mount"),
            _ => panic!("replaced entry should mount again"),
        }
        assert_eq!(calls.get(), 1);
    }
}
