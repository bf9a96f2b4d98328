//! Leaf and derived nodes, and the factories that wire them into a
//! [`LifecycleCoordinator`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::coordinator::LifecycleCoordinator;
use crate::graph::DependencySet;
use crate::store::{Store, StoreHandle};
use crate::{EffectCallback, EffectError, NodeKey};

/// A node whose current value can be read.
pub trait Readable {
    type Value: Clone + 'static;

    fn key(&self) -> &NodeKey;

    fn read(&self) -> Self::Value;
}

/// A node that can be written through a [`Setter`].
pub trait Writable: Readable {
    fn setter(&self) -> Setter<Self::Value>;
}

type SideEffect<T> = Box<dyn Fn(&Setter<T>) -> Result<(), EffectError>>;
type SetObserver<T> = Rc<dyn Fn(&T, &T)>;

/// Store-native behavior run once when a leaf is declared.
pub type LeafEffect<T> = Box<dyn FnOnce(&LeafEffectContext<T>)>;

struct LeafInner<T: Clone + 'static> {
    key: NodeKey,
    initial: T,
    value: RefCell<T>,
    observers: RefCell<Vec<SetObserver<T>>>,
    store: StoreHandle,
}

impl<T: Clone + 'static> LeafInner<T> {
    fn set(&self, value: T) {
        let old = self.value.replace(value.clone());
        self.store.bump();
        let observers: Vec<SetObserver<T>> = self.observers.borrow().clone();
        for observer in observers {
            observer(&value, &old);
        }
    }

    fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.value.borrow());
        self.set(next);
    }
}

/// Base state holder with an explicit value.
pub struct Leaf<T: Clone + 'static> {
    inner: Rc<LeafInner<T>>,
}

impl<T: Clone + 'static> Clone for Leaf<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> Leaf<T> {
    pub fn key(&self) -> &NodeKey {
        &self.inner.key
    }

    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    pub fn set(&self, value: T) {
        self.inner.set(value);
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        self.inner.update(f);
    }

    pub fn reset(&self) {
        self.inner.set(self.inner.initial.clone());
    }

    pub fn setter(&self) -> Setter<T> {
        Setter::for_leaf(&self.inner)
    }
}

impl<T: Clone + 'static> Readable for Leaf<T> {
    type Value = T;

    fn key(&self) -> &NodeKey {
        &self.inner.key
    }

    fn read(&self) -> T {
        self.get()
    }
}

impl<T: Clone + 'static> Writable for Leaf<T> {
    fn setter(&self) -> Setter<T> {
        Setter::for_leaf(&self.inner)
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for Leaf<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leaf")
            .field("key", &self.inner.key)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

enum SetTarget<T: Clone + 'static> {
    Leaf(Weak<LeafInner<T>>),
    Derived(Weak<DerivedInner<T>>),
}

/// Write access to a leaf or a writable derived node.
///
/// Handed to leaf mount/unmount callbacks and returned by
/// [`ConsumerScope::use_state`](crate::ConsumerScope::use_state). Holds the
/// node weakly; writes after the node is gone are ignored.
pub struct Setter<T: Clone + 'static> {
    target: SetTarget<T>,
}

impl<T: Clone + 'static> Clone for Setter<T> {
    fn clone(&self) -> Self {
        let target = match &self.target {
            SetTarget::Leaf(inner) => SetTarget::Leaf(Weak::clone(inner)),
            SetTarget::Derived(inner) => SetTarget::Derived(Weak::clone(inner)),
        };
        Self { target }
    }
}

impl<T: Clone + 'static> Setter<T> {
    fn for_leaf(inner: &Rc<LeafInner<T>>) -> Self {
        Self {
            target: SetTarget::Leaf(Rc::downgrade(inner)),
        }
    }

    fn for_derived(inner: &Rc<DerivedInner<T>>) -> Self {
        Self {
            target: SetTarget::Derived(Rc::downgrade(inner)),
        }
    }

    pub fn set(&self, value: T) {
        match &self.target {
            SetTarget::Leaf(inner) => {
                if let Some(inner) = inner.upgrade() {
                    inner.set(value);
                }
            }
            SetTarget::Derived(inner) => {
                if let Some(inner) = inner.upgrade() {
                    inner.write(value);
                }
            }
        }
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        match &self.target {
            SetTarget::Leaf(inner) => {
                if let Some(inner) = inner.upgrade() {
                    inner.update(f);
                }
            }
            SetTarget::Derived(inner) => {
                if let Some(inner) = inner.upgrade() {
                    let next = f(&inner.read());
                    inner.write(next);
                }
            }
        }
    }

    pub fn reset(&self) {
        match &self.target {
            SetTarget::Leaf(inner) => {
                if let Some(inner) = inner.upgrade() {
                    inner.set(inner.initial.clone());
                }
            }
            SetTarget::Derived(inner) => {
                if let Some(inner) = inner.upgrade() {
                    inner.reset();
                }
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        match &self.target {
            SetTarget::Leaf(inner) => inner.strong_count() > 0,
            SetTarget::Derived(inner) => inner.strong_count() > 0,
        }
    }
}

/// Passed to each [`LeafEffect`] at declaration time.
pub struct LeafEffectContext<T: Clone + 'static> {
    inner: Rc<LeafInner<T>>,
}

impl<T: Clone + 'static> LeafEffectContext<T> {
    pub fn key(&self) -> &NodeKey {
        &self.inner.key
    }

    pub fn setter(&self) -> Setter<T> {
        Setter::for_leaf(&self.inner)
    }

    pub fn set_self(&self, value: T) {
        self.inner.set(value);
    }

    pub fn reset_self(&self) {
        self.inner.set(self.inner.initial.clone());
    }

    /// Observes every later write as `(new, old)`.
    pub fn on_set(&self, observer: impl Fn(&T, &T) + 'static) {
        self.inner.observers.borrow_mut().push(Rc::new(observer));
    }
}

/// Declaration of a leaf node.
pub struct LeafOptions<T: Clone + 'static> {
    key: NodeKey,
    initial: T,
    mount: SideEffect<T>,
    unmount: Option<SideEffect<T>>,
    effects: Vec<LeafEffect<T>>,
}

impl<T: Clone + 'static> LeafOptions<T> {
    pub fn new(
        key: impl Into<NodeKey>,
        initial: T,
        mount: impl Fn(&Setter<T>) -> Result<(), EffectError> + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            initial,
            mount: Box::new(mount),
            unmount: None,
            effects: Vec::new(),
        }
    }

    pub fn with_unmount(
        mut self,
        unmount: impl Fn(&Setter<T>) -> Result<(), EffectError> + 'static,
    ) -> Self {
        self.unmount = Some(Box::new(unmount));
        self
    }

    pub fn with_effect(mut self, effect: impl FnOnce(&LeafEffectContext<T>) + 'static) -> Self {
        self.effects.push(Box::new(effect));
        self
    }
}

/// Declares a leaf: registers its callbacks with `coordinator` at a zero
/// count and runs its extra effects once.
pub fn leaf<T: Clone + 'static>(
    coordinator: &LifecycleCoordinator,
    store: &Store,
    options: LeafOptions<T>,
) -> Leaf<T> {
    let LeafOptions {
        key,
        initial,
        mount,
        unmount,
        effects,
    } = options;

    let inner = Rc::new(LeafInner {
        key: key.clone(),
        value: RefCell::new(initial.clone()),
        initial,
        observers: RefCell::new(Vec::new()),
        store: store.handle(),
    });
    let setter = Setter::for_leaf(&inner);

    let mount_setter = setter.clone();
    let on_mount: EffectCallback = Rc::new(move || mount(&mount_setter));
    let on_unmount = unmount.map(|unmount| -> EffectCallback {
        let unmount_setter = setter.clone();
        Rc::new(move || unmount(&unmount_setter))
    });
    coordinator.register_leaf(key, on_mount, on_unmount);

    let context = LeafEffectContext {
        inner: Rc::clone(&inner),
    };
    for effect in effects {
        effect(&context);
    }

    Leaf { inner }
}

/// Records the keys read during one evaluation of a derived node.
pub struct ReadScope {
    dependencies: DependencySet,
}

impl ReadScope {
    fn new() -> Self {
        Self {
            dependencies: DependencySet::new(),
        }
    }

    /// Reads `node`, recording it as a dependency of this evaluation.
    pub fn get<N: Readable + ?Sized>(&mut self, node: &N) -> N::Value {
        self.dependencies.insert(node.key().clone());
        node.read()
    }

    fn into_dependencies(self) -> DependencySet {
        self.dependencies
    }
}

/// Passed to the write callbacks of a writable derived node.
///
/// Reads through a write scope are not recorded as dependencies.
pub struct WriteScope {
    _private: (),
}

impl WriteScope {
    fn new() -> Self {
        Self { _private: () }
    }

    pub fn get<N: Readable + ?Sized>(&self, node: &N) -> N::Value {
        node.read()
    }

    pub fn set<N: Writable + ?Sized>(&self, node: &N, value: N::Value) {
        node.setter().set(value);
    }

    pub fn reset<N: Writable + ?Sized>(&self, node: &N) {
        node.setter().reset();
    }
}

type ComputeFn<T> = Box<dyn Fn(&mut ReadScope) -> T>;
type WriteFn<T> = Box<dyn Fn(&WriteScope, T)>;
type ResetFn = Box<dyn Fn(&WriteScope)>;

/// Declaration of a derived node.
pub struct DerivedOptions<T: Clone + 'static> {
    key: NodeKey,
    compute: ComputeFn<T>,
    set: Option<WriteFn<T>>,
    reset: Option<ResetFn>,
}

impl<T: Clone + 'static> DerivedOptions<T> {
    pub fn new(key: impl Into<NodeKey>, compute: impl Fn(&mut ReadScope) -> T + 'static) -> Self {
        Self {
            key: key.into(),
            compute: Box::new(compute),
            set: None,
            reset: None,
        }
    }

    /// Makes the node writable. `set` maps a written value onto writes of
    /// other nodes.
    pub fn with_set(mut self, set: impl Fn(&WriteScope, T) + 'static) -> Self {
        self.set = Some(Box::new(set));
        self
    }

    pub fn with_reset(mut self, reset: impl Fn(&WriteScope) + 'static) -> Self {
        self.reset = Some(Box::new(reset));
        self
    }
}

struct EvaluationGuard<'a>(&'a Cell<bool>);

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

struct DerivedInner<T: Clone + 'static> {
    key: NodeKey,
    compute: ComputeFn<T>,
    set: Option<WriteFn<T>>,
    reset: Option<ResetFn>,
    cache: RefCell<Option<(u64, T)>>,
    evaluating: Cell<bool>,
    coordinator: LifecycleCoordinator,
    store: StoreHandle,
}

impl<T: Clone + 'static> DerivedInner<T> {
    fn read(&self) -> T {
        let epoch = self.store.epoch();
        if let (Some(epoch), Some((cached_epoch, value))) = (epoch, &*self.cache.borrow()) {
            if *cached_epoch == epoch {
                return value.clone();
            }
        }
        self.recompute(epoch)
    }

    fn recompute(&self, epoch: Option<u64>) -> T {
        assert!(
            !self.evaluating.replace(true),
            "derived node `{}` read itself while computing",
            self.key
        );
        let mut scope = ReadScope::new();
        let value = {
            let _guard = EvaluationGuard(&self.evaluating);
            (self.compute)(&mut scope)
        };

        self.coordinator
            .record_dependencies(&self.key, scope.into_dependencies());
        *self.cache.borrow_mut() = epoch.map(|epoch| (epoch, value.clone()));
        value
    }

    fn write(&self, value: T) -> bool {
        match &self.set {
            Some(set) => {
                log::trace!("writing derived `{}`", self.key);
                set(&WriteScope::new(), value);
                true
            }
            None => {
                log::warn!("derived node `{}` is read-only; write ignored", self.key);
                false
            }
        }
    }

    fn reset(&self) -> bool {
        match &self.reset {
            Some(reset) => {
                reset(&WriteScope::new());
                true
            }
            None => {
                log::warn!("derived node `{}` has no reset; ignored", self.key);
                false
            }
        }
    }
}

/// Value computed from other nodes.
///
/// Computed lazily on first read and again after any leaf write. Each
/// completed computation replaces the node's recorded dependencies.
pub struct Derived<T: Clone + 'static> {
    inner: Rc<DerivedInner<T>>,
}

impl<T: Clone + 'static> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> Derived<T> {
    pub fn key(&self) -> &NodeKey {
        &self.inner.key
    }

    pub fn get(&self) -> T {
        self.inner.read()
    }

    pub fn is_writable(&self) -> bool {
        self.inner.set.is_some()
    }

    /// Writes through the node's set callback. Returns `false`, leaving
    /// everything untouched, when the node is read-only.
    pub fn set(&self, value: T) -> bool {
        self.inner.write(value)
    }

    /// Runs the node's reset callback, if it has one.
    pub fn reset(&self) -> bool {
        self.inner.reset()
    }

    pub fn setter(&self) -> Setter<T> {
        Setter::for_derived(&self.inner)
    }
}

impl<T: Clone + 'static> Readable for Derived<T> {
    type Value = T;

    fn key(&self) -> &NodeKey {
        &self.inner.key
    }

    fn read(&self) -> T {
        self.inner.read()
    }
}

impl<T: Clone + 'static> Writable for Derived<T> {
    fn setter(&self) -> Setter<T> {
        Setter::for_derived(&self.inner)
    }
}

impl<T: Clone + 'static> fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("key", &self.inner.key)
            .field("writable", &self.inner.set.is_some())
            .finish_non_exhaustive()
    }
}

/// Declares a read-only derived node. Nothing is computed until the first
/// read.
pub fn derived<T: Clone + 'static>(
    coordinator: &LifecycleCoordinator,
    store: &Store,
    key: impl Into<NodeKey>,
    compute: impl Fn(&mut ReadScope) -> T + 'static,
) -> Derived<T> {
    derived_with_options(coordinator, store, DerivedOptions::new(key, compute))
}

pub fn derived_with_options<T: Clone + 'static>(
    coordinator: &LifecycleCoordinator,
    store: &Store,
    options: DerivedOptions<T>,
) -> Derived<T> {
    let DerivedOptions {
        key,
        compute,
        set,
        reset,
    } = options;
    Derived {
        inner: Rc::new(DerivedInner {
            key,
            compute,
            set,
            reset,
            cache: RefCell::new(None),
            evaluating: Cell::new(false),
            coordinator: coordinator.clone(),
            store: store.handle(),
        }),
    }
}

#[cfg(test)]
#[path = "tests/node_tests.rs"]
mod tests;
