#![doc = r"Reference-counted mount/unmount lifecycles for shared reactive state nodes."]

pub mod binding;
pub mod collections;
pub mod coordinator;
pub mod delayed_task;
pub mod graph;
pub mod hash;
pub mod key;
pub mod node;
pub mod platform;
pub mod root;
pub mod runtime;
pub mod store;
mod subscribers;

pub use binding::{AttachError, ConsumerScope, Subscription};
pub use coordinator::{LifecycleCoordinator, LifecycleOptions, Resolution, DEFAULT_GRACE_PERIOD};
pub use delayed_task::DelayedTaskRegistration;
pub use graph::DependencySet;
pub use key::NodeKey;
pub use node::{
    derived, derived_with_options, leaf, Derived, DerivedOptions, Leaf, LeafEffect,
    LeafEffectContext, LeafOptions, ReadScope, Readable, Setter, Writable, WriteScope,
};
pub use platform::{Clock, RuntimeScheduler};
pub use root::EffectsRoot;
pub use runtime::{DefaultScheduler, Runtime, RuntimeHandle};
pub use store::{Store, StoreHandle};

#[cfg(test)]
pub use runtime::{TestClock, TestRuntime, TestScheduler};

use std::fmt;
use std::rc::Rc;

pub(crate) type DelayedTaskId = u64;

/// Error returned by a mount or unmount callback.
pub type EffectError = Box<dyn std::error::Error + 'static>;

/// A registered mount or unmount side effect.
pub type EffectCallback = Rc<dyn Fn() -> Result<(), EffectError>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LifecyclePhase {
    Mount,
    Unmount,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Mount => f.write_str("mount"),
            LifecyclePhase::Unmount => f.write_str("unmount"),
        }
    }
}

#[derive(Debug)]
pub enum LifecycleError {
    /// The recorded dependency edges loop back on themselves. `path` starts
    /// and ends with the same key.
    CyclicDependency { path: Vec<NodeKey> },
    /// A mount or unmount callback failed. `source` is the callback's own
    /// error, untouched.
    Effect {
        key: NodeKey,
        phase: LifecyclePhase,
        source: EffectError,
    },
}

impl LifecycleError {
    /// Returns the callback's error for [`LifecycleError::Effect`].
    pub fn into_effect_error(self) -> Option<EffectError> {
        match self {
            LifecycleError::Effect { source, .. } => Some(source),
            LifecycleError::CyclicDependency { .. } => None,
        }
    }
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleError::CyclicDependency { path } => {
                write!(f, "cyclic dependency: ")?;
                for (index, key) in path.iter().enumerate() {
                    if index > 0 {
                        write!(f, " -> ")?;
                    }
                    write!(f, "{key}")?;
                }
                Ok(())
            }
            LifecycleError::Effect { key, phase, source } => {
                write!(f, "{phase} effect for `{key}` failed: {source}")
            }
        }
    }
}

impl std::error::Error for LifecycleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LifecycleError::Effect { source, .. } => Some(source.as_ref()),
            LifecycleError::CyclicDependency { .. } => None,
        }
    }
}
