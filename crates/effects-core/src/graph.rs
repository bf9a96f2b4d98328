use indexmap::IndexSet;

use crate::collections::NodeMap;
use crate::NodeKey;

/// Keys a derived node read during its most recent computation.
///
/// Reading the same node twice in one pass records it once; the order is the
/// order of first read.
pub type DependencySet = IndexSet<NodeKey>;

/// Derived key → direct dependencies, as of the last completed computation.
#[derive(Default)]
pub(crate) struct DependencyGraph {
    edges: NodeMap<DependencySet>,
}

impl DependencyGraph {
    /// Replaces the edge set of `key` wholesale, returning the previous one.
    pub(crate) fn replace(&mut self, key: NodeKey, dependencies: DependencySet) -> Option<DependencySet> {
        self.edges.insert(key, dependencies)
    }

    pub(crate) fn dependencies(&self, key: &NodeKey) -> Option<&DependencySet> {
        self.edges.get(key)
    }

    pub(crate) fn contains(&self, key: &NodeKey) -> bool {
        self.edges.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.edges.len()
    }
}
