//! Registry maps. Builds with the `std-hash` feature fall back to the
//! standard library maps.

use crate::key::NodeKey;

#[cfg(feature = "std-hash")]
pub mod map {
    pub use std::collections::HashMap;
}

#[cfg(not(feature = "std-hash"))]
pub mod map {
    pub use hashbrown::HashMap;
}

/// Map keyed by node identity.
pub type NodeMap<V> = map::HashMap<NodeKey, V>;
