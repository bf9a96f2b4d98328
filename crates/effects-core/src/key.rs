use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::hash::hash_one;

/// Identity of a leaf or derived node.
///
/// Two keys are equal when their names hash to the same value. Names are
/// expected to be unique per process; a collision makes both declarations
/// share one identity and the last registration wins.
#[derive(Clone)]
pub struct NodeKey {
    id: u64,
    name: Rc<str>, // FUTURE(no_std): intern names in an arena.
}

impl NodeKey {
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        Self {
            id: hash_one(name),
            name: Rc::from(name),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for NodeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeKey {}

impl Hash for NodeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey({:?})", self.name)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for NodeKey {
    fn from(name: &str) -> Self {
        NodeKey::new(name)
    }
}

impl From<String> for NodeKey {
    fn from(name: String) -> Self {
        NodeKey::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_with_same_name_are_equal() {
        let a = NodeKey::new("devices");
        let b = NodeKey::from("devices");
        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());
        assert_ne!(a, NodeKey::new("scanners"));
    }

    #[test]
    fn display_uses_name() {
        let key = NodeKey::new("select_devices");
        assert_eq!(key.to_string(), "select_devices");
        assert_eq!(format!("{key:?}"), "NodeKey(\"select_devices\")");
    }
}
