//! Stable identities for node names.

use std::hash::{Hash, Hasher};

#[cfg(feature = "std-hash")]
type NameHasher = std::collections::hash_map::DefaultHasher;

// `AHasher::default` uses fixed keys, so a name hashes to the same id for the
// lifetime of the process.
#[cfg(not(feature = "std-hash"))]
type NameHasher = ahash::AHasher;

/// Hashes `value` with the hasher selected by the `std-hash` feature.
#[inline]
pub fn hash_one<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = NameHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::hash_one;

    #[test]
    fn same_name_hashes_the_same() {
        assert_eq!(hash_one("devices"), hash_one(&String::from("devices")));
        assert_ne!(hash_one("devices"), hash_one("scanners"));
    }
}
