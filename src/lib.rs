//! # arbors
//!
//! A persistent (immutable) sorted map for Rust, built on a
//! structurally-shared binary search tree.
//!
//! ## Overview
//!
//! [`PersistentSortedMap`] is an immutable ordered map: every update
//! returns a new version of the map, and all versions share the subtrees
//! they have in common. Updating a map never copies more than the path
//! from the root to the edited key, and a version can be read from any
//! number of places (or, with the `arc` feature, any number of threads)
//! without synchronization.
//!
//! The tree is an intentionally unbalanced binary search tree: there are
//! no rotations and no height guarantees, so worst-case depth is O(n).
//! In exchange the sharing behavior is fully predictable: an operation
//! that does not change a subtree returns the original subtree pointer,
//! which [`PersistentSortedMap::ptr_eq`] makes observable.
//!
//! ## Feature Flags
//!
//! - `arc`: use `Arc` instead of `Rc` for subtree pointers, making maps
//!   `Send + Sync` when their keys and values are
//! - `serde`: `Serialize`/`Deserialize` implementations
//!
//! ## Example
//!
//! ```rust
//! use arbors::PersistentSortedMap;
//!
//! let map = PersistentSortedMap::new()
//!     .insert("b", 1)
//!     .insert("a", 2)
//!     .insert("c", 3);
//!
//! // Entries iterate in ascending key order
//! let keys: Vec<&&str> = map.keys().collect();
//! assert_eq!(keys, vec![&"a", &"b", &"c"]);
//!
//! // Updates produce new versions; the original is untouched
//! let smaller = map.remove("a");
//! assert_eq!(map.len(), 3);
//! assert_eq!(smaller.len(), 2);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_closure_for_method_calls)]

// =============================================================================
// Reference Counter Type Alias
// =============================================================================

/// Reference-counted smart pointer type.
///
/// When the `arc` feature is enabled, this is `std::sync::Arc`,
/// which is thread-safe but has slightly higher overhead.
///
/// When the `arc` feature is disabled (default), this is `std::rc::Rc`,
/// which is faster but not thread-safe.
#[cfg(feature = "arc")]
pub(crate) type ReferenceCounter<T> = std::sync::Arc<T>;

#[cfg(not(feature = "arc"))]
pub(crate) type ReferenceCounter<T> = std::rc::Rc<T>;

pub mod sorted_map;

pub use sorted_map::Entry;
pub use sorted_map::KeyExistsError;
pub use sorted_map::PersistentSortedMap;
pub use sorted_map::PersistentSortedMapIntoIterator;
pub use sorted_map::PersistentSortedMapIterator;

/// Prelude module for convenient imports.
///
/// # Usage
///
/// ```rust
/// use arbors::prelude::*;
/// ```
pub mod prelude {
    pub use crate::sorted_map::Entry;
    pub use crate::sorted_map::KeyExistsError;
    pub use crate::sorted_map::PersistentSortedMap;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod reference_counter_tests {
    use super::ReferenceCounter;
    use rstest::rstest;

    #[rstest]
    fn test_reference_counter_clone() {
        let reference_counter: ReferenceCounter<i32> = ReferenceCounter::new(42);
        let reference_counter_clone = reference_counter.clone();
        assert_eq!(*reference_counter, *reference_counter_clone);
    }

    #[rstest]
    fn test_reference_counter_strong_count() {
        let reference_counter: ReferenceCounter<i32> = ReferenceCounter::new(42);
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 1);
        let reference_counter_clone = reference_counter.clone();
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 2);
        drop(reference_counter_clone);
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 1);
    }
}
