//! Persistent (immutable) sorted map based on an unbalanced binary search tree.
//!
//! This module provides [`PersistentSortedMap`], an immutable ordered map
//! that uses structural sharing for efficient operations.
//!
//! # Overview
//!
//! Every update returns a new map and reuses every subtree the update did
//! not touch, so producing a new version allocates only the path from the
//! root to the edited key. The tree is deliberately unbalanced: no
//! rotations are performed, so all operations are O(h) where h is the
//! current height of the tree (worst case O(n) for adversarial insertion
//! orders, O(log n) for random ones).
//!
//! - O(h) get
//! - O(h) insert
//! - O(h) remove
//! - O(h) min/max
//! - O(n) len
//! - O(1) `is_empty`
//!
//! # Internal Structure
//!
//! All updates funnel through a single traversal/edit primitive
//! (`change_key`) that locates the position a key occupies, or would
//! occupy, and applies a caller-supplied edit there. Insertion and
//! removal are thin edit closures over that primitive, which is where the
//! two invariants of the structure are maintained:
//!
//! 1. **Ordering**: for every node, all keys to the left compare less
//!    than the node's key and all keys to the right compare greater.
//! 2. **Maximal sharing**: an edit that leaves a subtree untouched
//!    returns the original subtree pointer, never a structurally-equal
//!    copy. [`PersistentSortedMap::ptr_eq`] exposes this at the root.
//!
//! Removal of a node with two children grafts the entire right subtree
//! into the left subtree at the position the right root's key would
//! occupy. This keeps the ordering invariant but does not rebalance; see
//! [`PersistentSortedMap::remove`].
//!
//! Lookup, editing, and iteration are all written in explicit-stack or
//! loop form, so call-stack use stays bounded no matter how degenerate
//! the tree shape gets.

use crate::ReferenceCounter;
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FromIterator;

// =============================================================================
// Entry Definition
// =============================================================================

/// An immutable key/value pair stored at one position of the tree.
///
/// Entries are never mutated once constructed; replacing a value creates
/// a new entry in a new node.
///
/// # Examples
///
/// ```rust
/// use arbors::PersistentSortedMap;
///
/// let map = PersistentSortedMap::new().insert("answer", 42);
/// let entry = map.find_entry("answer").unwrap();
/// assert_eq!(entry.key(), &"answer");
/// assert_eq!(entry.value(), &42);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Entry<K, V> {
    key: K,
    value: V,
}

impl<K, V> Entry<K, V> {
    /// Creates a new entry.
    #[inline]
    #[must_use]
    pub const fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    /// Returns a reference to the key.
    #[inline]
    #[must_use]
    pub const fn key(&self) -> &K {
        &self.key
    }

    /// Returns a reference to the value.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> &V {
        &self.value
    }

    /// Returns the key and value as a pair of references.
    #[inline]
    #[must_use]
    pub const fn pair(&self) -> (&K, &V) {
        (&self.key, &self.value)
    }

    /// Consumes the entry, returning the key and value.
    #[inline]
    #[must_use]
    pub fn into_pair(self) -> (K, V) {
        (self.key, self.value)
    }
}

// =============================================================================
// Error Definition
// =============================================================================

/// The error returned by [`PersistentSortedMap::insert_if_absent`] when
/// the key is already present.
///
/// Carries the rejected key so callers can recover it without cloning.
///
/// # Examples
///
/// ```rust
/// use arbors::PersistentSortedMap;
///
/// let map = PersistentSortedMap::new().insert("a", 1);
/// let error = map.insert_if_absent("a", 2).unwrap_err();
/// assert_eq!(error.key, "a");
/// assert_eq!(format!("{error}"), "key \"a\" already exists in the map");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExistsError<K> {
    /// The key that was already present in the map.
    pub key: K,
}

impl<K: fmt::Debug> fmt::Display for KeyExistsError<K> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "key {:?} already exists in the map", self.key)
    }
}

impl<K: fmt::Debug> std::error::Error for KeyExistsError<K> {}

// =============================================================================
// Node Definition
// =============================================================================

/// A subtree pointer. `None` is the empty sentinel: the empty map is a
/// `None` root, and leaf nodes have two `None` children. All `None`
/// links compare pointer-identical to each other.
type Link<K, V> = Option<ReferenceCounter<Node<K, V>>>;

/// Internal node structure: one entry plus two shared child links.
#[derive(Clone)]
struct Node<K, V> {
    entry: Entry<K, V>,
    left: Link<K, V>,
    right: Link<K, V>,
}

impl<K, V> Node<K, V> {
    /// Creates a node with no children.
    const fn leaf(entry: Entry<K, V>) -> Self {
        Self {
            entry,
            left: None,
            right: None,
        }
    }

    /// Creates a copy of this node with a new left child.
    fn with_left(&self, left: Link<K, V>) -> Self
    where
        K: Clone,
        V: Clone,
    {
        Self {
            entry: self.entry.clone(),
            left,
            right: self.right.clone(),
        }
    }

    /// Creates a copy of this node with a new right child.
    fn with_right(&self, right: Link<K, V>) -> Self
    where
        K: Clone,
        V: Clone,
    {
        Self {
            entry: self.entry.clone(),
            left: self.left.clone(),
            right,
        }
    }

    /// Creates a copy of this node with a new entry, keeping both children.
    fn with_entry(&self, entry: Entry<K, V>) -> Self {
        Self {
            entry,
            left: self.left.clone(),
            right: self.right.clone(),
        }
    }
}

/// Pointer-identity comparison of two links.
fn same_link<K, V>(
    first: Option<&ReferenceCounter<Node<K, V>>>,
    second: Option<&ReferenceCounter<Node<K, V>>>,
) -> bool {
    match (first, second) {
        (None, None) => true,
        (Some(first), Some(second)) => ReferenceCounter::ptr_eq(first, second),
        _ => false,
    }
}

// =============================================================================
// PersistentSortedMap Definition
// =============================================================================

/// A persistent (immutable) sorted map based on a structurally-shared
/// binary search tree.
///
/// All operations return new maps without modifying the original, and an
/// update shares every subtree it did not touch with the map it was
/// derived from. The tree is not rebalanced, so operation cost is
/// proportional to tree height rather than guaranteed O(log N).
///
/// The map itself holds no cached size: [`len`](Self::len) walks the
/// tree. If O(1) length matters more than predictable sharing, a
/// balanced-tree map is the better tool.
///
/// # Time Complexity
///
/// | Operation      | Complexity |
/// |----------------|------------|
/// | `new`          | O(1)       |
/// | `get`          | O(h)       |
/// | `insert`       | O(h)       |
/// | `remove`       | O(h)       |
/// | `contains_key` | O(h)       |
/// | `min`/`max`    | O(h)       |
/// | `len`          | O(n)       |
/// | `is_empty`     | O(1)       |
///
/// # Examples
///
/// ```rust
/// use arbors::PersistentSortedMap;
///
/// let map = PersistentSortedMap::new()
///     .insert(3, "three")
///     .insert(1, "one")
///     .insert(2, "two");
///
/// // Entries are always in sorted key order
/// let keys: Vec<&i32> = map.keys().collect();
/// assert_eq!(keys, vec![&1, &2, &3]);
///
/// // Structural sharing: the original map is preserved
/// let updated = map.insert(1, "ONE");
/// assert_eq!(map.get(&1), Some(&"one"));     // Original unchanged
/// assert_eq!(updated.get(&1), Some(&"ONE")); // New version
/// ```
pub struct PersistentSortedMap<K, V> {
    /// Root link of the tree
    root: Link<K, V>,
}

impl<K, V> Clone for PersistentSortedMap<K, V> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
        }
    }
}

impl<K, V> PersistentSortedMap<K, V> {
    /// Creates a new empty map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let map: PersistentSortedMap<i32, String> = PersistentSortedMap::new();
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self { root: None }
    }

    /// Returns `true` if the map contains no entries.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let empty: PersistentSortedMap<i32, String> = PersistentSortedMap::new();
    /// assert!(empty.is_empty());
    ///
    /// let non_empty = empty.insert(1, "one".to_string());
    /// assert!(!non_empty.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Returns the number of entries in the map.
    ///
    /// Defined as the length of the in-order sequence; the map caches no
    /// size field.
    ///
    /// # Complexity
    ///
    /// O(n)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let map = PersistentSortedMap::new()
    ///     .insert(1, "one")
    ///     .insert(2, "two");
    /// assert_eq!(map.len(), 2);
    /// ```
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns `true` if both maps share the same root pointer.
    ///
    /// This is the observable face of the sharing contract: operations
    /// that change nothing (removing an absent key, a rejected
    /// `insert_if_absent`) hand back the original tree rather than a
    /// copy, and this method distinguishes that from mere value
    /// equality.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let map = PersistentSortedMap::new().insert(1, "one");
    /// let unchanged = map.remove(&2);
    /// assert!(map.ptr_eq(&unchanged));
    ///
    /// let rebuilt = map.remove(&1).insert(1, "one");
    /// assert!(!map.ptr_eq(&rebuilt)); // equal, but not the same tree
    /// assert_eq!(map, rebuilt);
    /// ```
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        same_link(self.root.as_ref(), other.root.as_ref())
    }

    /// Returns a lazy iterator over entries in ascending key order.
    ///
    /// Each call produces a fresh iterator; no cursor state is shared
    /// between calls, so a map can be iterated any number of times.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let map = PersistentSortedMap::new()
    ///     .insert(3, "three")
    ///     .insert(1, "one")
    ///     .insert(2, "two");
    ///
    /// for entry in map.iter() {
    ///     println!("{}: {}", entry.key(), entry.value());
    /// }
    /// ```
    #[must_use]
    pub fn iter(&self) -> PersistentSortedMapIterator<'_, K, V> {
        let mut iterator = PersistentSortedMapIterator { stack: Vec::new() };
        iterator.push_left_spine(self.root.as_deref());
        iterator
    }

    /// Returns an iterator over keys in ascending order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let map = PersistentSortedMap::new()
    ///     .insert(3, "three")
    ///     .insert(1, "one")
    ///     .insert(2, "two");
    ///
    /// let keys: Vec<&i32> = map.keys().collect();
    /// assert_eq!(keys, vec![&1, &2, &3]);
    /// ```
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(Entry::key)
    }

    /// Returns an iterator over values in ascending key order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let map = PersistentSortedMap::new()
    ///     .insert(1, 10)
    ///     .insert(2, 20)
    ///     .insert(3, 30);
    ///
    /// let sum: i32 = map.values().sum();
    /// assert_eq!(sum, 60);
    /// ```
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(Entry::value)
    }
}

// =============================================================================
// Lookup Operations
// =============================================================================

impl<K: Ord, V> PersistentSortedMap<K, V> {
    /// Returns the entry stored at the given key, if any.
    ///
    /// The key may be any borrowed form of the map's key type, but the
    /// ordering on the borrowed form must match the ordering on the key
    /// type.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let map = PersistentSortedMap::new().insert("hello".to_string(), 42);
    ///
    /// let entry = map.find_entry("hello").unwrap();
    /// assert_eq!(entry.pair(), (&"hello".to_string(), &42));
    /// assert!(map.find_entry("world").is_none());
    /// ```
    #[must_use]
    pub fn find_entry<Q>(&self, key: &Q) -> Option<&Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut current = self.root.as_deref();
        while let Some(node) = current {
            current = match key.cmp(node.entry.key.borrow()) {
                Ordering::Less => node.left.as_deref(),
                Ordering::Greater => node.right.as_deref(),
                Ordering::Equal => return Some(&node.entry),
            };
        }
        None
    }

    /// Returns a reference to the value corresponding to the key.
    ///
    /// # Complexity
    ///
    /// O(h)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let map = PersistentSortedMap::new().insert("hello".to_string(), 42);
    ///
    /// // Can use &str to look up String keys
    /// assert_eq!(map.get("hello"), Some(&42));
    /// assert_eq!(map.get("world"), None);
    /// ```
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find_entry(key).map(Entry::value)
    }

    /// Returns the value for the key, or the given default when absent.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let map = PersistentSortedMap::new().insert(1, "one");
    /// assert_eq!(map.get_or(&1, &"missing"), &"one");
    /// assert_eq!(map.get_or(&2, &"missing"), &"missing");
    /// ```
    #[must_use]
    pub fn get_or<'a, Q>(&'a self, key: &Q, default: &'a V) -> &'a V
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get(key).unwrap_or(default)
    }

    /// Returns `true` if the map contains a value for the specified key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let map = PersistentSortedMap::new().insert("key".to_string(), 42);
    ///
    /// assert!(map.contains_key("key"));
    /// assert!(!map.contains_key("other"));
    /// ```
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.find_entry(key).is_some()
    }

    /// Returns the entry with the minimum key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let map = PersistentSortedMap::new()
    ///     .insert(3, "three")
    ///     .insert(1, "one")
    ///     .insert(2, "two");
    ///
    /// assert_eq!(map.min(), Some((&1, &"one")));
    /// ```
    #[must_use]
    pub fn min(&self) -> Option<(&K, &V)> {
        let mut current = self.root.as_deref()?;
        while let Some(left) = current.left.as_deref() {
            current = left;
        }
        Some(current.entry.pair())
    }

    /// Returns the entry with the maximum key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let map = PersistentSortedMap::new()
    ///     .insert(3, "three")
    ///     .insert(1, "one")
    ///     .insert(5, "five");
    ///
    /// assert_eq!(map.max(), Some((&5, &"five")));
    /// ```
    #[must_use]
    pub fn max(&self) -> Option<(&K, &V)> {
        let mut current = self.root.as_deref()?;
        while let Some(right) = current.right.as_deref() {
            current = right;
        }
        Some(current.entry.pair())
    }
}

// =============================================================================
// Edit Operations
// =============================================================================

impl<K: Clone + Ord, V: Clone> PersistentSortedMap<K, V> {
    /// Creates a map containing a single key-value pair.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let map = PersistentSortedMap::singleton(42, "answer");
    /// assert_eq!(map.len(), 1);
    /// assert_eq!(map.get(&42), Some(&"answer"));
    /// ```
    #[inline]
    #[must_use]
    pub fn singleton(key: K, value: V) -> Self {
        Self::new().insert(key, value)
    }

    /// Creates a map from a sequence of key-value pairs.
    ///
    /// Pairs are inserted in order, so a later duplicate key overwrites
    /// an earlier one.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let map = PersistentSortedMap::from_pairs([("b", 1), ("a", 2), ("c", 3)]);
    /// let pairs: Vec<(&&str, &i32)> = map.iter().map(|entry| entry.pair()).collect();
    /// assert_eq!(pairs, vec![(&"a", &2), (&"b", &1), (&"c", &3)]);
    /// ```
    #[must_use]
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        pairs
            .into_iter()
            .fold(Self::new(), |map, (key, value)| map.insert(key, value))
    }

    /// Inserts a key-value pair into the map.
    ///
    /// If the map already contains the key, the value is replaced and
    /// the children of the occupying node are preserved.
    ///
    /// # Complexity
    ///
    /// O(h), allocating only the nodes on the path to the key.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let map1 = PersistentSortedMap::new().insert(1, "one");
    /// let map2 = map1.insert(1, "ONE");
    ///
    /// assert_eq!(map1.get(&1), Some(&"one")); // Original unchanged
    /// assert_eq!(map2.get(&1), Some(&"ONE")); // New version
    /// ```
    #[must_use]
    pub fn insert(&self, key: K, value: V) -> Self {
        let search = key.clone();
        let entry = Entry::new(key, value);
        let root = Self::change_key(self.root.as_ref(), &search, |occupant| {
            Some(ReferenceCounter::new(occupant.map_or_else(
                || Node::leaf(entry.clone()),
                |node| node.with_entry(entry.clone()),
            )))
        });
        Self { root }
    }

    /// Inserts a key-value pair only if the key is not already present.
    ///
    /// Unlike [`insert`](Self::insert), an existing key is an error: the
    /// map is left untouched (the `Err` carries the rejected key, and no
    /// new tree is built).
    ///
    /// # Errors
    ///
    /// Returns [`KeyExistsError`] when the key is already in the map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let map = PersistentSortedMap::new().insert("a", 1);
    ///
    /// let extended = map.insert_if_absent("b", 2).unwrap();
    /// assert_eq!(extended.len(), 2);
    ///
    /// let error = map.insert_if_absent("a", 99).unwrap_err();
    /// assert_eq!(error.key, "a");
    /// assert_eq!(map.get(&"a"), Some(&1)); // untouched
    /// ```
    pub fn insert_if_absent(&self, key: K, value: V) -> Result<Self, KeyExistsError<K>> {
        let search = key.clone();
        let entry = Entry::new(key, value);
        let mut occupied = false;
        let root = Self::change_key(self.root.as_ref(), &search, |occupant| match occupant {
            None => Some(ReferenceCounter::new(Node::leaf(entry.clone()))),
            Some(node) => {
                // Returning the occupant untouched makes the rebuild a
                // no-op, so the original root survives by identity.
                occupied = true;
                Some(ReferenceCounter::clone(node))
            }
        });
        if occupied {
            Err(KeyExistsError { key: entry.key })
        } else {
            Ok(Self { root })
        }
    }

    /// Removes a key from the map.
    ///
    /// Returns a new map without the key. Removing a key that is not
    /// present returns the original map unchanged (by pointer identity,
    /// not as a copy).
    ///
    /// When the removed node has two children, the entire right subtree
    /// is grafted into the left subtree at the position the right root's
    /// key would occupy. Every key under the right subtree is greater
    /// than every key under the left, so ordering is preserved, but the
    /// graft does not rebalance and repeated removals can skew the tree.
    ///
    /// # Complexity
    ///
    /// O(h)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arbors::PersistentSortedMap;
    ///
    /// let map = PersistentSortedMap::new()
    ///     .insert(1, "one")
    ///     .insert(2, "two");
    /// let removed = map.remove(&1);
    ///
    /// assert_eq!(map.len(), 2);     // Original unchanged
    /// assert_eq!(removed.len(), 1); // New version
    /// assert_eq!(removed.get(&1), None);
    /// ```
    #[must_use]
    pub fn remove<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let root = Self::change_key(self.root.as_ref(), key, |occupant| {
            occupant.and_then(Self::splice_out)
        });
        Self { root }
    }

    /// Removes a node's entry while reattaching its children.
    ///
    /// Two children is the interesting case: the whole right subtree is
    /// grafted into the left subtree at the leaf position its root key
    /// leads to. The edit closure ignores whatever it is handed and
    /// returns the right subtree unconditionally.
    fn splice_out(node: &ReferenceCounter<Node<K, V>>) -> Link<K, V> {
        match (&node.left, &node.right) {
            (None, None) => None,
            (Some(child), None) | (None, Some(child)) => Some(ReferenceCounter::clone(child)),
            (Some(left), Some(right)) => {
                Self::change_key(Some(left), &right.entry.key, |_| {
                    Some(ReferenceCounter::clone(right))
                })
            }
        }
    }

    /// The traversal/edit primitive every update funnels through.
    ///
    /// Locates the position `key` occupies (or would occupy) and applies
    /// `edit` there: the closure receives the occupying node, or `None`
    /// when the key is absent, and returns the link that should take the
    /// position. Only the path from the root to that position is
    /// rebuilt. If the edited link is pointer-identical to what was
    /// already there, the original root is returned as-is, so no-op
    /// edits allocate nothing.
    ///
    /// Iterative over an explicit path stack; call-stack use does not
    /// grow with tree height.
    fn change_key<'a, Q, F>(
        root: Option<&'a ReferenceCounter<Node<K, V>>>,
        key: &Q,
        mut edit: F,
    ) -> Link<K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
        F: FnMut(Option<&ReferenceCounter<Node<K, V>>>) -> Link<K, V>,
    {
        // Descent: record the path as (node, went_left) pairs until the
        // key's position is found.
        let mut path: Vec<(&'a ReferenceCounter<Node<K, V>>, bool)> = Vec::new();
        let mut current = root;
        let mut rebuilt = loop {
            match current {
                None => break edit(None),
                Some(node) => match key.cmp(node.entry.key.borrow()) {
                    Ordering::Equal => break edit(Some(node)),
                    Ordering::Less => {
                        path.push((node, true));
                        current = node.left.as_ref();
                    }
                    Ordering::Greater => {
                        path.push((node, false));
                        current = node.right.as_ref();
                    }
                },
            }
        };

        // Rebuild: walk the path back up, replacing one child per level.
        for (node, went_left) in path.into_iter().rev() {
            let previous = if went_left {
                node.left.as_ref()
            } else {
                node.right.as_ref()
            };
            if same_link(rebuilt.as_ref(), previous) {
                // The edit changed nothing below this node, so nothing
                // above it changes either.
                return root.cloned();
            }
            rebuilt = Some(ReferenceCounter::new(if went_left {
                node.with_left(rebuilt)
            } else {
                node.with_right(rebuilt)
            }));
        }
        rebuilt
    }
}

// =============================================================================
// Iterator Implementation
// =============================================================================

/// A lazy in-order iterator over the entries of a [`PersistentSortedMap`].
///
/// Produced by [`PersistentSortedMap::iter`]; yields entries in ascending
/// key order. Holds an explicit stack of the current left spine, so
/// iteration never recurses.
pub struct PersistentSortedMapIterator<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
}

impl<'a, K, V> PersistentSortedMapIterator<'a, K, V> {
    fn push_left_spine(&mut self, mut link: Option<&'a Node<K, V>>) {
        while let Some(node) = link {
            self.stack.push(node);
            link = node.left.as_deref();
        }
    }
}

impl<'a, K, V> Iterator for PersistentSortedMapIterator<'a, K, V> {
    type Item = &'a Entry<K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left_spine(node.right.as_deref());
        Some(&node.entry)
    }
}

impl<K, V> std::iter::FusedIterator for PersistentSortedMapIterator<'_, K, V> {}

/// An owning iterator over the key-value pairs of a [`PersistentSortedMap`].
///
/// Entries are collected up front in key order and drained; nodes may be
/// shared with other map versions, so pairs are cloned out.
pub struct PersistentSortedMapIntoIterator<K, V> {
    entries: std::vec::IntoIter<(K, V)>,
}

impl<K, V> Iterator for PersistentSortedMapIntoIterator<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<K, V> ExactSizeIterator for PersistentSortedMapIntoIterator<K, V> {
    fn len(&self) -> usize {
        self.entries.len()
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<K, V> Default for PersistentSortedMap<K, V> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Ord, V: Clone> FromIterator<(K, V)> for PersistentSortedMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

impl<K: Clone, V: Clone> IntoIterator for PersistentSortedMap<K, V> {
    type Item = (K, V);
    type IntoIter = PersistentSortedMapIntoIterator<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        let entries: Vec<(K, V)> = self
            .iter()
            .map(|entry| (entry.key.clone(), entry.value.clone()))
            .collect();
        PersistentSortedMapIntoIterator {
            entries: entries.into_iter(),
        }
    }
}

impl<'a, K, V> IntoIterator for &'a PersistentSortedMap<K, V> {
    type Item = &'a Entry<K, V>;
    type IntoIter = PersistentSortedMapIterator<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Two maps are equal when they share the same root, or when their
/// in-order sequences are element-wise equal. Maps with different tree
/// shapes but the same entries compare equal.
impl<K: PartialEq, V: PartialEq> PartialEq for PersistentSortedMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.iter().eq(other.iter())
    }
}

impl<K: Eq, V: Eq> Eq for PersistentSortedMap<K, V> {}

/// Hashes each entry in key order. Equal maps produce equal hashes even
/// when their tree shapes differ, keeping Hash consistent with Eq.
impl<K: Hash, V: Hash> Hash for PersistentSortedMap<K, V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for entry in self {
            entry.key.hash(state);
            entry.value.hash(state);
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for PersistentSortedMap<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_map()
            .entries(self.iter().map(Entry::pair))
            .finish()
    }
}

impl<K: fmt::Display, V: fmt::Display> fmt::Display for PersistentSortedMap<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{{")?;
        let mut first = true;
        for entry in self {
            if first {
                first = false;
            } else {
                write!(formatter, ", ")?;
            }
            write!(formatter, "{}: {}", entry.key, entry.value)?;
        }
        write!(formatter, "}}")
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<K, V> serde::Serialize for PersistentSortedMap<K, V>
where
    K: serde::Serialize,
    V: serde::Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for entry in self {
            map.serialize_entry(entry.key(), entry.value())?;
        }
        map.end()
    }
}

#[cfg(feature = "serde")]
struct PersistentSortedMapVisitor<K, V> {
    key_marker: std::marker::PhantomData<K>,
    value_marker: std::marker::PhantomData<V>,
}

#[cfg(feature = "serde")]
impl<K, V> PersistentSortedMapVisitor<K, V> {
    const fn new() -> Self {
        Self {
            key_marker: std::marker::PhantomData,
            value_marker: std::marker::PhantomData,
        }
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::de::Visitor<'de> for PersistentSortedMapVisitor<K, V>
where
    K: serde::Deserialize<'de> + Clone + Ord,
    V: serde::Deserialize<'de> + Clone,
{
    type Value = PersistentSortedMap<K, V>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a map")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let mut map = PersistentSortedMap::new();
        while let Some((key, value)) = access.next_entry()? {
            map = map.insert(key, value);
        }
        Ok(map)
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::Deserialize<'de> for PersistentSortedMap<K, V>
where
    K: serde::Deserialize<'de> + Clone + Ord,
    V: serde::Deserialize<'de> + Clone,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(PersistentSortedMapVisitor::new())
    }
}

// =============================================================================
// Tests
// =============================================================================
