//! In-memory hot path of the storage engine.
//!
//! The write/prefetch pipeline keeps its working set in a [`CacheMap`]: a
//! set-associative cache backed by two hash-map stash generations, mutated
//! atomically within scopes. Completed write batches drain into
//! [`TableMemory`] runs headed for the LSM.

pub mod index;
pub mod map;
pub mod set_associative;
pub mod table;

pub use index::{IndexField, IndexRegistry, IndexValue};
pub use map::{CacheMap, CacheMapOptions, ScopeCloseMode};
pub use set_associative::{Eviction, SetAssociativeCache};
pub use table::{TableMemory, TableState};

use std::fmt::Debug;
use std::hash::Hash;

/// A value storable in the cache layer.
///
/// The key is derived from the value by a pure function, and every key has a
/// distinguished tombstone representation carrying the key but no payload.
/// The cache layer uses tombstones to mark deletes in scope undo logs.
pub trait CacheEntry: Clone {
    /// The derived key type.
    type Key: Copy + Ord + Hash + Debug;

    /// Derive this value's key.
    fn key(&self) -> Self::Key;

    /// Construct the tombstone for `key`.
    fn tombstone_from_key(key: Self::Key) -> Self;

    /// Whether this value is a tombstone.
    fn is_tombstone(&self) -> bool;
}
