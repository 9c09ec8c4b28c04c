//! N-way set-associative cache.
//!
//! Values hash to a set of [`WAYS`] slots; within a set, lookup is a linear
//! scan. A full set evicts the slot under the per-set clock cursor. The
//! cache never acts on an eviction itself: `upsert` hands the displaced
//! value back to the owner, who decides whether it moves to a stash, an
//! undo log, or nowhere.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::CacheEntry;

/// Associativity of the cache.
pub const WAYS: usize = 8;

/// A value displaced by an insertion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Eviction<V> {
    /// The value that lost its slot.
    pub value: V,
    /// True if the inserted key matched this value's key (an update);
    /// false if a different key was displaced for capacity.
    pub updated: bool,
}

/// Set-associative cache with fixed capacity.
pub struct SetAssociativeCache<V: CacheEntry> {
    slots: Vec<Option<V>>,
    clocks: Vec<u8>,
    set_count: usize,
    count: usize,
}

impl<V: CacheEntry> SetAssociativeCache<V> {
    /// Create a cache holding up to `value_count_max` values.
    ///
    /// The capacity must be a multiple of [`WAYS`] with a power-of-two set
    /// count.
    pub fn new(value_count_max: usize) -> Self {
        assert!(value_count_max > 0);
        assert!(value_count_max % WAYS == 0);
        let set_count = value_count_max / WAYS;
        assert!(set_count.is_power_of_two());

        Self {
            slots: vec![None; value_count_max],
            clocks: vec![0; set_count],
            set_count,
            count: 0,
        }
    }

    fn set_of(&self, key: &V::Key) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (self.set_count - 1)
    }

    fn set_base(&self, key: &V::Key) -> usize {
        self.set_of(key) * WAYS
    }

    /// Look up a value by key.
    pub fn get(&self, key: V::Key) -> Option<&V> {
        let base = self.set_base(&key);
        self.slots[base..base + WAYS]
            .iter()
            .flatten()
            .find(|value| value.key() == key)
    }

    /// Look up a value by key, mutably.
    pub fn get_mut(&mut self, key: V::Key) -> Option<&mut V> {
        let base = self.set_base(&key);
        self.slots[base..base + WAYS]
            .iter_mut()
            .flatten()
            .find(|value| value.key() == key)
    }

    /// Insert or update `value`, returning whatever it displaced.
    ///
    /// - `Some(Eviction { updated: true, .. })`: the key was present; the
    ///   returned value is its previous version.
    /// - `Some(Eviction { updated: false, .. })`: the set was full; the
    ///   returned value belongs to a different key.
    /// - `None`: the value took a free slot.
    pub fn upsert(&mut self, value: V) -> Option<Eviction<V>> {
        let key = value.key();
        let set = self.set_of(&key);
        let base = set * WAYS;

        for way in 0..WAYS {
            let slot = &mut self.slots[base + way];
            if slot.as_ref().is_some_and(|existing| existing.key() == key) {
                let old = slot.replace(value).unwrap();
                return Some(Eviction {
                    value: old,
                    updated: true,
                });
            }
        }

        for way in 0..WAYS {
            let slot = &mut self.slots[base + way];
            if slot.is_none() {
                *slot = Some(value);
                self.count += 1;
                return None;
            }
        }

        let way = self.clocks[set] as usize;
        self.clocks[set] = ((way + 1) % WAYS) as u8;
        let old = self.slots[base + way].replace(value).unwrap();
        Some(Eviction {
            value: old,
            updated: false,
        })
    }

    /// Remove and return the value stored under `key`.
    pub fn remove(&mut self, key: V::Key) -> Option<V> {
        let base = self.set_base(&key);
        for way in 0..WAYS {
            let slot = &mut self.slots[base + way];
            if slot.as_ref().is_some_and(|existing| existing.key() == key) {
                self.count -= 1;
                return slot.take();
            }
        }
        None
    }

    /// Number of values resident in the cache.
    pub fn count(&self) -> usize {
        self.count
    }

    /// The fixed capacity in values.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Key in the low half, payload version in the high half.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    struct Item(u128);

    impl Item {
        fn new(key: u64, version: u64) -> Self {
            Self(((version as u128) << 64) | key as u128)
        }
    }

    impl CacheEntry for Item {
        type Key = u64;

        fn key(&self) -> u64 {
            self.0 as u64
        }

        fn tombstone_from_key(key: u64) -> Self {
            Self((u64::MAX as u128) << 64 | key as u128)
        }

        fn is_tombstone(&self) -> bool {
            (self.0 >> 64) as u64 == u64::MAX
        }
    }

    #[test]
    fn test_insert_and_get() {
        let mut cache = SetAssociativeCache::new(64);
        assert!(cache.upsert(Item::new(1, 0)).is_none());
        assert_eq!(cache.get(1), Some(&Item::new(1, 0)));
        assert_eq!(cache.get(2), None);
        assert_eq!(cache.count(), 1);
    }

    #[test]
    fn test_update_reports_old_version() {
        let mut cache = SetAssociativeCache::new(64);
        cache.upsert(Item::new(1, 0));
        let eviction = cache.upsert(Item::new(1, 1)).unwrap();
        assert!(eviction.updated);
        assert_eq!(eviction.value, Item::new(1, 0));
        assert_eq!(cache.get(1), Some(&Item::new(1, 1)));
        assert_eq!(cache.count(), 1);
    }

    #[test]
    fn test_capacity_eviction_displaces_other_key() {
        // One set total: the 9th insert must displace one of the first 8.
        let mut cache = SetAssociativeCache::new(WAYS);
        for key in 0..WAYS as u64 {
            assert!(cache.upsert(Item::new(key, 0)).is_none());
        }
        let eviction = cache.upsert(Item::new(99, 0)).unwrap();
        assert!(!eviction.updated);
        assert_ne!(eviction.value.key(), 99);
        assert_eq!(cache.count(), WAYS);
        assert_eq!(cache.get(99), Some(&Item::new(99, 0)));
        assert_eq!(cache.get(eviction.value.key()), None);
    }

    #[test]
    fn test_clock_rotates_victims() {
        let mut cache = SetAssociativeCache::new(WAYS);
        for key in 0..WAYS as u64 {
            cache.upsert(Item::new(key, 0));
        }
        let first = cache.upsert(Item::new(100, 0)).unwrap();
        let second = cache.upsert(Item::new(101, 0)).unwrap();
        assert_ne!(first.value.key(), second.value.key());
    }

    #[test]
    fn test_remove() {
        let mut cache = SetAssociativeCache::new(64);
        cache.upsert(Item::new(5, 3));
        assert_eq!(cache.remove(5), Some(Item::new(5, 3)));
        assert_eq!(cache.remove(5), None);
        assert_eq!(cache.get(5), None);
        assert_eq!(cache.count(), 0);
    }

    #[test]
    fn test_get_mut() {
        let mut cache = SetAssociativeCache::new(64);
        cache.upsert(Item::new(5, 0));
        *cache.get_mut(5).unwrap() = Item::new(5, 9);
        assert_eq!(cache.get(5), Some(&Item::new(5, 9)));
    }

    #[test]
    #[should_panic]
    fn test_capacity_must_be_multiple_of_ways() {
        let _cache: SetAssociativeCache<Item> = SetAssociativeCache::new(WAYS + 1);
    }
}
