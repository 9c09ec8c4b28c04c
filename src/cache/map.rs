//! Hybrid cache/stash map with transactional scopes.
//!
//! A [`CacheMap`] layers a set-associative cache over two hash-map stash
//! generations. Values displaced from the cache drop into generation 1 and
//! survive there until the second following compaction, so prefetched data
//! outlives the write batch that displaced it. Lookup precedence is
//! cache, then generation 1, then generation 2; a stale copy in a lower
//! level is harmless because the correct value always exists above it.
//!
//! A scope captures the first-touch prior state of every mutated key, so
//! the whole batch of mutations can be reverted on `discard` or made
//! permanent (by simply dropping the log) on `persist`.

use std::collections::HashMap;

use super::set_associative::{Eviction, SetAssociativeCache};
use super::CacheEntry;

/// Fixed capacities of a [`CacheMap`], set at construction.
#[derive(Clone, Copy, Debug)]
pub struct CacheMapOptions {
    /// Capacity of the set-associative cache, in values.
    pub cache_value_count_max: usize,
    /// Capacity of each stash generation, in values.
    pub stash_value_count_max: usize,
    /// Upper bound on distinct keys mutated within one scope.
    pub scope_value_count_max: usize,
}

/// How to end a scope.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScopeCloseMode {
    /// Keep every mutation made inside the scope.
    Persist,
    /// Revert every mutation made inside the scope.
    Discard,
}

/// Two-tier object cache with scoped undo.
pub struct CacheMap<V: CacheEntry> {
    cache: SetAssociativeCache<V>,
    stash_1: HashMap<V::Key, V>,
    stash_2: HashMap<V::Key, V>,
    scope: Option<HashMap<V::Key, V>>,
    stash_value_count_max: usize,
    scope_value_count_max: usize,
}

impl<V: CacheEntry> CacheMap<V> {
    /// Create a map with the given fixed capacities.
    pub fn new(options: CacheMapOptions) -> Self {
        assert!(options.stash_value_count_max > 0);
        assert!(options.scope_value_count_max > 0);
        Self {
            cache: SetAssociativeCache::new(options.cache_value_count_max),
            stash_1: HashMap::with_capacity(options.stash_value_count_max),
            stash_2: HashMap::with_capacity(options.stash_value_count_max),
            scope: None,
            stash_value_count_max: options.stash_value_count_max,
            scope_value_count_max: options.scope_value_count_max,
        }
    }

    /// Look up `key`: cache first, then generation 1, then generation 2.
    pub fn get(&self, key: V::Key) -> Option<&V> {
        self.cache
            .get(key)
            .or_else(|| self.stash_1.get(&key))
            .or_else(|| self.stash_2.get(&key))
    }

    /// Whether `key` exists in any level. Tombstoned values count.
    pub fn has(&self, key: V::Key) -> bool {
        self.get(key).is_some()
    }

    /// Insert or update `value` under its derived key.
    pub fn upsert(&mut self, value: V) {
        let key = value.key();
        match self.cache.upsert(value) {
            Some(Eviction {
                value: old,
                updated: true,
            }) => {
                // Prior version of the same key: that is the undo state.
                self.scope_record(key, old);
            }
            Some(Eviction {
                value: displaced,
                updated: false,
            }) => {
                let displaced_key = displaced.key();
                self.scope_record_prior(key);
                self.scope_record(displaced_key, displaced.clone());
                self.stash_insert(displaced);
            }
            None => {
                self.scope_record_prior(key);
            }
        }
    }

    /// Delete `key` from every level.
    pub fn remove(&mut self, key: V::Key) {
        let removed = self.cache.remove(key);
        if self.scope.is_some() {
            let prior = removed
                .clone()
                .or_else(|| self.stash_get(key).cloned());
            if let Some(prior) = prior {
                self.scope_record(key, prior);
            }
        }
        self.stash_1.remove(&key);
        self.stash_2.remove(&key);
    }

    /// Begin a scope. At most one may be open.
    pub fn scope_open(&mut self) {
        assert!(self.scope.is_none(), "scope already open");
        self.scope = Some(HashMap::with_capacity(self.scope_value_count_max));
    }

    /// End the open scope, persisting or reverting its mutations.
    pub fn scope_close(&mut self, mode: ScopeCloseMode) {
        let scope = self.scope.take().expect("no scope open");
        match mode {
            ScopeCloseMode::Persist => drop(scope),
            ScopeCloseMode::Discard => {
                // The scope is already detached, so these upserts record
                // nothing and cannot recurse into the undo log.
                for (key, undo) in scope {
                    if undo.is_tombstone() {
                        self.cache.remove(key);
                        self.stash_1.remove(&key);
                    } else {
                        self.upsert(undo);
                    }
                }
            }
        }
    }

    /// Whether a scope is currently open.
    pub fn scope_is_open(&self) -> bool {
        self.scope.is_some()
    }

    /// Drop generation 2 and demote generation 1 into its place.
    ///
    /// This is the cache-invalidation step between write batches.
    pub fn compact(&mut self) {
        assert!(self.scope.is_none(), "compact with a scope open");
        self.stash_2.clear();
        std::mem::swap(&mut self.stash_1, &mut self.stash_2);
    }

    /// Number of values resident in the cache tier.
    pub fn cache_count(&self) -> usize {
        self.cache.count()
    }

    /// Number of values in each stash generation.
    pub fn stash_counts(&self) -> (usize, usize) {
        (self.stash_1.len(), self.stash_2.len())
    }

    fn stash_get(&self, key: V::Key) -> Option<&V> {
        self.stash_1.get(&key).or_else(|| self.stash_2.get(&key))
    }

    fn stash_insert(&mut self, value: V) {
        let key = value.key();
        if !self.stash_1.contains_key(&key) {
            assert!(
                self.stash_1.len() < self.stash_value_count_max,
                "stash generation overflow"
            );
        }
        self.stash_1.insert(key, value);
    }

    /// Record the undo state for a key that was *inserted* (not updated):
    /// its stash copy if one exists, else a tombstone so the revert removes
    /// the insertion.
    fn scope_record_prior(&mut self, key: V::Key) {
        if self.scope.is_none() {
            return;
        }
        let undo = self
            .stash_get(key)
            .cloned()
            .unwrap_or_else(|| V::tombstone_from_key(key));
        self.scope_record(key, undo);
    }

    /// First write wins: only the state before the scope opened is undo
    /// state.
    fn scope_record(&mut self, key: V::Key, undo: V) {
        let Some(scope) = self.scope.as_mut() else {
            return;
        };
        if !scope.contains_key(&key) {
            assert!(
                scope.len() < self.scope_value_count_max,
                "scope undo log overflow"
            );
            scope.insert(key, undo);
        }
    }
}
