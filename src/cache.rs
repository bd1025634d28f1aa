use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// A bounded least-recently-used cache.
///
/// Backs three independent concerns: open pack readers, loaded index
/// readers, and decoded block values. Values are cloned out on `get`, so
/// shared handles should be stored as `Arc`s; evicting an `Arc` closes the
/// underlying file only once the last in-flight user drops it.
///
/// The cache itself is not synchronized; callers wrap it in a `Mutex`, which
/// keeps inserts safe even while the owning registry is only read-locked.
pub struct Cache<K, V> {
    capacity: usize,
    entries: HashMap<K, (V, u64)>,
    /// Recency order: tick of last use -> key. Ticks are unique, so the
    /// first entry is always the least recently used.
    recency: BTreeMap<u64, K>,
    tick: u64,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache holding at most `capacity` entries. A capacity of
    /// zero is treated as one; the cache must be able to hold the entry it
    /// was just asked to admit.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
        }
    }

    /// Returns a clone of the cached value and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let tick = self.next_tick();
        let (value, last_used) = self.entries.get_mut(key)?;
        self.recency.remove(last_used);
        self.recency.insert(tick, key.clone());
        *last_used = tick;
        Some(value.clone())
    }

    /// Membership test without touching recency.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts a value, evicting the least recently used entry if the cache
    /// is full. Re-inserting an existing key replaces its value.
    pub fn add(&mut self, key: K, value: V) {
        let tick = self.next_tick();
        if let Some((_, last_used)) = self.entries.remove(&key) {
            self.recency.remove(&last_used);
        } else if self.entries.len() >= self.capacity {
            self.evict();
        }
        self.recency.insert(tick, key.clone());
        self.entries.insert(key, (value, tick));
    }

    /// Removes and returns the value for `key`, if present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (value, last_used) = self.entries.remove(key)?;
        self.recency.remove(&last_used);
        Some(value)
    }

    /// Drops every entry.
    pub fn purge(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&mut self) {
        if let Some((_, key)) = self.recency.pop_first() {
            self.entries.remove(&key);
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}
