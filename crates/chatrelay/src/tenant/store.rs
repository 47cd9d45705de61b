//! Keyed state storage with per-key atomic updates.

use dashmap::DashMap;

/// A concurrent key-value store.
///
/// Every mutation of a single key happens under that key's lock, so readers
/// see either the old or the new value. Implementations must not serialize
/// unrelated keys behind one global lock.
///
/// Closures passed to [`update`](KeyedStore::update) and
/// [`retain`](KeyedStore::retain) run under the lock and must not call back
/// into the same store.
pub trait KeyedStore<V>: Send + Sync {
    /// Clone the current value for `key`.
    fn get(&self, key: &str) -> Option<V>;

    /// Create the entry with `init` if absent, then mutate it in place.
    fn update(&self, key: &str, init: &dyn Fn() -> V, apply: &mut dyn FnMut(&mut V));

    /// Remove the entry, returning the previous value.
    fn remove(&self, key: &str) -> Option<V>;

    /// Keep only the entries for which `keep` returns true.
    fn retain(&self, keep: &mut dyn FnMut(&str, &V) -> bool);

    /// Snapshot of the current keys, in no particular order.
    fn keys(&self) -> Vec<String>;
}

/// [`KeyedStore`] backed by a sharded [`DashMap`].
#[derive(Debug)]
pub struct DashMapStore<V> {
    map: DashMap<String, V>,
}

impl<V> DashMapStore<V> {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<V> Default for DashMapStore<V> {
    fn default() -> Self {
        Self {
            map: DashMap::new(),
        }
    }
}

impl<V> KeyedStore<V> for DashMapStore<V>
where
    V: Clone + Send + Sync,
{
    fn get(&self, key: &str) -> Option<V> {
        self.map.get(key).map(|entry| entry.value().clone())
    }

    fn update(&self, key: &str, init: &dyn Fn() -> V, apply: &mut dyn FnMut(&mut V)) {
        // The RefMut holds the shard lock until it is dropped at the end of scope.
        let mut entry = self.map.entry(key.to_string()).or_insert_with(init);
        apply(entry.value_mut());
    }

    fn remove(&self, key: &str) -> Option<V> {
        self.map.remove(key).map(|(_, value)| value)
    }

    fn retain(&self, keep: &mut dyn FnMut(&str, &V) -> bool) {
        self.map.retain(|key, value| keep(key, value));
    }

    fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }
}
