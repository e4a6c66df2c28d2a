use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;

/// Per-key "busy" registry: a key is locked exactly while it has an entry.
///
/// Acquisition never waits. A second acquire on a held key returns `None`,
/// which callers treat as a dropped request rather than an error.
pub struct PendingMap<K, V> {
    entries: Mutex<HashMap<K, V>>,
}

impl<K, V> Default for PendingMap<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> PendingMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, key: K, value: V) -> Option<PendingGuard<'_, K, V>> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&key) {
            return None;
        }
        entries.insert(key.clone(), value);
        Some(PendingGuard {
            map: self,
            key: Some(key),
        })
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().remove(key)
    }
}

/// Holds one key of a [`PendingMap`]; the key is released on drop.
pub struct PendingGuard<'a, K, V>
where
    K: Eq + Hash + Clone,
{
    map: &'a PendingMap<K, V>,
    key: Option<K>,
}

impl<K, V> PendingGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    /// Releases the key and hands back the value stored with it.
    pub fn release(mut self) -> Option<V> {
        self.key.take().and_then(|key| self.map.remove(&key))
    }
}

impl<K, V> Drop for PendingGuard<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.map.remove(&key);
        }
    }
}
