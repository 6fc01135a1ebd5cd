//! Striped-lock hash container shared by the answer cache and the
//! per-worker correlation table. Key equality, the lookup visitor and the
//! expiry predicate come from the `TableEntry` trait; the two users plug in
//! their own entry types.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::RwLock;

use crate::constants::FWD_LOCK_SIZE;

pub trait TableEntry {
    type Key: Hash + Eq + Clone;

    fn key(&self) -> Self::Key;

    /// Expiry predicate for `sweep`. The unit of `now` is whatever the
    /// embedding table uses (epoch seconds for the cache, monotonic
    /// microseconds for the correlation table).
    fn expired(&self, now: u64) -> bool;
}

pub struct StripedMap<E: TableEntry> {
    stripes: Vec<RwLock<HashMap<E::Key, E>>>,
}

impl<E: TableEntry> StripedMap<E> {
    pub fn new() -> Self {
        Self::with_stripes(FWD_LOCK_SIZE)
    }

    pub fn with_stripes(n: usize) -> Self {
        assert!(n > 0);
        Self {
            stripes: (0..n).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn stripe_of(&self, key: &E::Key) -> &RwLock<HashMap<E::Key, E>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % self.stripes.len()]
    }

    /// Install `entry`, replacing any live entry under the same key. The
    /// stripe lock is released only after the write is visible, so a
    /// same-key lookup that starts afterwards observes the new value.
    pub fn insert(&self, entry: E) -> Option<E> {
        let key = entry.key();
        self.stripe_of(&key).write().insert(key, entry)
    }

    /// Visit the entry under `key` while holding the stripe read lock.
    pub fn get<R>(&self, key: &E::Key, visit: impl FnOnce(&E) -> R) -> Option<R> {
        self.stripe_of(key).read().get(key).map(visit)
    }

    pub fn contains(&self, key: &E::Key) -> bool {
        self.stripe_of(key).read().contains_key(key)
    }

    pub fn remove(&self, key: &E::Key) -> Option<E> {
        self.stripe_of(key).write().remove(key)
    }

    /// Remove every expired entry, handing each to `on_expired`. Stripes are
    /// swept one at a time; lookups on other stripes proceed concurrently.
    pub fn sweep(&self, now: u64, mut on_expired: impl FnMut(E)) -> usize {
        let mut removed = 0;
        for stripe in &self.stripes {
            let mut map = stripe.write();
            let keys: Vec<E::Key> = map
                .iter()
                .filter(|(_, e)| e.expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in keys {
                if let Some(entry) = map.remove(&key) {
                    removed += 1;
                    on_expired(entry);
                }
            }
        }
        removed
    }

    /// Drop everything. Each stripe empties atomically with respect to
    /// lookups on that stripe: a concurrent reader sees either the old
    /// population or nothing, never a torn state.
    pub fn clear(&self) {
        for stripe in &self.stripes {
            stripe.write().clear();
        }
    }

    pub fn for_each(&self, mut visit: impl FnMut(&E)) {
        for stripe in &self.stripes {
            for entry in stripe.read().values() {
                visit(entry);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.stripes.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.stripes.iter().all(|s| s.read().is_empty())
    }
}

impl<E: TableEntry> Default for StripedMap<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        name: String,
        deadline: u64,
    }

    impl TableEntry for Probe {
        type Key = String;

        fn key(&self) -> String {
            self.name.clone()
        }

        fn expired(&self, now: u64) -> bool {
            self.deadline < now
        }
    }

    fn probe(name: &str, deadline: u64) -> Probe {
        Probe {
            name: name.to_string(),
            deadline,
        }
    }

    #[test]
    fn insert_replaces() {
        let map: StripedMap<Probe> = StripedMap::new();
        assert!(map.insert(probe("a", 1)).is_none());
        let old = map.insert(probe("a", 2)).unwrap();
        assert_eq!(old.deadline, 1);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&"a".to_string(), |e| e.deadline), Some(2));
    }

    #[test]
    fn sweep_removes_only_expired() {
        let map: StripedMap<Probe> = StripedMap::new();
        for i in 0..100 {
            map.insert(probe(&format!("n{i}"), i));
        }
        let mut seen = Vec::new();
        let removed = map.sweep(50, |e| seen.push(e.deadline));
        assert_eq!(removed, 50);
        assert_eq!(map.len(), 50);
        assert!(seen.iter().all(|&d| d < 50));
    }

    #[test]
    fn clear_empties_all_stripes() {
        let map: StripedMap<Probe> = StripedMap::new();
        for i in 0..64 {
            map.insert(probe(&format!("n{i}"), i));
        }
        map.clear();
        assert!(map.is_empty());
        assert!(!map.contains(&"n3".to_string()));
    }

    #[test]
    fn for_each_sees_everything() {
        let map: StripedMap<Probe> = StripedMap::new();
        for i in 0..32 {
            map.insert(probe(&format!("n{i}"), i));
        }
        let mut count = 0;
        map.for_each(|_| count += 1);
        assert_eq!(count, 32);
    }
}
