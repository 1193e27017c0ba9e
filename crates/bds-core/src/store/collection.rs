// ── Generic reactive entity collection ──
//
// Concurrent keyed storage with push-based change notification via
// `watch` channels.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::stream::EntityStream;

/// A reactive collection for a single entity type.
///
/// Uses `DashMap` for concurrent lookups and a `watch` channel for
/// push-based change notification. Every mutation bumps a version
/// counter and rebuilds the snapshot subscribers receive. Snapshots are
/// ordered by key.
pub struct EntityCollection<T: Clone + Send + Sync + 'static> {
    /// Primary storage: backend key (e.g. `"SOC.Channel|c1"`) -> entity.
    by_key: DashMap<String, Arc<T>>,

    /// Version counter, bumped on every mutation.
    version: watch::Sender<u64>,

    /// Full snapshot, rebuilt on mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> Default for EntityCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> EntityCollection<T> {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        Self {
            by_key: DashMap::new(),
            version,
            snapshot,
        }
    }

    /// Insert or replace an entity. Returns `true` if the key was new.
    pub fn upsert(&self, key: impl Into<String>, entity: T) -> bool {
        let is_new = self.by_key.insert(key.into(), Arc::new(entity)).is_none();
        self.publish();
        is_new
    }

    /// Apply `f` to a copy of the entity under `key` and store the result.
    /// Returns `false` when the key is absent.
    pub fn modify(&self, key: &str, f: impl FnOnce(&mut T)) -> bool {
        let Some(mut entry) = self.by_key.get_mut(key) else {
            return false;
        };
        let mut updated = T::clone(entry.value());
        f(&mut updated);
        *entry.value_mut() = Arc::new(updated);
        drop(entry);
        self.publish();
        true
    }

    /// Remove an entity by key. Returns the removed entity if it existed.
    pub fn remove(&self, key: &str) -> Option<Arc<T>> {
        let removed = self.by_key.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> EntityStream<T> {
        EntityStream::new(self.snapshot.subscribe())
    }

    /// Number of mutations applied so far.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Remove all entities.
    pub fn clear(&self) {
        if self.by_key.is_empty() {
            return;
        }
        self.by_key.clear();
        self.publish();
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// All current keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.by_key.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        keys
    }

    // ── Private helpers ──────────────────────────────────────────────

    /// Rebuild the snapshot and broadcast it. The rebuild runs inside
    /// `send_modify`, so concurrent publishers cannot leave a stale one.
    fn publish(&self) {
        self.snapshot.send_modify(|snap| {
            let mut entries: Vec<(String, Arc<T>)> = self
                .by_key
                .iter()
                .map(|r| (r.key().clone(), Arc::clone(r.value())))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            *snap = Arc::new(entries.into_iter().map(|(_, v)| v).collect());
        });
        self.version.send_modify(|v| *v += 1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn upsert_reports_new_keys() {
        let col: EntityCollection<String> = EntityCollection::new();
        assert!(col.upsert("key1", "hello".into()));
        assert!(!col.upsert("key1", "world".into()));
        assert_eq!(*col.get("key1").unwrap(), "world");
        assert_eq!(col.version(), 2);
    }

    #[test]
    fn snapshot_is_ordered_by_key() {
        let col: EntityCollection<String> = EntityCollection::new();
        col.upsert("b", "y".into());
        col.upsert("a", "x".into());
        col.upsert("c", "z".into());

        let snap = col.snapshot();
        let values: Vec<&str> = snap.iter().map(|v| v.as_str()).collect();
        assert_eq!(values, ["x", "y", "z"]);
        assert_eq!(col.keys(), ["a", "b", "c"]);
    }

    #[test]
    fn modify_replaces_the_stored_value() {
        let col: EntityCollection<Vec<u8>> = EntityCollection::new();
        col.upsert("k", vec![1]);
        let before = col.get("k").unwrap();

        assert!(col.modify("k", |v| v.push(2)));
        assert!(!col.modify("missing", |v| v.push(3)));

        assert_eq!(*before, vec![1]);
        assert_eq!(*col.get("k").unwrap(), vec![1, 2]);
    }

    #[test]
    fn remove_and_clear() {
        let col: EntityCollection<String> = EntityCollection::new();
        col.upsert("a", "x".into());
        col.upsert("b", "y".into());

        assert_eq!(*col.remove("a").unwrap(), "x");
        assert!(col.remove("a").is_none());
        assert_eq!(col.len(), 1);

        col.clear();
        assert!(col.is_empty());
        assert!(col.snapshot().is_empty());
    }

    #[tokio::test]
    async fn subscribers_see_mutations() {
        let col: EntityCollection<String> = EntityCollection::new();
        let mut stream = col.subscribe();
        assert!(stream.snapshot().is_empty());

        col.upsert("a", "x".into());
        let snap = stream.changed().await.unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(stream.snapshot().len(), 1);
    }
}
