//! Bounded in-memory blob store with least-recently-used eviction.
//!
//! Both cache tiers (serialized responses and proxied assets) are instances
//! of this store. All access goes through a single mutex held only for the
//! duration of the map operation; eviction is silent.

use std::num::NonZeroUsize;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

/// Thread-safe `key -> blob` map with a fixed capacity.
pub struct BlobStore {
  inner: Mutex<LruCache<String, Bytes>>,
}

impl BlobStore {
  /// Creates a store holding at most `capacity` entries. A zero capacity is
  /// clamped to one.
  pub fn new(capacity: usize) -> Self {
    let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
    Self {
      inner: Mutex::new(LruCache::new(capacity)),
    }
  }

  /// Returns the blob stored under `key`, marking it most recently used.
  /// A miss does not mutate the store.
  pub fn get(&self, key: &str) -> Option<Bytes> {
    self.inner.lock().get(key).cloned()
  }

  /// Inserts or refreshes `key`. When the store is at capacity the least
  /// recently used entry is evicted.
  pub fn put(&self, key: impl Into<String>, blob: Bytes) {
    self.inner.lock().put(key.into(), blob);
  }

  pub fn len(&self) -> usize {
    self.inner.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.lock().is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn blob(text: &str) -> Bytes {
    Bytes::copy_from_slice(text.as_bytes())
  }

  #[test]
  fn get_returns_inserted_blob() {
    let store = BlobStore::new(4);
    store.put("k1", blob("v1"));
    assert_eq!(store.get("k1"), Some(blob("v1")));
    assert_eq!(store.get("missing"), None);
  }

  #[test]
  fn put_overwrites_existing_key() {
    let store = BlobStore::new(4);
    store.put("k1", blob("old"));
    store.put("k1", blob("new"));
    assert_eq!(store.get("k1"), Some(blob("new")));
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn never_exceeds_capacity() {
    let store = BlobStore::new(4);
    for i in 0..32 {
      store.put(format!("k{i}"), blob("v"));
    }
    assert_eq!(store.len(), 4);
  }

  #[test]
  fn evicts_least_recently_used_entry() {
    let store = BlobStore::new(4);
    for i in 1..=5 {
      store.put(format!("k{i}"), blob("v"));
    }
    assert_eq!(store.get("k1"), None);
    for i in 2..=5 {
      assert!(store.get(&format!("k{i}")).is_some(), "k{i} should survive");
    }
  }

  #[test]
  fn get_refreshes_recency() {
    let store = BlobStore::new(2);
    store.put("k1", blob("v"));
    store.put("k2", blob("v"));
    store.get("k1");
    store.put("k3", blob("v"));
    assert!(store.get("k1").is_some());
    assert_eq!(store.get("k2"), None);
  }
}
