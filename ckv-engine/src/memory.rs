//! # In-Memory Store
//!
//! A single hash map guarded by a reader/writer lock.
//!
//! ## Concurrency
//!
//! - `get` takes the shared lock, so reads run in parallel.
//! - `set`/`delete` take the exclusive lock for the whole map.
//! - Values are `Arc<[u8]>`: a reader clones the pointer under the lock and
//!   releases it immediately, so replies never hold the lock while writing
//!   to a socket.

use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::store::KvStore;

/// Process-wide store; created empty at startup and dropped at shutdown.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<Vec<u8>, Arc<[u8]>, RandomState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        MemoryStore {
            items: RwLock::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    /// Creates an empty store with room for `capacity` keys.
    pub fn with_capacity(capacity: usize) -> Self {
        MemoryStore {
            items: RwLock::new(HashMap::with_capacity_and_hasher(
                capacity,
                RandomState::new(),
            )),
        }
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Option<Arc<[u8]>> {
        self.items.read().get(key).cloned()
    }

    fn set(&self, key: Vec<u8>, value: Vec<u8>) {
        let value: Arc<[u8]> = Arc::from(value);
        self.items.write().insert(key, value);
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.items.write().remove(key).is_some()
    }

    fn len(&self) -> usize {
        self.items.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    #[test]
    fn missing_key_is_absent() {
        let store = MemoryStore::new();
        assert!(store.get(b"never-set").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn set_then_get_until_overwrite() {
        let store = MemoryStore::new();
        store.set(b"k".to_vec(), b"v1".to_vec());
        assert_eq!(store.get(b"k").as_deref(), Some(&b"v1"[..]));
        store.set(b"k".to_vec(), b"v2".to_vec());
        assert_eq!(store.get(b"k").as_deref(), Some(&b"v2"[..]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn empty_value_is_not_absent() {
        let store = MemoryStore::new();
        store.set(b"k".to_vec(), Vec::new());
        assert_eq!(store.get(b"k").as_deref(), Some(&b""[..]));
    }

    #[test]
    fn keys_are_case_sensitive() {
        let store = MemoryStore::new();
        store.set(b"Key".to_vec(), b"upper".to_vec());
        assert!(store.get(b"key").is_none());
        assert!(!store.delete(b"KEY"));
    }

    #[test]
    fn delete_reports_presence_once() {
        let store = MemoryStore::with_capacity(4);
        store.set(b"x".to_vec(), b"1".to_vec());
        assert!(store.delete(b"x"));
        assert!(!store.delete(b"x"));
        assert!(store.get(b"x").is_none());
    }

    #[test]
    fn concurrent_writers_never_mix_values() {
        let store = Arc::new(MemoryStore::new());
        let writers: Vec<_> = (0..8u8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let value = vec![i; 4096];
                    for _ in 0..200 {
                        store.set(b"shared".to_vec(), value.clone());
                    }
                })
            })
            .collect();

        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..2000 {
                    if let Some(value) = store.get(b"shared") {
                        assert_eq!(value.len(), 4096);
                        assert!(value.iter().all(|b| *b == value[0]));
                    }
                }
            })
        };

        for handle in writers {
            handle.join().unwrap();
        }
        reader.join().unwrap();

        let last = store.get(b"shared").unwrap();
        assert!(last[0] < 8);
        assert!(last.iter().all(|b| *b == last[0]));
    }

    #[test]
    fn shared_handle_forwards_calls() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let as_trait: &dyn KvStore = &store;
        as_trait.set(b"a".to_vec(), b"b".to_vec());
        assert_eq!(store.get(b"a").as_deref(), Some(&b"b"[..]));
        assert_eq!(as_trait.len(), 1);
    }
}
