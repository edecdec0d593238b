//! In-memory object store for tests.

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{ObjectStore, Result, StoreError};

/// Backed by a `BTreeMap` behind a lock. Lists are naturally sorted.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects, handy in assertions.
    pub fn len(&self) -> usize {
        self.objects.read().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for InMemoryStore {
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self.objects.read().expect("store lock poisoned");
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let objects = self.objects.read().expect("store lock poisoned");
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let mut objects = self.objects.write().expect("store lock poisoned");
        objects.insert(key.to_string(), bytes);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut objects = self.objects.write().expect("store lock poisoned");
        objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let store = InMemoryStore::new();
        store.put("a/b", b"payload".to_vec()).unwrap();
        assert_eq!(store.get("a/b").unwrap(), b"payload");
    }

    #[test]
    fn list_is_prefix_scoped_and_sorted() {
        let store = InMemoryStore::new();
        store.put("m/2", vec![]).unwrap();
        store.put("m/1", vec![]).unwrap();
        store.put("n/1", vec![]).unwrap();
        assert_eq!(store.list("m/").unwrap(), vec!["m/1", "m/2"]);
    }

    #[test]
    fn missing_key_is_not_found() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.get("missing"),
            Err(StoreError::NotFound(_))
        ));
        assert!(!store.exists("missing").unwrap());
    }

    #[test]
    fn copy_duplicates_content() {
        let store = InMemoryStore::new();
        store.put("src", b"x".to_vec()).unwrap();
        store.copy("src", "dst").unwrap();
        assert_eq!(store.get("dst").unwrap(), b"x");
    }
}
