//! In-process storage backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::{AsyncStorageAdapter, StorageAdapter};

/// Map-backed storage. Clones share the same map, which makes it handy for
/// "restart" scenarios in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageAdapter for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.data.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.data.lock().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.data.lock().clear();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.data.lock().keys().cloned().collect())
    }

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.data.lock().contains_key(key))
    }

    fn size(&self) -> Result<usize> {
        Ok(self.data.lock().len())
    }
}

#[async_trait]
impl AsyncStorageAdapter for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        StorageAdapter::get(self, key)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        StorageAdapter::set(self, key, value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        StorageAdapter::delete(self, key)
    }

    async fn clear(&self) -> Result<()> {
        StorageAdapter::clear(self)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        StorageAdapter::keys(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_contract() {
        let storage = MemoryStorage::new();

        StorageAdapter::set(&storage, "b", "2").unwrap();
        StorageAdapter::set(&storage, "a", "1").unwrap();

        assert_eq!(StorageAdapter::get(&storage, "a").unwrap(), Some("1".to_string()));
        assert!(StorageAdapter::has(&storage, "b").unwrap());
        assert_eq!(StorageAdapter::keys(&storage).unwrap(), vec!["a", "b"]);
        assert_eq!(StorageAdapter::size(&storage).unwrap(), 2);

        StorageAdapter::delete(&storage, "a").unwrap();
        assert_eq!(StorageAdapter::get(&storage, "a").unwrap(), None);

        StorageAdapter::clear(&storage).unwrap();
        assert_eq!(StorageAdapter::size(&storage).unwrap(), 0);
    }

    #[test]
    fn test_memory_storage_clones_share_data() {
        let storage = MemoryStorage::new();
        let other = storage.clone();

        StorageAdapter::set(&storage, "k", "v").unwrap();
        assert!(StorageAdapter::has(&other, "k").unwrap());
    }

    #[tokio::test]
    async fn test_memory_storage_async_contract() {
        let storage = MemoryStorage::new();

        AsyncStorageAdapter::set(&storage, "k", "v").await.unwrap();
        assert_eq!(
            AsyncStorageAdapter::get(&storage, "k").await.unwrap(),
            Some("v".to_string())
        );
        assert_eq!(AsyncStorageAdapter::size(&storage).await.unwrap(), 1);
        AsyncStorageAdapter::clear(&storage).await.unwrap();
        assert!(!AsyncStorageAdapter::has(&storage, "k").await.unwrap());
    }
}
