//! Directory-backed storage.
//!
//! One file per key. File names are the hex encoding of the key, so any key
//! (colons, slashes, unicode) maps to a portable name. Writes go to a
//! temporary file first and are renamed into place.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{CacheError, Result};
use crate::storage::{AsyncStorageAdapter, StorageAdapter};

const EXTENSION: &str = "entry";

fn file_name(key: &str) -> String {
    format!("{}.{}", hex::encode(key.as_bytes()), EXTENSION)
}

fn key_from_path(path: &Path) -> Option<String> {
    if path.extension()? != EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let bytes = hex::decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}

fn storage_error(action: &str, key: &str, err: std::io::Error) -> CacheError {
    CacheError::Storage(format!("Failed to {} '{}': {}", action, key, err))
}

// == File Storage ==
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Opens (and creates if needed) the storage directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).map_err(|e| {
            CacheError::Storage(format!("Failed to create storage directory: {}", e))
        })?;
        info!("File storage initialized at: {}", base_path.display());
        Ok(Self { base_path })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_path.join(file_name(key))
    }
}

impl StorageAdapter for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("read", key, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value).map_err(|e| storage_error("write", key, e))?;
        fs::rename(&tmp, &path).map_err(|e| storage_error("write", key, e))?;
        debug!("Stored entry file for key: {}", key);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("delete", key, e)),
        }
    }

    fn clear(&self) -> Result<()> {
        for key in StorageAdapter::keys(self)? {
            StorageAdapter::delete(self, &key)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let dir = fs::read_dir(&self.base_path)
            .map_err(|e| CacheError::Storage(format!("Failed to list storage: {}", e)))?;
        let mut keys = Vec::new();
        for item in dir {
            let item =
                item.map_err(|e| CacheError::Storage(format!("Failed to list storage: {}", e)))?;
            if let Some(key) = key_from_path(&item.path()) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key).is_file())
    }
}

// == Async File Storage ==
#[derive(Debug, Clone)]
pub struct AsyncFileStorage {
    base_path: PathBuf,
}

impl AsyncFileStorage {
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        tokio::fs::create_dir_all(&base_path).await.map_err(|e| {
            CacheError::Storage(format!("Failed to create storage directory: {}", e))
        })?;
        info!("Async file storage initialized at: {}", base_path.display());
        Ok(Self { base_path })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_path.join(file_name(key))
    }
}

#[async_trait]
impl AsyncStorageAdapter for AsyncFileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("read", key, e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| storage_error("write", key, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_error("write", key, e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("delete", key, e)),
        }
    }

    async fn clear(&self) -> Result<()> {
        for key in AsyncStorageAdapter::keys(self).await? {
            AsyncStorageAdapter::delete(self, &key).await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut dir = tokio::fs::read_dir(&self.base_path)
            .await
            .map_err(|e| CacheError::Storage(format!("Failed to list storage: {}", e)))?;
        let mut keys = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| CacheError::Storage(format!("Failed to list storage: {}", e)))?
        {
            if let Some(key) = key_from_path(&item.path()) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_name_roundtrip() {
        let name = file_name("users:42/profile");
        let key = key_from_path(Path::new(&name));
        assert_eq!(key.as_deref(), Some("users:42/profile"));
        assert!(key_from_path(Path::new("stray.txt")).is_none());
    }

    #[test]
    fn test_file_storage_contract() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        StorageAdapter::set(&storage, "a:1", "one").unwrap();
        StorageAdapter::set(&storage, "b", "two").unwrap();

        assert_eq!(
            StorageAdapter::get(&storage, "a:1").unwrap(),
            Some("one".to_string())
        );
        assert_eq!(StorageAdapter::get(&storage, "missing").unwrap(), None);
        assert_eq!(StorageAdapter::keys(&storage).unwrap(), vec!["a:1", "b"]);
        assert!(StorageAdapter::has(&storage, "b").unwrap());

        StorageAdapter::delete(&storage, "b").unwrap();
        StorageAdapter::delete(&storage, "b").unwrap();
        assert_eq!(StorageAdapter::size(&storage).unwrap(), 1);

        StorageAdapter::clear(&storage).unwrap();
        assert!(StorageAdapter::keys(&storage).unwrap().is_empty());
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = TempDir::new().unwrap();
        StorageAdapter::set(&FileStorage::new(dir.path()).unwrap(), "k", "v").unwrap();

        let reopened = FileStorage::new(dir.path()).unwrap();
        assert_eq!(
            StorageAdapter::get(&reopened, "k").unwrap(),
            Some("v".to_string())
        );
    }

    #[tokio::test]
    async fn test_async_file_storage_contract() {
        let dir = TempDir::new().unwrap();
        let storage = AsyncFileStorage::new(dir.path()).await.unwrap();

        AsyncStorageAdapter::set(&storage, "x", "1").await.unwrap();
        AsyncStorageAdapter::set(&storage, "y", "2").await.unwrap();

        assert_eq!(
            AsyncStorageAdapter::get(&storage, "x").await.unwrap(),
            Some("1".to_string())
        );
        assert_eq!(AsyncStorageAdapter::keys(&storage).await.unwrap(), vec!["x", "y"]);

        AsyncStorageAdapter::delete(&storage, "x").await.unwrap();
        assert!(!AsyncStorageAdapter::has(&storage, "x").await.unwrap());

        AsyncStorageAdapter::clear(&storage).await.unwrap();
        assert_eq!(AsyncStorageAdapter::size(&storage).await.unwrap(), 0);
    }
}
