//! Storage Module
//!
//! Persistence backends behind a narrow string key-value contract. The entry
//! store stays the source of truth; a backend is written through on every
//! successful mutation and read through on an in-memory miss.
//!
//! # Backends
//! - `MemoryStorage` - process-local map, implements both contracts
//! - `FileStorage` - one file per key in a directory (blocking I/O)
//! - `AsyncFileStorage` - same layout over `tokio::fs`

mod file;
mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

pub use file::{AsyncFileStorage, FileStorage};
pub use memory::MemoryStorage;

// == Synchronous Contract ==
pub trait StorageAdapter: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;

    fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn size(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }
}

// == Asynchronous Contract ==
#[async_trait]
pub trait AsyncStorageAdapter: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
    async fn keys(&self) -> Result<Vec<String>>;

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.keys().await?.len())
    }
}

// == Backend Selector ==
/// Where entries are persisted, chosen at construction time.
#[derive(Clone, Default)]
pub enum StorageBackend {
    /// Entries live only in the entry store.
    #[default]
    Memory,
    /// Blocking backend, used by both the sync and async cache paths.
    Sync(Arc<dyn StorageAdapter>),
    /// Awaitable backend, used only by the `*_async` cache methods.
    Async(Arc<dyn AsyncStorageAdapter>),
}

impl StorageBackend {
    pub fn sync(adapter: impl StorageAdapter + 'static) -> Self {
        StorageBackend::Sync(Arc::new(adapter))
    }

    pub fn asynchronous(adapter: impl AsyncStorageAdapter + 'static) -> Self {
        StorageBackend::Async(Arc::new(adapter))
    }

    pub fn is_persistent(&self) -> bool {
        !matches!(self, StorageBackend::Memory)
    }

    pub fn label(&self) -> &'static str {
        match self {
            StorageBackend::Memory => "memory",
            StorageBackend::Sync(_) => "sync",
            StorageBackend::Async(_) => "async",
        }
    }
}

impl fmt::Debug for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageBackend::{}", self.label())
    }
}
