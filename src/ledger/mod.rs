//! Record of finished work, consulted before a job is dispatched.
//!
//! A key is added once a job has fully completed (kept locally or
//! distributed). Dispatch skips any job whose key is already present. The
//! check and the later insert are not atomic: two identical submissions
//! racing each other may both run, which costs duplicated work but never
//! corrupts anything.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use streambox::ledger::{DedupStore, FjallDedupStore};
//!
//! let store = FjallDedupStore::open("data/dedup")?;
//! if !store.contains("downloads/show").await? {
//!     // ... process ...
//!     store.insert("downloads/show").await?;
//! }
//! ```

pub mod error;
pub mod store;

pub use error::{LedgerError, Result};
pub use store::{FjallDedupStore, ProcessedRecord};

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn contains(&self, key: &str) -> Result<bool>;
    async fn insert(&self, key: &str) -> Result<()>;
}

/// Process-local store for tests and throwaway runs
#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    keys: Mutex<HashSet<String>>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key))
    }

    async fn insert(&self, key: &str) -> Result<()> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
        Ok(())
    }
}
