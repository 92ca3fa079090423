use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::{LedgerError, Result};
use super::DedupStore;

const PROCESSED_PARTITION: &str = "processed";

/// Value stored for every processed key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub key: String,
    pub completed_at: DateTime<Utc>,
}

/// Fjall-backed persistent dedup store
#[derive(Clone)]
pub struct FjallDedupStore {
    keyspace: Keyspace,
    processed: PartitionHandle,
}

impl FjallDedupStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening dedup store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let processed =
            keyspace.open_partition(PROCESSED_PARTITION, PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            processed,
        })
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() || key.len() > u16::MAX as usize {
            return Err(LedgerError::InvalidKey(format!(
                "key length {} outside 1..={}",
                key.len(),
                u16::MAX
            )));
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<ProcessedRecord>> {
        Self::validate_key(key)?;
        match self.processed.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Number of processed keys
    pub fn len(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.processed.iter() {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

#[async_trait]
impl DedupStore for FjallDedupStore {
    async fn contains(&self, key: &str) -> Result<bool> {
        Self::validate_key(key)?;
        Ok(self.processed.contains_key(key)?)
    }

    async fn insert(&self, key: &str) -> Result<()> {
        Self::validate_key(key)?;
        let record = ProcessedRecord {
            key: key.to_string(),
            completed_at: Utc::now(),
        };
        self.processed.insert(key, serde_json::to_vec(&record)?)?;
        self.persist()?;
        debug!(key, "Recorded processed key");
        Ok(())
    }
}
