//! Upload transport for finished media
//! Uses Apache Arrow object_store crate

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use object_store::{ObjectStore, WriteMultipart, path::Path as StoragePath};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncReadExt;

use crate::config::{DistributionConfig, DistributionProvider};

const CHUNK_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Upload of {file} failed: {reason}")]
    UploadFailed { file: String, reason: String },

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport misconfigured: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// One file to publish.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file: PathBuf,
    pub destination: String,
    pub caption: String,
    pub thumbnail: Option<PathBuf>,
}

/// Metadata returned after upload
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub key: String,
    pub size: u64,
}

#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt>;
}

/// Sidecar stored next to every uploaded object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionRecord {
    pub caption: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    pub thumbnail: Option<String>,
}

/// Transport writing into any object_store backend under
/// `<destination>/<file name>`.
#[derive(Clone)]
pub struct ObjectStoreTransport {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreTransport {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// In-memory store for testing/development
    pub fn in_memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()))
    }

    /// Files under a local directory (created if missing)
    pub fn local(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|source| TransportError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        let store = object_store::local::LocalFileSystem::new_with_prefix(root)?;
        Ok(Self::new(Arc::new(store)))
    }

    pub fn from_config(config: &DistributionConfig) -> Result<Self> {
        match config.provider {
            DistributionProvider::Memory => Ok(Self::in_memory()),
            DistributionProvider::Local => {
                let root = config.root.as_deref().ok_or_else(|| {
                    TransportError::Config("local provider needs distribution.root".to_string())
                })?;
                Self::local(root)
            }
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Stream a local file into `key` as a multipart upload.
    async fn put_file(&self, file: &Path, key: &StoragePath) -> Result<u64> {
        let io_err = |source| TransportError::Io {
            path: file.to_path_buf(),
            source,
        };
        let mut reader = tokio::fs::File::open(file).await.map_err(io_err)?;

        let upload = self.store.put_multipart(key).await?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, CHUNK_SIZE);
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut size = 0u64;

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    let _ = writer.abort().await;
                    return Err(io_err(e));
                }
            };
            writer.wait_for_capacity(2).await?;
            writer.write(&buf[..n]);
            size += n as u64;
        }

        writer.finish().await?;
        Ok(size)
    }

    /// Check if key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = StoragePath::from(key);

        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media".to_string())
}

#[async_trait]
impl UploadTransport for ObjectStoreTransport {
    async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt> {
        let name = file_name(&request.file);
        let key = format!("{}/{}", request.destination.trim_end_matches('/'), name);
        let object = StoragePath::from(key.as_str());

        let size = self.put_file(&request.file, &object).await.map_err(|e| {
            TransportError::UploadFailed {
                file: name.clone(),
                reason: e.to_string(),
            }
        })?;

        let mut thumbnail_key = None;
        if let Some(thumb) = &request.thumbnail {
            let thumb_key = format!("{key}.{}", file_name(thumb));
            match self.put_file(thumb, &StoragePath::from(thumb_key.as_str())).await {
                Ok(_) => thumbnail_key = Some(thumb_key),
                Err(e) => tracing::warn!(key, error = %e, "Thumbnail upload failed, continuing without"),
            }
        }

        let record = CaptionRecord {
            caption: request.caption.clone(),
            size,
            uploaded_at: Utc::now(),
            thumbnail: thumbnail_key,
        };
        let sidecar = serde_json::to_vec(&record).map_err(|e| TransportError::UploadFailed {
            file: name.clone(),
            reason: e.to_string(),
        })?;
        self.store
            .put(&StoragePath::from(format!("{key}.json")), sidecar.into())
            .await?;

        tracing::info!(key, size, "Uploaded to storage");

        Ok(UploadReceipt { key, size })
    }
}
