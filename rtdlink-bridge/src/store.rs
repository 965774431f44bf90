//! Batch persistence.
//!
//! The poller hands each completed [`Batch`] to a [`Store`] by value. A store
//! either persists it and returns a [`StoreReceipt`], or fails with a
//! [`StoreError`]; the caller reports failures and never retries.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rtdlink_common::{Batch, Format, Session, encode};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::StoreError;

/// Where a batch should be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreTarget {
    pub database: String,
    pub collection: String,
}

impl StoreTarget {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl std::fmt::Display for StoreTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.database, self.collection)
    }
}

/// Result of a successful store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreReceipt {
    /// Number of samples persisted.
    pub records: usize,
    /// Human-readable location of the persisted data.
    pub location: String,
}

/// Durable destination for completed batches.
#[async_trait]
pub trait Store: Send + Sync {
    async fn store(&self, batch: Batch, target: &StoreTarget)
    -> Result<StoreReceipt, StoreError>;
}

/// Writes each batch to its own file under `<root>/<database>/<collection>/`.
///
/// Files are named `<session>_<seq>.<ext>` so runs never overwrite each other.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    format: Format,
    session: Session,
    sequence: AtomicU64,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, format: Format, session: Session) -> Self {
        Self {
            root: root.into(),
            format,
            session,
            sequence: AtomicU64::new(0),
        }
    }

    fn next_path(&self, target: &StoreTarget) -> PathBuf {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let file_name = self
            .session
            .artifact_name(&format!("{:04}.{}", seq, self.format.extension()));
        self.root
            .join(&target.database)
            .join(&target.collection)
            .join(file_name)
    }
}

#[async_trait]
impl Store for FileStore {
    async fn store(
        &self,
        batch: Batch,
        target: &StoreTarget,
    ) -> Result<StoreReceipt, StoreError> {
        let records = batch.len();
        let payload = encode(&batch, self.format)?;
        let path = self.next_path(target);

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| StoreError::Io {
                    path: dir.display().to_string(),
                    source,
                })?;
        }

        tokio::fs::write(&path, &payload)
            .await
            .map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })?;

        debug!(
            path = %path.display(),
            bytes = payload.len(),
            format = self.format.mime_type(),
            "Wrote batch file"
        );

        Ok(StoreReceipt {
            records,
            location: path.display().to_string(),
        })
    }
}

/// Accepts batches and drops them; used when storage is disabled.
#[derive(Debug, Default)]
pub struct DiscardStore;

#[async_trait]
impl Store for DiscardStore {
    async fn store(
        &self,
        batch: Batch,
        target: &StoreTarget,
    ) -> Result<StoreReceipt, StoreError> {
        info!(
            records = batch.len(),
            target = %target,
            "Storage disabled, discarding batch"
        );
        Ok(StoreReceipt {
            records: batch.len(),
            location: "discarded".to_string(),
        })
    }
}

/// Build the store described by `config`.
pub fn from_config(config: &StoreConfig, session: &Session) -> (Arc<dyn Store>, StoreTarget) {
    let target = StoreTarget::new(&config.database, &config.collection);
    let store: Arc<dyn Store> = if config.enabled {
        Arc::new(FileStore::new(
            config.data_dir.clone(),
            config.format,
            session.clone(),
        ))
    } else {
        Arc::new(DiscardStore)
    };
    (store, target)
}
