//! Persistence of accepted funding records.
//!
//! The pipeline only needs three queries from storage, captured by
//! [`RecordStore`]. [`JsonFileStore`] keeps the whole corpus in one JSON file
//! that is rewritten atomically (temp file, then rename) on every change.

use crate::dedup::shard_of;
use crate::error::StoreError;
use crate::models::{DedupKey, ExtractedRecord, RecordId, StoredRecord};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Key-value/query surface over stored records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Records that could match `key`: everything in the same name shard.
    async fn exists_similar(&self, key: &DedupKey) -> Result<Vec<StoredRecord>, StoreError>;

    /// Insert `record` (when `id` is `None`) or replace record `id`.
    async fn upsert(&self, record: &ExtractedRecord, id: Option<RecordId>) -> Result<RecordId, StoreError>;

    /// Records stored within the last `window`.
    async fn load_recent(&self, window: chrono::Duration) -> Result<Vec<StoredRecord>, StoreError>;
}

pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<Vec<StoredRecord>>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing or empty file is an empty corpus.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = match fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => Vec::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        info!(records = records.len(), "Record store opened");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    async fn persist(&self, records: &[StoredRecord]) -> Result<(), StoreError> {
        let io = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io)?;
        }
        let json = serde_json::to_string_pretty(records).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await.map_err(io)?;
        fs::rename(&tmp, &self.path).await.map_err(io)?;
        debug!(records = records.len(), "Record store written");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn exists_similar(&self, key: &DedupKey) -> Result<Vec<StoredRecord>, StoreError> {
        let shard = key.shard();
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|r| shard_of(&r.record.company_name) == shard)
            .cloned()
            .collect())
    }

    async fn upsert(&self, record: &ExtractedRecord, id: Option<RecordId>) -> Result<RecordId, StoreError> {
        let mut records = self.records.lock().await;
        let id = match id {
            Some(id) => {
                let slot = records
                    .iter_mut()
                    .find(|r| r.id == id)
                    .ok_or(StoreError::UnknownRecord(id.0))?;
                slot.record = record.clone();
                slot.stored_at = Utc::now();
                id
            }
            None => {
                let id = RecordId(records.iter().map(|r| r.id.0).max().unwrap_or(0) + 1);
                records.push(StoredRecord {
                    id,
                    stored_at: Utc::now(),
                    record: record.clone(),
                });
                id
            }
        };
        self.persist(&records).await?;
        Ok(id)
    }

    async fn load_recent(&self, window: chrono::Duration) -> Result<Vec<StoredRecord>, StoreError> {
        let cutoff = Utc::now() - window;
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|r| r.stored_at >= cutoff)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::dedup_key;
    use crate::models::tests::record;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("afn_store_{}_{}", std::process::id(), name))
            .join("records.json")
    }

    #[tokio::test]
    async fn test_upsert_persists_and_reloads() {
        let path = temp_path("reload");
        let _ = std::fs::remove_file(&path);
        let store = JsonFileStore::open(&path).await.unwrap();
        let a = store.upsert(&record("Acme Inc"), None).await.unwrap();
        let b = store.upsert(&record("Globex"), None).await.unwrap();
        assert_eq!((a, b), (RecordId(1), RecordId(2)));

        let mut richer = record("Acme Inc");
        richer.industry = Some("Robotics".into());
        store.upsert(&richer, Some(a)).await.unwrap();

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let recent = reopened.load_recent(chrono::Duration::days(1)).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].record.industry.as_deref(), Some("Robotics"));
        assert!(!path.with_extension("json.tmp").exists());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_exists_similar_returns_the_name_shard() {
        let path = temp_path("shard");
        let _ = std::fs::remove_file(&path);
        let store = JsonFileStore::open(&path).await.unwrap();
        store.upsert(&record("Acme Inc"), None).await.unwrap();
        store.upsert(&record("Acme Robotics"), None).await.unwrap();
        store.upsert(&record("Robotics Acme"), None).await.unwrap();
        store.upsert(&record("Globex"), None).await.unwrap();
        let found = store.exists_similar(&dedup_key(&record("ACME"), 30)).await.unwrap();
        assert_eq!(found.len(), 3);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_unknown_id_and_corrupt_file() {
        let path = temp_path("errors");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[{").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path).await,
            Err(StoreError::Corrupt { .. })
        ));

        std::fs::write(&path, "").unwrap();
        let store = JsonFileStore::open(&path).await.unwrap();
        let err = store.upsert(&record("Acme"), Some(RecordId(9))).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownRecord(9)));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
