use super::LogStore;
use crate::error::StoreError;
use crate::record::LogRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// In-process [`LogStore`]. Nothing survives a restart.
///
/// Useful for tests and for hosts that want upload coordination without a
/// database on disk.
#[derive(Default)]
pub struct MemoryLogStore {
    records: Mutex<HashMap<String, LogRecord>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save(&self, record: &LogRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::DuplicateId(record.id.clone()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn unuploaded_records(&self) -> Result<Vec<LogRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.values().filter(|r| !r.uploaded).cloned().collect())
    }

    async fn mark_uploaded(&self, ids: &[String]) -> Result<usize, StoreError> {
        let mut records = self.records.lock().await;
        let mut changed = 0;
        for id in ids {
            if let Some(record) = records.get_mut(id) {
                if !record.uploaded {
                    record.uploaded = true;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn expire_older_than(&self, cutoff: i64) -> Result<usize, StoreError> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, r| r.timestamp >= cutoff);
        Ok(before - records.len())
    }

    async fn all_records(&self) -> Result<Vec<LogRecord>, StoreError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.records.lock().await.clear();
        Ok(())
    }
}
