//! Local persistence for [`LogRecord`]s waiting to be uploaded.
//!
//! The store is the only durable owner of records. The coordinator reads
//! pending records from it and flips the `uploaded` flag once the remote
//! collector has accepted a batch.
pub mod memory;
pub mod sled_store;

pub use memory::MemoryLogStore;
pub use sled_store::SledLogStore;

use crate::error::StoreError;
use crate::record::LogRecord;
use async_trait::async_trait;

/// Durable storage contract consumed by the
/// [`UploadCoordinator`](crate::coordinator::UploadCoordinator).
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Prepares persistent storage. Idempotent; must be called once before
    /// any other operation.
    ///
    /// # Errors
    ///
    /// [`StoreError::StorageUnavailable`] if the backing storage cannot be
    /// opened. Callers keep logging without persistence in that case.
    async fn init(&self) -> Result<(), StoreError>;

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateId`] if the id is already stored,
    /// [`StoreError::WriteFailure`] on I/O errors.
    async fn save(&self, record: &LogRecord) -> Result<(), StoreError>;

    /// All records with `uploaded == false`, in no particular order.
    async fn unuploaded_records(&self) -> Result<Vec<LogRecord>, StoreError>;

    /// Marks every id as uploaded. Unknown or already uploaded ids are
    /// skipped. Each id is updated on its own, so a failure on one id leaves
    /// the others intact.
    ///
    /// # Returns
    ///
    /// The number of records that actually changed state.
    async fn mark_uploaded(&self, ids: &[String]) -> Result<usize, StoreError>;

    /// Deletes every record with `timestamp < cutoff`, uploaded or not.
    ///
    /// # Returns
    ///
    /// The number of deleted records.
    async fn expire_older_than(&self, cutoff: i64) -> Result<usize, StoreError>;

    /// Every stored record, for diagnostics.
    async fn all_records(&self) -> Result<Vec<LogRecord>, StoreError>;

    /// Removes everything.
    async fn clear(&self) -> Result<(), StoreError>;
}
