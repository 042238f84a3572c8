use super::LogStore;
use crate::error::StoreError;
use crate::record::LogRecord;
use async_trait::async_trait;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::PathBuf;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

const RECORDS_TREE: &str = "log_records";
const PENDING_TREE: &str = "log_records_pending";
const BY_TIME_TREE: &str = "log_records_by_time";

enum Source {
    Path(PathBuf),
    Db(Db),
    Temporary,
}

struct Trees {
    db: Db,
    /// id -> JSON encoded record
    records: Tree,
    /// id -> id, present only while `uploaded == false`
    pending: Tree,
    /// order-preserving timestamp ++ id -> id
    by_time: Tree,
}

/// A [`LogStore`] implementation using `sled` for storage.
///
/// Records live in one tree keyed by id. Two index trees make the
/// coordinator's queries cheap: one holding the ids still waiting for upload,
/// one ordered by timestamp for the retention sweep. Every write touching
/// more than one tree runs in a sled transaction, so a record is never half
/// written.
pub struct SledLogStore {
    source: Source,
    trees: OnceCell<Trees>,
}

impl SledLogStore {
    /// Store backed by a database directory, opened on [`LogStore::init`].
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { source: Source::Path(path.into()), trees: OnceCell::new() }
    }

    /// Store living in trees of an already opened database.
    pub fn with_db(db: Db) -> Self {
        Self { source: Source::Db(db), trees: OnceCell::new() }
    }

    /// Store in a throwaway database removed when dropped.
    pub fn temporary() -> Self {
        Self { source: Source::Temporary, trees: OnceCell::new() }
    }

    fn open_trees(&self) -> Result<Trees, sled::Error> {
        let db = match &self.source {
            Source::Path(path) => sled::open(path)?,
            Source::Db(db) => db.clone(),
            Source::Temporary => sled::Config::new().temporary(true).open()?,
        };
        Ok(Trees {
            records: db.open_tree(RECORDS_TREE)?,
            pending: db.open_tree(PENDING_TREE)?,
            by_time: db.open_tree(BY_TIME_TREE)?,
            db,
        })
    }

    fn trees(&self) -> Result<&Trees, StoreError> {
        self.trees.get().ok_or(StoreError::Uninitialized)
    }

    fn decode(raw: &[u8]) -> Result<LogRecord, StoreError> {
        serde_json::from_slice(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn mark_one(trees: &Trees, id: &str) -> Result<bool, StoreError> {
        let key = id.as_bytes();
        let changed = (&trees.records, &trees.pending)
            .transaction(|(records, pending)| {
                let Some(raw) = records.get(key)? else {
                    return Ok(false);
                };
                let mut record = Self::decode(&raw).map_err(ConflictableTransactionError::Abort)?;
                if record.uploaded {
                    pending.remove(key)?;
                    return Ok(false);
                }
                record.uploaded = true;
                let value = serde_json::to_vec(&record)
                    .map_err(|e| ConflictableTransactionError::Abort(StoreError::WriteFailure(e.to_string())))?;
                records.insert(key, value)?;
                pending.remove(key)?;
                Ok(true)
            })
            .map_err(flatten)?;
        Ok(changed)
    }
}

/// Order-preserving key for a signed timestamp.
fn time_prefix(timestamp: i64) -> [u8; 8] {
    ((timestamp as u64) ^ (1 << 63)).to_be_bytes()
}

fn time_key(timestamp: i64, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + id.len());
    key.extend_from_slice(&time_prefix(timestamp));
    key.extend_from_slice(id.as_bytes());
    key
}

fn flatten(e: TransactionError<StoreError>) -> StoreError {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::WriteFailure(e.to_string()),
    }
}

#[async_trait]
impl LogStore for SledLogStore {
    async fn init(&self) -> Result<(), StoreError> {
        self.trees
            .get_or_try_init(|| async {
                self.open_trees().map_err(|e| {
                    warn!("failed to open log store: {}", e);
                    StoreError::StorageUnavailable(e.to_string())
                })
            })
            .await?;
        Ok(())
    }

    async fn save(&self, record: &LogRecord) -> Result<(), StoreError> {
        let trees = self.trees()?;
        let key = record.id.as_bytes();
        let value = serde_json::to_vec(record).map_err(|e| StoreError::WriteFailure(e.to_string()))?;
        let by_time_key = time_key(record.timestamp, &record.id);

        (&trees.records, &trees.pending, &trees.by_time)
            .transaction(|(records, pending, by_time)| {
                if records.get(key)?.is_some() {
                    return Err(ConflictableTransactionError::Abort(StoreError::DuplicateId(
                        record.id.clone(),
                    )));
                }
                records.insert(key, value.as_slice())?;
                if !record.uploaded {
                    pending.insert(key, key)?;
                }
                by_time.insert(by_time_key.as_slice(), key)?;
                Ok(())
            })
            .map_err(flatten)?;

        trees.db.flush_async().await?;
        Ok(())
    }

    async fn unuploaded_records(&self) -> Result<Vec<LogRecord>, StoreError> {
        let trees = self.trees()?;
        let mut out = Vec::new();
        for entry in trees.pending.iter() {
            let (key, _) = entry?;
            // Expired between the index read and the lookup.
            let Some(raw) = trees.records.get(&key)? else {
                continue;
            };
            let record = Self::decode(&raw)?;
            if !record.uploaded {
                out.push(record);
            }
        }
        Ok(out)
    }

    async fn mark_uploaded(&self, ids: &[String]) -> Result<usize, StoreError> {
        let trees = self.trees()?;
        let mut changed = 0;
        let mut last_err = None;

        for id in ids {
            match Self::mark_one(trees, id) {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("failed to mark log record {} uploaded: {}", id, e);
                    last_err = Some(e);
                }
            }
        }

        trees.db.flush_async().await?;
        match last_err {
            Some(e) => Err(e),
            None => Ok(changed),
        }
    }

    async fn expire_older_than(&self, cutoff: i64) -> Result<usize, StoreError> {
        let trees = self.trees()?;
        let upper = time_prefix(cutoff);

        let mut expired = Vec::new();
        for entry in trees.by_time.range(..&upper[..]) {
            let (time_key, id) = entry?;
            expired.push((time_key, id));
        }

        for (time_key, id) in &expired {
            (&trees.records, &trees.pending, &trees.by_time)
                .transaction(|(records, pending, by_time)| {
                    records.remove(id.clone())?;
                    pending.remove(id.clone())?;
                    by_time.remove(time_key.clone())?;
                    Ok::<_, ConflictableTransactionError<StoreError>>(())
                })
                .map_err(flatten)?;
        }

        if !expired.is_empty() {
            debug!("expired {} log records older than {}", expired.len(), cutoff);
            trees.db.flush_async().await?;
        }
        Ok(expired.len())
    }

    async fn all_records(&self) -> Result<Vec<LogRecord>, StoreError> {
        let trees = self.trees()?;
        let mut out = Vec::new();
        for entry in trees.records.iter() {
            let (_, raw) = entry?;
            out.push(Self::decode(&raw)?);
        }
        Ok(out)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let trees = self.trees()?;
        trees.records.clear()?;
        trees.pending.clear()?;
        trees.by_time.clear()?;
        trees.db.flush_async().await?;
        Ok(())
    }
}
