//! Shared change-log handle used by the coordinator, the applier and clients.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{ChangeLog, Database, DeadLetter, FailureState, SqliteChangeLog};
use crate::models::{Change, ChangeId, NewChange};
use crate::sync::PendingGauge;
use crate::Result;

/// Thread-safe wrapper around the durable change log.
///
/// Every operation takes the lock, runs synchronously against `SQLite` and
/// releases it; the lock is never held across network I/O. Operations that
/// can change the number of unsynced records refresh the pending gauge
/// before returning.
#[derive(Clone)]
pub struct ChangeQueue {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    pending: PendingGauge,
}

impl ChangeQueue {
    /// Open (or create) the change log at the given filesystem path.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let db = Database::open(&db_path)?;
        tracing::info!("Opened change log at {}", db_path.display());
        Self::from_database(db, Some(db_path))
    }

    /// Open an in-memory change log (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_database(Database::open_in_memory()?, None)
    }

    fn from_database(db: Database, db_path: Option<PathBuf>) -> Result<Self> {
        let pending = PendingGauge::default();
        pending.set(SqliteChangeLog::new(db.connection()).pending_count()?);
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
            pending,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Gauge tracking the number of unsynced records
    pub fn pending_gauge(&self) -> PendingGauge {
        self.pending.clone()
    }

    async fn read<R>(&self, op: impl FnOnce(&SqliteChangeLog<'_>) -> Result<R>) -> Result<R> {
        let db = self.db.lock().await;
        let log = SqliteChangeLog::new(db.connection());
        op(&log)
    }

    async fn write<R>(&self, op: impl FnOnce(&SqliteChangeLog<'_>) -> Result<R>) -> Result<R> {
        let db = self.db.lock().await;
        let log = SqliteChangeLog::new(db.connection());
        let result = op(&log);
        // Refresh even when the operation failed; a committed write stays committed
        match log.pending_count() {
            Ok(count) => self.pending.set(count),
            Err(error) => tracing::warn!("Could not refresh pending count: {error}"),
        }
        result
    }

    /// Validate and durably queue a local mutation.
    pub async fn enqueue(&self, change: &NewChange) -> Result<Change> {
        self.write(|log| log.enqueue(change)).await
    }

    pub async fn get(&self, id: ChangeId) -> Result<Option<Change>> {
        self.read(|log| log.get(id)).await
    }

    /// Unsynced records in creation order.
    pub async fn list_pending(&self) -> Result<Vec<Change>> {
        self.read(|log| log.list_pending()).await
    }

    pub async fn pending_count(&self) -> Result<usize> {
        self.read(|log| log.pending_count()).await
    }

    pub async fn mark_synced(&self, id: ChangeId) -> Result<bool> {
        self.write(|log| log.mark_synced(id)).await
    }

    pub async fn purge_synced(&self) -> Result<usize> {
        self.read(|log| log.purge_synced()).await
    }

    /// Retire `id` and append `replacement` in one transaction.
    pub async fn supersede(&self, id: ChangeId, replacement: &NewChange) -> Result<Change> {
        self.write(|log| log.supersede(id, replacement)).await
    }

    /// Flag a pending record as conflicted so ordering holds survive a restart.
    pub async fn mark_conflicted(&self, id: ChangeId) -> Result<()> {
        self.read(|log| log.mark_conflicted(id)).await
    }

    pub async fn conflicted_ids(&self) -> Result<HashSet<ChangeId>> {
        self.read(|log| log.conflicted_ids()).await
    }

    /// Pending records queued by a USE_MINE resolution.
    pub async fn resubmission_ids(&self) -> Result<HashSet<ChangeId>> {
        self.read(|log| log.resubmission_ids()).await
    }

    pub async fn record_failure(
        &self,
        id: ChangeId,
        reason: &str,
        dead_letter_after: u32,
    ) -> Result<FailureState> {
        self.read(|log| log.record_failure(id, reason, dead_letter_after))
            .await
    }

    pub async fn dead_lettered_ids(&self) -> Result<HashSet<ChangeId>> {
        self.read(|log| log.dead_lettered_ids()).await
    }

    pub async fn list_dead_letters(&self) -> Result<Vec<DeadLetter>> {
        self.read(|log| log.list_dead_letters()).await
    }

    /// Put a dead-lettered record back into rotation.
    pub async fn requeue(&self, id: ChangeId) -> Result<bool> {
        self.read(|log| log.requeue(id)).await
    }
}
