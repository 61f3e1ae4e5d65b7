//! Durable change log implementation

use std::collections::HashSet;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Change, ChangeId, ChangePayload, ModelName, NewChange};
use crate::util::unix_millis_now;

const CHANGE_COLUMNS: &str =
    "id, client_id, change_type, model_name, object_id, change_data, version_at_change, created_at, synced";

/// A pending record that kept failing server validation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    pub change: Change,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Attempt bookkeeping after a failed submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureState {
    pub attempts: u32,
    pub dead_lettered: bool,
}

/// Trait for change log storage operations
pub trait ChangeLog {
    /// Validate and durably append a new record with `synced = false`
    fn enqueue(&self, change: &NewChange) -> Result<Change>;

    /// Get a record by id, synced or not
    fn get(&self, id: ChangeId) -> Result<Option<Change>>;

    /// All unsynced records in ascending id order
    fn list_pending(&self) -> Result<Vec<Change>>;

    /// Number of unsynced records
    fn pending_count(&self) -> Result<usize>;

    /// Mark a record synced and drop any conflict flag on it. Returns whether
    /// anything changed; unknown or already-synced ids are a no-op.
    fn mark_synced(&self, id: ChangeId) -> Result<bool>;

    /// Remove every synced record, returning how many were removed
    fn purge_synced(&self) -> Result<usize>;

    /// Atomically retire `id` and append `replacement`, remembering which
    /// record it replaces until the replacement is synced
    fn supersede(&self, id: ChangeId, replacement: &NewChange) -> Result<Change>;

    /// Flag a pending record as conflicted on the server
    fn mark_conflicted(&self, id: ChangeId) -> Result<()>;

    /// Ids of pending records flagged as conflicted
    fn conflicted_ids(&self) -> Result<HashSet<ChangeId>>;

    /// Ids of pending records queued by `supersede`
    fn resubmission_ids(&self) -> Result<HashSet<ChangeId>>;

    /// Count a failed submission; dead-letters the record once `dead_letter_after`
    /// attempts have failed (0 disables dead-lettering)
    fn record_failure(
        &self,
        id: ChangeId,
        reason: &str,
        dead_letter_after: u32,
    ) -> Result<FailureState>;

    /// Ids of pending records that are dead-lettered
    fn dead_lettered_ids(&self) -> Result<HashSet<ChangeId>>;

    /// Pending records that are dead-lettered, oldest first
    fn list_dead_letters(&self) -> Result<Vec<DeadLetter>>;

    /// Clear the dead-letter flag and attempt count so the record is retried
    fn requeue(&self, id: ChangeId) -> Result<bool>;
}

/// `SQLite` implementation of `ChangeLog`
pub struct SqliteChangeLog<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteChangeLog<'a> {
    /// Create a new change log over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn insert(
        conn: &Connection,
        change: &NewChange,
        supersedes: Option<ChangeId>,
    ) -> Result<Change> {
        change.validate()?;

        let client_id = Uuid::now_v7();
        let created_at = unix_millis_now();
        let change_data = serde_json::to_string(&change.payload.change_data()?)?;

        conn.execute(
            "INSERT INTO change_log
                (client_id, change_type, model_name, object_id, change_data, version_at_change, created_at, synced, supersedes)
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)",
            params![
                client_id.to_string(),
                change.change_type.as_str(),
                change.payload.model_name().as_str(),
                change.object_id,
                change_data,
                change.version_at_change,
                created_at,
                supersedes.map(ChangeId::get)
            ],
        )?;

        Ok(Change {
            id: ChangeId::new(conn.last_insert_rowid()),
            client_id,
            change_type: change.change_type,
            object_id: change.object_id.clone(),
            payload: change.payload.clone(),
            version_at_change: change.version_at_change,
            created_at,
            synced: false,
        })
    }

    /// Parse a change from a database row
    fn parse_change(row: &rusqlite::Row<'_>) -> rusqlite::Result<Change> {
        let client_id: String = row.get(1)?;
        let change_type: String = row.get(2)?;
        let model_name: String = row.get(3)?;
        let change_data: String = row.get(5)?;

        let client_id = Uuid::parse_str(&client_id).map_err(|e| conversion_error(1, e))?;
        let change_type = change_type.parse().map_err(|e| conversion_error(2, e))?;
        let model_name: ModelName = model_name.parse().map_err(|e| conversion_error(3, e))?;
        let change_data: serde_json::Value =
            serde_json::from_str(&change_data).map_err(|e| conversion_error(5, e))?;
        let payload =
            ChangePayload::from_parts(model_name, change_data).map_err(|e| conversion_error(5, e))?;

        Ok(Change {
            id: ChangeId::new(row.get(0)?),
            client_id,
            change_type,
            object_id: row.get(4)?,
            payload,
            version_at_change: row.get(6)?,
            created_at: row.get(7)?,
            synced: row.get::<_, i32>(8)? != 0,
        })
    }
}

fn conversion_error(
    column: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(error))
}

fn clear_conflict(conn: &Connection, id: ChangeId) -> Result<()> {
    conn.execute(
        "DELETE FROM change_conflicts WHERE change_id = ?",
        params![id.get()],
    )?;
    Ok(())
}

impl ChangeLog for SqliteChangeLog<'_> {
    fn enqueue(&self, change: &NewChange) -> Result<Change> {
        // A single-statement transaction: the row is either fully written or absent
        let tx = self.conn.unchecked_transaction()?;
        let record = Self::insert(&tx, change, None)?;
        tx.commit()?;

        tracing::debug!(
            "Queued change {} ({} {})",
            record.id,
            record.change_type,
            record.key()
        );
        Ok(record)
    }

    fn get(&self, id: ChangeId) -> Result<Option<Change>> {
        let change = self
            .conn
            .query_row(
                &format!("SELECT {CHANGE_COLUMNS} FROM change_log WHERE id = ?"),
                params![id.get()],
                Self::parse_change,
            )
            .optional()?;
        Ok(change)
    }

    fn list_pending(&self) -> Result<Vec<Change>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CHANGE_COLUMNS} FROM change_log WHERE synced = 0 ORDER BY id ASC"
        ))?;

        let changes = stmt
            .query_map([], Self::parse_change)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(changes)
    }

    fn pending_count(&self) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM change_log WHERE synced = 0",
            [],
            |row| row.get::<_, usize>(0),
        )?;
        Ok(count)
    }

    fn mark_synced(&self, id: ChangeId) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let rows = tx.execute(
            "UPDATE change_log SET synced = 1 WHERE id = ? AND synced = 0",
            params![id.get()],
        )?;
        clear_conflict(&tx, id)?;
        tx.commit()?;
        Ok(rows > 0)
    }

    fn purge_synced(&self) -> Result<usize> {
        let rows = self
            .conn
            .execute("DELETE FROM change_log WHERE synced = 1", [])?;
        if rows > 0 {
            tracing::debug!("Purged {rows} synced changes");
        }
        Ok(rows)
    }

    fn supersede(&self, id: ChangeId, replacement: &NewChange) -> Result<Change> {
        let tx = self.conn.unchecked_transaction()?;
        let rows = tx.execute(
            "UPDATE change_log SET synced = 1 WHERE id = ? AND synced = 0",
            params![id.get()],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(id));
        }
        clear_conflict(&tx, id)?;
        let record = Self::insert(&tx, replacement, Some(id))?;
        tx.commit()?;
        Ok(record)
    }

    fn mark_conflicted(&self, id: ChangeId) -> Result<()> {
        self.conn.execute(
            "INSERT INTO change_conflicts (change_id, detected_at) VALUES (?1, ?2)
             ON CONFLICT(change_id) DO UPDATE SET detected_at = excluded.detected_at",
            params![id.get(), unix_millis_now()],
        )?;
        Ok(())
    }

    fn conflicted_ids(&self) -> Result<HashSet<ChangeId>> {
        let mut stmt = self.conn.prepare(
            "SELECT x.change_id
             FROM change_conflicts x
             JOIN change_log c ON c.id = x.change_id
             WHERE c.synced = 0",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0).map(ChangeId::new))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    fn resubmission_ids(&self) -> Result<HashSet<ChangeId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM change_log WHERE synced = 0 AND supersedes IS NOT NULL")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0).map(ChangeId::new))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    fn record_failure(
        &self,
        id: ChangeId,
        reason: &str,
        dead_letter_after: u32,
    ) -> Result<FailureState> {
        let now = unix_millis_now();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO change_attempts (change_id, attempts, last_error, last_attempt_at)
             VALUES (?1, 1, ?2, ?3)
             ON CONFLICT(change_id) DO UPDATE SET
                attempts = attempts + 1,
                last_error = excluded.last_error,
                last_attempt_at = excluded.last_attempt_at",
            params![id.get(), reason, now],
        )?;
        let attempts: u32 = tx.query_row(
            "SELECT attempts FROM change_attempts WHERE change_id = ?",
            params![id.get()],
            |row| row.get(0),
        )?;
        // A validation failure supersedes an earlier conflict report
        clear_conflict(&tx, id)?;
        let dead_lettered = dead_letter_after > 0 && attempts >= dead_letter_after;
        if dead_lettered {
            tx.execute(
                "UPDATE change_attempts SET dead_lettered = 1 WHERE change_id = ?",
                params![id.get()],
            )?;
        }
        tx.commit()?;

        Ok(FailureState {
            attempts,
            dead_lettered,
        })
    }

    fn dead_lettered_ids(&self) -> Result<HashSet<ChangeId>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.change_id
             FROM change_attempts a
             JOIN change_log c ON c.id = a.change_id
             WHERE a.dead_lettered = 1 AND c.synced = 0",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0).map(ChangeId::new))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    fn list_dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let columns = CHANGE_COLUMNS
            .split(", ")
            .map(|column| format!("c.{column}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {columns}, a.attempts, a.last_error
             FROM change_log c
             JOIN change_attempts a ON a.change_id = c.id
             WHERE a.dead_lettered = 1 AND c.synced = 0
             ORDER BY c.id ASC"
        ))?;

        let dead_letters = stmt
            .query_map([], |row| {
                Ok(DeadLetter {
                    change: Self::parse_change(row)?,
                    attempts: row.get(9)?,
                    last_error: row.get(10)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(dead_letters)
    }

    fn requeue(&self, id: ChangeId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM change_attempts WHERE change_id = ?",
            params![id.get()],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{ChangeType, FloorPlanFields, RoomFields};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn capacity_update(object_id: &str, version: i64, capacity: i64) -> NewChange {
        NewChange::update(
            object_id,
            version,
            ChangePayload::Room(RoomFields {
                capacity: Some(capacity),
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_enqueue_and_get() {
        let db = setup();
        let log = SqliteChangeLog::new(db.connection());

        let change = log.enqueue(&capacity_update("42", 3, 5)).unwrap();
        assert!(!change.synced);
        assert_eq!(change.change_type, ChangeType::Update);

        let fetched = log.get(change.id).unwrap().unwrap();
        assert_eq!(fetched, change);
    }

    #[test]
    fn test_enqueue_rejects_invalid_change() {
        let db = setup();
        let log = SqliteChangeLog::new(db.connection());

        let result = log.enqueue(&NewChange::create(ChangePayload::FloorPlan(
            FloorPlanFields::default(),
        )));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(log.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_list_pending_in_creation_order() {
        let db = setup();
        let log = SqliteChangeLog::new(db.connection());

        let first = log.enqueue(&capacity_update("42", 3, 5)).unwrap();
        let second = log.enqueue(&capacity_update("42", 3, 8)).unwrap();
        let third = log.enqueue(&capacity_update("7", 1, 2)).unwrap();

        let ids: Vec<_> = log.list_pending().unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
        assert!(first.id < second.id && second.id < third.id);
    }

    #[test]
    fn test_mark_synced_is_idempotent() {
        let db = setup();
        let log = SqliteChangeLog::new(db.connection());

        let change = log.enqueue(&capacity_update("42", 3, 5)).unwrap();
        assert!(log.mark_synced(change.id).unwrap());
        assert!(!log.mark_synced(change.id).unwrap());
        assert!(!log.mark_synced(ChangeId::new(9_999)).unwrap());
        assert_eq!(log.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_purge_only_removes_synced() {
        let db = setup();
        let log = SqliteChangeLog::new(db.connection());

        let done = log.enqueue(&capacity_update("42", 3, 5)).unwrap();
        let open = log.enqueue(&capacity_update("42", 3, 8)).unwrap();
        log.mark_synced(done.id).unwrap();

        assert_eq!(log.purge_synced().unwrap(), 1);
        assert!(log.get(done.id).unwrap().is_none());
        assert!(log.get(open.id).unwrap().is_some());
        assert_eq!(log.purge_synced().unwrap(), 0);
    }

    #[test]
    fn test_ids_are_not_reused_after_purge() {
        let db = setup();
        let log = SqliteChangeLog::new(db.connection());

        let first = log.enqueue(&capacity_update("42", 3, 5)).unwrap();
        log.mark_synced(first.id).unwrap();
        log.purge_synced().unwrap();

        let second = log.enqueue(&capacity_update("42", 4, 6)).unwrap();
        assert!(second.id > first.id);
    }

    #[test]
    fn test_supersede_retires_original_and_appends() {
        let db = setup();
        let log = SqliteChangeLog::new(db.connection());

        let original = log.enqueue(&capacity_update("42", 3, 5)).unwrap();
        let replacement = log
            .supersede(original.id, &original.resubmission(4))
            .unwrap();

        assert_eq!(replacement.version_at_change, 4);
        assert_eq!(replacement.payload, original.payload);
        assert_ne!(replacement.client_id, original.client_id);
        assert!(log.get(original.id).unwrap().unwrap().synced);

        let pending = log.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, replacement.id);
    }

    #[test]
    fn test_supersede_unknown_change_fails_without_appending() {
        let db = setup();
        let log = SqliteChangeLog::new(db.connection());

        let result = log.supersede(ChangeId::new(1), &capacity_update("42", 4, 5));
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(log.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_supersede_marks_replacement_as_resubmission() {
        let db = setup();
        let log = SqliteChangeLog::new(db.connection());

        let original = log.enqueue(&capacity_update("42", 3, 5)).unwrap();
        log.enqueue(&capacity_update("42", 4, 9)).unwrap();
        log.mark_conflicted(original.id).unwrap();

        let replacement = log
            .supersede(original.id, &original.resubmission(4))
            .unwrap();
        assert_eq!(
            log.resubmission_ids().unwrap(),
            HashSet::from([replacement.id])
        );
        assert!(log.conflicted_ids().unwrap().is_empty());

        log.mark_synced(replacement.id).unwrap();
        assert!(log.resubmission_ids().unwrap().is_empty());
    }

    #[test]
    fn test_conflict_flag_clears_when_settled() {
        let db = setup();
        let log = SqliteChangeLog::new(db.connection());

        let abandoned = log.enqueue(&capacity_update("42", 3, 5)).unwrap();
        let failing = log.enqueue(&capacity_update("7", 1, 2)).unwrap();
        log.mark_conflicted(abandoned.id).unwrap();
        log.mark_conflicted(failing.id).unwrap();
        // Re-reporting the same conflict is an update, not an error
        log.mark_conflicted(failing.id).unwrap();
        assert_eq!(
            log.conflicted_ids().unwrap(),
            HashSet::from([abandoned.id, failing.id])
        );

        log.mark_synced(abandoned.id).unwrap();
        log.record_failure(failing.id, "Room matching query does not exist.", 0)
            .unwrap();
        assert!(log.conflicted_ids().unwrap().is_empty());
    }

    #[test]
    fn test_record_failure_dead_letters_at_threshold() {
        let db = setup();
        let log = SqliteChangeLog::new(db.connection());

        let change = log.enqueue(&capacity_update("42", 3, 5)).unwrap();
        let state = log.record_failure(change.id, "bad payload", 2).unwrap();
        assert_eq!(
            state,
            FailureState {
                attempts: 1,
                dead_lettered: false
            }
        );
        assert!(log.dead_lettered_ids().unwrap().is_empty());

        let state = log.record_failure(change.id, "still bad", 2).unwrap();
        assert!(state.dead_lettered);

        let dead = log.list_dead_letters().unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 2);
        assert_eq!(dead[0].last_error.as_deref(), Some("still bad"));
        // Dead letters still count as pending
        assert_eq!(log.pending_count().unwrap(), 1);

        assert!(log.requeue(change.id).unwrap());
        assert!(log.list_dead_letters().unwrap().is_empty());
    }

    #[test]
    fn test_conflict_flag_survives_reopen() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("queue.db");

        let conflicted = {
            let db = Database::open(&db_path).unwrap();
            let log = SqliteChangeLog::new(db.connection());
            let change = log.enqueue(&capacity_update("42", 3, 5)).unwrap();
            log.enqueue(&capacity_update("42", 4, 8)).unwrap();
            log.mark_conflicted(change.id).unwrap();
            change
        };

        let db = Database::open(&db_path).unwrap();
        let log = SqliteChangeLog::new(db.connection());
        assert_eq!(log.conflicted_ids().unwrap(), HashSet::from([conflicted.id]));
    }

    #[test]
    fn test_pending_survives_reopen() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("queue.db");

        let enqueued = {
            let db = Database::open(&db_path).unwrap();
            let log = SqliteChangeLog::new(db.connection());
            let a = log.enqueue(&capacity_update("42", 3, 5)).unwrap();
            let b = log.enqueue(&capacity_update("42", 3, 8)).unwrap();
            let c = log.enqueue(&capacity_update("9", 1, 4)).unwrap();
            log.mark_synced(c.id).unwrap();
            vec![a, b]
        };

        let db = Database::open(&db_path).unwrap();
        let log = SqliteChangeLog::new(db.connection());
        assert_eq!(log.list_pending().unwrap(), enqueued);
    }
}
