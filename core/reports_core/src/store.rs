//! The `Reports` table.
//!
//! Every call goes through one mutex-guarded connection, so mutations are
//! serialized and the reseed emptiness check cannot race an insert.

use std::{
    collections::HashSet,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use rusqlite::{types::Type, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::report::{Position, Report, ReportStatus, NO_REPORTED_USER};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("timed out after {0:?} waiting for the database")]
    Timeout(Duration),

    #[error("reports table is not empty")]
    NotEmpty,

    #[error("position {0} is not finite")]
    InvalidPosition(Position),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone)]
pub struct ReportStore {
    conn: Arc<Mutex<Connection>>,
    timeout_ms: Arc<AtomicU64>,
}

impl ReportStore {
    pub fn open(path: &Path, timeout: Duration) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
"#,
        )?;
        Self::from_connection(conn, timeout)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, Duration::from_secs(5))
    }

    pub fn from_connection(conn: Connection, timeout: Duration) -> StoreResult<Self> {
        conn.busy_timeout(timeout)?;
        ensure_schema(&conn)?;
        Ok(ReportStore {
            conn: Arc::new(Mutex::new(conn)),
            timeout_ms: Arc::new(AtomicU64::new(timeout.as_millis() as u64)),
        })
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    pub async fn set_query_timeout(&self, timeout: Duration) -> StoreResult<()> {
        let conn = self.lock().await?;
        conn.busy_timeout(timeout)?;
        self.timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        let timeout = self.query_timeout();
        tokio::time::timeout(timeout, self.conn.lock())
            .await
            .map_err(|_| StoreError::Timeout(timeout))
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        let conn = self.lock().await?;
        ensure_schema(&conn)?;
        Ok(())
    }

    /// Inserts one report and returns the id the table assigned to it.
    pub async fn insert(
        &self,
        reporter_user_id: i64,
        reported_user_id: Option<i64>,
        message: &str,
        position: Position,
        status: ReportStatus,
        created_time: i64,
    ) -> StoreResult<i64> {
        if !position.is_finite() {
            return Err(StoreError::InvalidPosition(position));
        }
        let conn = self.lock().await?;
        Ok(insert_report(
            &conn,
            reporter_user_id,
            reported_user_id,
            message,
            position,
            status,
            created_time,
        )?)
    }

    /// Highest id filed by `reporter_user_id` with exactly `message`.
    pub async fn latest_id_for(
        &self,
        reporter_user_id: i64,
        message: &str,
    ) -> StoreResult<Option<i64>> {
        let conn = self.lock().await?;
        let id = conn.query_row(
            "SELECT MAX(ReportID) FROM Reports WHERE UserID = ?1 AND Message = ?2",
            (reporter_user_id, message),
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(id)
    }

    /// Every decodable row. Rows that fail to decode are logged and skipped.
    pub async fn fetch_all(&self) -> StoreResult<Vec<Report>> {
        let conn = self.lock().await?;
        Ok(list_reports(&conn)?)
    }

    pub async fn get(&self, id: i64) -> StoreResult<Option<Report>> {
        let conn = self.lock().await?;
        let mut stmt = conn.prepare(&format!("{SELECT_REPORTS} WHERE ReportID = ?1"))?;
        Ok(stmt.query_row([id], report_from_row).optional()?)
    }

    /// Returns `false` when no report has `id`.
    pub async fn set_status(&self, id: i64, status: ReportStatus) -> StoreResult<bool> {
        let conn = self.lock().await?;
        let n = conn.execute(
            "UPDATE Reports SET State = ?1 WHERE ReportID = ?2",
            (status.as_i64(), id),
        )?;
        Ok(n > 0)
    }

    /// Moves an unread report to unhandled. Returns `true` only when the row changed.
    pub async fn mark_viewed(&self, id: i64) -> StoreResult<bool> {
        let conn = self.lock().await?;
        let n = conn.execute(
            "UPDATE Reports SET State = ?1 WHERE ReportID = ?2 AND State = ?3",
            (
                ReportStatus::Unhandled.as_i64(),
                id,
                ReportStatus::Unread.as_i64(),
            ),
        )?;
        Ok(n > 0)
    }

    /// Returns `false` when no report has `id`.
    pub async fn delete(&self, id: i64) -> StoreResult<bool> {
        let conn = self.lock().await?;
        let n = conn.execute("DELETE FROM Reports WHERE ReportID = ?1", [id])?;
        Ok(n > 0)
    }

    /// `(unread, unhandled)` across the whole table.
    pub async fn status_counts(&self) -> StoreResult<(i64, i64)> {
        let conn = self.lock().await?;
        let counts = conn.query_row(
            r#"
SELECT
  COALESCE(SUM(CASE WHEN State = ?1 THEN 1 ELSE 0 END), 0),
  COALESCE(SUM(CASE WHEN State = ?2 THEN 1 ELSE 0 END), 0)
FROM Reports
"#,
            (
                ReportStatus::Unread.as_i64(),
                ReportStatus::Unhandled.as_i64(),
            ),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(counts)
    }

    pub async fn is_empty(&self) -> StoreResult<bool> {
        let conn = self.lock().await?;
        Ok(table_is_empty(&conn)?)
    }

    /// Resets the id counter so the next report gets id 1.
    ///
    /// Fails with [`StoreError::NotEmpty`] unless the table has no rows.
    pub async fn reseed(&self) -> StoreResult<()> {
        let conn = self.lock().await?;
        if !table_is_empty(&conn)? {
            return Err(StoreError::NotEmpty);
        }
        conn.execute("DELETE FROM sqlite_sequence WHERE name = 'Reports'", [])?;
        Ok(())
    }
}

const SELECT_REPORTS: &str =
    "SELECT ReportID, UserID, ReportedID, Message, Position, State, Created FROM Reports";

fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS Reports (
  ReportID INTEGER PRIMARY KEY AUTOINCREMENT,
  UserID INTEGER NOT NULL,
  ReportedID INTEGER NOT NULL DEFAULT -1,
  Message TEXT NOT NULL,
  Position TEXT NOT NULL,
  State INTEGER NOT NULL DEFAULT 0,
  Created INTEGER
);
"#,
    )?;
    ensure_reports_columns(conn)
}

// Tables written by the older expiry-counter layout carry `Time` instead of
// `State`. Their rows come in as unread; `Time` is left untouched and unused.
fn ensure_reports_columns(conn: &Connection) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(Reports)")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut cols: HashSet<String> = HashSet::new();
    for r in rows {
        cols.insert(r?);
    }

    if !cols.contains("State") {
        conn.execute(
            "ALTER TABLE Reports ADD COLUMN State INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    if !cols.contains("Created") {
        conn.execute("ALTER TABLE Reports ADD COLUMN Created INTEGER", [])?;
    }

    Ok(())
}

fn insert_report(
    conn: &Connection,
    reporter_user_id: i64,
    reported_user_id: Option<i64>,
    message: &str,
    position: Position,
    status: ReportStatus,
    created_time: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO Reports (UserID, ReportedID, Message, Position, State, Created) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        (
            reporter_user_id,
            reported_user_id.unwrap_or(NO_REPORTED_USER),
            message,
            position.to_string(),
            status.as_i64(),
            created_time,
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

fn list_reports(conn: &Connection) -> rusqlite::Result<Vec<Report>> {
    let mut stmt = conn.prepare(&format!("{SELECT_REPORTS} ORDER BY ReportID"))?;
    let rows = stmt.query_map([], report_from_row)?;

    let mut out = Vec::new();
    for r in rows {
        match r {
            Ok(report) => out.push(report),
            Err(
                err @ (rusqlite::Error::FromSqlConversionFailure(..)
                | rusqlite::Error::IntegralValueOutOfRange(..)
                | rusqlite::Error::InvalidColumnType(..)),
            ) => warn!("skipping undecodable report row: {err}"),
            Err(err) => return Err(err),
        }
    }
    Ok(out)
}

fn report_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Report> {
    let reported: i64 = row.get(2)?;
    let position_text: String = row.get(4)?;
    let position = position_text
        .parse::<Position>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    let state: i64 = row.get(5)?;
    let status = ReportStatus::from_i64(state).ok_or(rusqlite::Error::IntegralValueOutOfRange(
        5, state,
    ))?;
    Ok(Report {
        id: row.get(0)?,
        reporter_user_id: row.get(1)?,
        reported_user_id: (reported != NO_REPORTED_USER).then_some(reported),
        message: row.get(3)?,
        position,
        status,
        created_time: row.get(6)?,
    })
}

fn table_is_empty(conn: &Connection) -> rusqlite::Result<bool> {
    let any: bool = conn.query_row("SELECT EXISTS(SELECT 1 FROM Reports)", [], |row| {
        row.get(0)
    })?;
    Ok(!any)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn file(store: &ReportStore, reporter: i64, reported: Option<i64>, msg: &str) -> i64 {
        store
            .insert(
                reporter,
                reported,
                msg,
                Position::new(10.0, 20.5),
                ReportStatus::Unread,
                1_700_000_000,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn insert_adds_exactly_one_unread_row() {
        let store = ReportStore::open_in_memory().unwrap();
        file(&store, 1, Some(2), "griefing").await;
        let before = store.fetch_all().await.unwrap();

        let id = file(&store, 3, None, "lava at spawn").await;
        let after = store.fetch_all().await.unwrap();
        assert_eq!(after.len(), before.len() + 1);

        let row = after.iter().find(|r| r.id == id).unwrap();
        assert_eq!(
            row,
            &Report {
                id,
                reporter_user_id: 3,
                reported_user_id: None,
                message: "lava at spawn".to_string(),
                position: Position::new(10.0, 20.5),
                status: ReportStatus::Unread,
                created_time: Some(1_700_000_000),
            }
        );
        assert_eq!(store.latest_id_for(3, "lava at spawn").await.unwrap(), Some(id));
        assert_eq!(store.latest_id_for(3, "other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn reported_none_is_stored_as_minus_one() {
        let store = ReportStore::open_in_memory().unwrap();
        let id = file(&store, 1, None, "note").await;
        let conn = store.conn.lock().await;
        let raw: i64 = conn
            .query_row("SELECT ReportedID FROM Reports WHERE ReportID = ?1", [id], |r| r.get(0))
            .unwrap();
        assert_eq!(raw, -1);
    }

    #[tokio::test]
    async fn mark_viewed_only_moves_unread() {
        let store = ReportStore::open_in_memory().unwrap();
        let id = file(&store, 1, None, "x").await;

        assert!(store.mark_viewed(id).await.unwrap());
        assert!(!store.mark_viewed(id).await.unwrap());
        assert_eq!(store.get(id).await.unwrap().unwrap().status, ReportStatus::Unhandled);

        assert!(store.set_status(id, ReportStatus::Handled).await.unwrap());
        assert!(!store.mark_viewed(id).await.unwrap());
        assert_eq!(store.get(id).await.unwrap().unwrap().status, ReportStatus::Handled);
    }

    #[tokio::test]
    async fn missing_ids_report_false() {
        let store = ReportStore::open_in_memory().unwrap();
        assert!(!store.delete(42).await.unwrap());
        assert!(!store.set_status(42, ReportStatus::Handled).await.unwrap());
        assert!(store.get(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_counts_cover_whole_table() {
        let store = ReportStore::open_in_memory().unwrap();
        assert_eq!(store.status_counts().await.unwrap(), (0, 0));
        let a = file(&store, 1, None, "a").await;
        let b = file(&store, 1, None, "b").await;
        file(&store, 1, None, "c").await;
        store.mark_viewed(a).await.unwrap();
        store.set_status(b, ReportStatus::Handled).await.unwrap();
        assert_eq!(store.status_counts().await.unwrap(), (1, 1));
    }

    #[tokio::test]
    async fn reseed_requires_empty_table() {
        let store = ReportStore::open_in_memory().unwrap();
        let first = file(&store, 1, None, "a").await;
        let second = file(&store, 1, None, "b").await;
        assert_eq!((first, second), (1, 2));

        assert!(matches!(store.reseed().await, Err(StoreError::NotEmpty)));
        assert_eq!(store.fetch_all().await.unwrap().len(), 2);

        store.delete(first).await.unwrap();
        store.delete(second).await.unwrap();
        assert_eq!(file(&store, 1, None, "c").await, 3);
        store.delete(3).await.unwrap();

        assert!(store.is_empty().await.unwrap());
        store.reseed().await.unwrap();
        assert_eq!(file(&store, 1, None, "d").await, 1);
    }

    #[tokio::test]
    async fn reseed_on_fresh_table_succeeds() {
        let store = ReportStore::open_in_memory().unwrap();
        store.reseed().await.unwrap();
        assert_eq!(file(&store, 1, None, "a").await, 1);
    }

    #[tokio::test]
    async fn legacy_time_table_is_migrated() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
CREATE TABLE Reports (
  ReportID INTEGER PRIMARY KEY AUTOINCREMENT,
  UserID INTEGER,
  ReportedID INTEGER,
  Message TEXT,
  Position TEXT,
  Time INTEGER
);
INSERT INTO Reports (UserID, ReportedID, Message, Position, Time) VALUES (5, -1, 'old', '1:2', 300);
"#,
        )
        .unwrap();

        let store = ReportStore::from_connection(conn, Duration::from_secs(1)).unwrap();
        store.ensure_schema().await.unwrap();
        let rows = store.fetch_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ReportStatus::Unread);
        assert_eq!(rows[0].created_time, None);
        assert_eq!(rows[0].position, Position::new(1.0, 2.0));
    }

    #[tokio::test]
    async fn corrupt_rows_are_skipped_by_listing() {
        let store = ReportStore::open_in_memory().unwrap();
        let good = file(&store, 1, None, "fine").await;
        let bad = {
            let conn = store.conn.lock().await;
            conn.execute(
                "INSERT INTO Reports (UserID, ReportedID, Message, Position, State) VALUES (1, -1, 'm', 'inf:0', 0)",
                [],
            )
            .unwrap();
            conn.last_insert_rowid()
        };

        let rows = store.fetch_all().await.unwrap();
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![good]);
        assert!(matches!(store.get(bad).await, Err(StoreError::Sqlite(_))));
        assert!(store.delete(bad).await.unwrap());
    }

    #[tokio::test]
    async fn non_finite_position_is_refused() {
        let store = ReportStore::open_in_memory().unwrap();
        let err = store
            .insert(
                1,
                None,
                "lava",
                Position::new(f32::INFINITY, 0.0),
                ReportStatus::Unread,
                0,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPosition(_)));
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn busy_connection_times_out() {
        let store = ReportStore::open_in_memory().unwrap();
        store
            .set_query_timeout(Duration::from_millis(20))
            .await
            .unwrap();
        let _held = store.conn.lock().await;
        assert!(matches!(
            store.is_empty().await,
            Err(StoreError::Timeout(_))
        ));
    }
}
