use std::{path::Path, sync::Arc};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::utils::time::{from_epoch_seconds, to_epoch_seconds};

use super::entities::{
    ActivityWindow, InputAggregate, InputCounts, PresencePeriod, RecoveredRows, Region,
    ScreenshotRecord,
};

pub const DB_FILE_NAME: &str = "tracking.db";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS activity_windows (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project TEXT,
        window_title TEXT NOT NULL DEFAULT '',
        app_name TEXT NOT NULL DEFAULT '',
        confidence REAL NOT NULL DEFAULT 0,
        started_at REAL NOT NULL,
        ended_at REAL
    );
    CREATE INDEX IF NOT EXISTS idx_activity_windows_started ON activity_windows(started_at);
    CREATE TABLE IF NOT EXISTS screenshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        filepath TEXT NOT NULL,
        project TEXT,
        timestamp REAL NOT NULL,
        region_x INTEGER NOT NULL,
        region_y INTEGER NOT NULL,
        region_w INTEGER NOT NULL,
        region_h INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_screenshots_timestamp ON screenshots(timestamp);
    CREATE TABLE IF NOT EXISTS input_activity (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        minute INTEGER NOT NULL UNIQUE,
        keystrokes INTEGER NOT NULL DEFAULT 0,
        mouse_moves INTEGER NOT NULL DEFAULT 0,
        mouse_clicks INTEGER NOT NULL DEFAULT 0,
        scroll_events INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS afk_periods (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at REAL NOT NULL,
        ended_at REAL,
        duration_s REAL,
        claude_active BOOLEAN NOT NULL DEFAULT FALSE
    );
    CREATE INDEX IF NOT EXISTS idx_afk_periods_started ON afk_periods(started_at);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),
    #[error("No open {0} matched the update")]
    NoOpenRow(&'static str),
}

/// Write side of the activity time-series. There is exactly one writer, the control loop, and
/// every call commits before returning.
#[cfg_attr(test, mockall::automock)]
pub trait ActivityStore {
    /// Inserts `window` as an open row and returns its id.
    fn open_window(&mut self, window: &ActivityWindow) -> Result<i64, StoreError>;

    fn close_window(&mut self, id: i64, ended_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Adds `aggregate` to its minute bucket, creating the bucket if absent.
    fn merge_input(&mut self, aggregate: &InputAggregate) -> Result<(), StoreError>;

    fn insert_screenshot(&mut self, record: &ScreenshotRecord) -> Result<i64, StoreError>;

    fn open_presence(
        &mut self,
        started_at: DateTime<Utc>,
        claude_active: bool,
    ) -> Result<i64, StoreError>;

    /// Closes the open period that started at `started_at`.
    fn close_presence(
        &mut self,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        duration_s: f64,
        claude_active: bool,
    ) -> Result<(), StoreError>;

    fn delete_screenshots_before(&mut self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Closes rows a previous run left open.
    fn close_dangling(&mut self) -> Result<RecoveredRows, StoreError>;
}

pub struct SqliteActivityStore {
    conn: Connection,
}

impl SqliteActivityStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        if let Err(e) =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        {
            error!("Failed to enable WAL mode {e}");
        }
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Windows sharing any time with `[from, to)`, oldest first. Open windows overlap everything
    /// after their start.
    pub fn windows_overlapping(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ActivityWindow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project, window_title, app_name, confidence, started_at, ended_at
             FROM activity_windows
             WHERE started_at < ?2 AND (ended_at IS NULL OR ended_at > ?1)
             ORDER BY started_at, id",
        )?;
        let rows = stmt.query_map(params![to_epoch_seconds(from), to_epoch_seconds(to)], window_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn open_windows(&self) -> Result<Vec<ActivityWindow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project, window_title, app_name, confidence, started_at, ended_at
             FROM activity_windows
             WHERE ended_at IS NULL
             ORDER BY started_at, id",
        )?;
        let rows = stmt.query_map([], window_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn input_bucket(&self, minute_bucket: i64) -> Result<Option<InputAggregate>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT minute, keystrokes, mouse_moves, mouse_clicks, scroll_events
                 FROM input_activity WHERE minute = ?1",
                params![minute_bucket],
                aggregate_from_row,
            )
            .optional()?)
    }

    /// Buckets within `[from, to)`, oldest first.
    pub fn input_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<InputAggregate>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT minute, keystrokes, mouse_moves, mouse_clicks, scroll_events
             FROM input_activity
             WHERE minute >= ?1 AND minute < ?2
             ORDER BY minute",
        )?;
        let rows = stmt.query_map(params![from.timestamp(), to.timestamp()], aggregate_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Away periods sharing any time with `[from, to)`.
    pub fn presence_overlapping(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PresencePeriod>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT started_at, ended_at, duration_s, claude_active
             FROM afk_periods
             WHERE started_at < ?2 AND (ended_at IS NULL OR ended_at > ?1)
             ORDER BY started_at, id",
        )?;
        let rows = stmt.query_map(params![to_epoch_seconds(from), to_epoch_seconds(to)], presence_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn screenshots_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ScreenshotRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT filepath, project, timestamp, region_x, region_y, region_w, region_h
             FROM screenshots
             WHERE timestamp >= ?1 AND timestamp < ?2
             ORDER BY timestamp, id",
        )?;
        let rows = stmt.query_map(params![to_epoch_seconds(from), to_epoch_seconds(to)], |row| {
            Ok(ScreenshotRecord {
                filepath: row.get::<_, String>(0)?.into(),
                project: row.get::<_, Option<String>>(1)?.map(Arc::from),
                timestamp: timestamp_column(row, 2)?,
                region: Region {
                    x: row.get(3)?,
                    y: row.get(4)?,
                    width: row.get(5)?,
                    height: row.get(6)?,
                },
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl ActivityStore for SqliteActivityStore {
    #[instrument(skip(self))]
    fn open_window(&mut self, window: &ActivityWindow) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO activity_windows (project, window_title, app_name, confidence, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                window.project.as_deref(),
                &*window.window_title,
                &*window.app_name,
                window.confidence,
                to_epoch_seconds(window.started_at),
                window.ended_at.map(to_epoch_seconds),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    #[instrument(skip(self))]
    fn close_window(&mut self, id: i64, ended_at: DateTime<Utc>) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE activity_windows SET ended_at = ?2 WHERE id = ?1 AND ended_at IS NULL",
            params![id, to_epoch_seconds(ended_at)],
        )?;
        if changed == 0 {
            return Err(StoreError::NoOpenRow("activity window"));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn merge_input(&mut self, aggregate: &InputAggregate) -> Result<(), StoreError> {
        let counts = &aggregate.counts;
        self.conn.execute(
            "INSERT INTO input_activity (minute, keystrokes, mouse_moves, mouse_clicks, scroll_events)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(minute) DO UPDATE SET
                keystrokes = keystrokes + excluded.keystrokes,
                mouse_moves = mouse_moves + excluded.mouse_moves,
                mouse_clicks = mouse_clicks + excluded.mouse_clicks,
                scroll_events = scroll_events + excluded.scroll_events",
            params![
                aggregate.minute_bucket,
                count_to_sql(counts.keystrokes),
                count_to_sql(counts.mouse_moves),
                count_to_sql(counts.mouse_clicks),
                count_to_sql(counts.scroll_events),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn insert_screenshot(&mut self, record: &ScreenshotRecord) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO screenshots (filepath, project, timestamp, region_x, region_y, region_w, region_h)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.filepath.to_string_lossy(),
                record.project.as_deref(),
                to_epoch_seconds(record.timestamp),
                record.region.x,
                record.region.y,
                record.region.width,
                record.region.height,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    #[instrument(skip(self))]
    fn open_presence(
        &mut self,
        started_at: DateTime<Utc>,
        claude_active: bool,
    ) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO afk_periods (started_at, claude_active) VALUES (?1, ?2)",
            params![to_epoch_seconds(started_at), claude_active],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    #[instrument(skip(self))]
    fn close_presence(
        &mut self,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        duration_s: f64,
        claude_active: bool,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE afk_periods SET ended_at = ?2, duration_s = ?3, claude_active = ?4
             WHERE started_at = ?1 AND ended_at IS NULL",
            params![
                to_epoch_seconds(started_at),
                to_epoch_seconds(ended_at),
                duration_s,
                claude_active
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NoOpenRow("presence period"));
        }
        Ok(())
    }

    fn delete_screenshots_before(&mut self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM screenshots WHERE timestamp < ?1",
            params![to_epoch_seconds(cutoff)],
        )?;
        debug!("Deleted {deleted} screenshot rows older than {cutoff}");
        Ok(deleted)
    }

    fn close_dangling(&mut self) -> Result<RecoveredRows, StoreError> {
        let tx = self.conn.transaction()?;
        // An interrupted window ends at the last evidence captured while it was open.
        let windows = tx.execute(
            "UPDATE activity_windows
             SET ended_at = MAX(
                started_at,
                COALESCE(
                    (SELECT MAX(s.timestamp) FROM screenshots s
                     WHERE s.timestamp >= activity_windows.started_at),
                    started_at))
             WHERE ended_at IS NULL",
            [],
        )?;
        let presence_periods = tx.execute(
            "UPDATE afk_periods SET ended_at = started_at, duration_s = 0 WHERE ended_at IS NULL",
            [],
        )?;
        tx.commit()?;
        Ok(RecoveredRows {
            windows,
            presence_periods,
        })
    }
}

fn count_to_sql(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn count_from_sql(row: &Row, index: usize) -> rusqlite::Result<u64> {
    Ok(u64::try_from(row.get::<_, i64>(index)?).unwrap_or(0))
}

fn timestamp_column(row: &Row, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let seconds: f64 = row.get(index)?;
    from_epoch_seconds(seconds).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Real,
            format!("timestamp {seconds} is out of range").into(),
        )
    })
}

fn optional_timestamp_column(row: &Row, index: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<f64>>(index)? {
        Some(_) => timestamp_column(row, index).map(Some),
        None => Ok(None),
    }
}

fn window_from_row(row: &Row) -> rusqlite::Result<ActivityWindow> {
    Ok(ActivityWindow {
        id: Some(row.get(0)?),
        project: row.get::<_, Option<String>>(1)?.map(Arc::from),
        window_title: Arc::from(row.get::<_, String>(2)?),
        app_name: Arc::from(row.get::<_, String>(3)?),
        confidence: row.get(4)?,
        started_at: timestamp_column(row, 5)?,
        ended_at: optional_timestamp_column(row, 6)?,
    })
}

fn presence_from_row(row: &Row) -> rusqlite::Result<PresencePeriod> {
    Ok(PresencePeriod {
        started_at: timestamp_column(row, 0)?,
        ended_at: optional_timestamp_column(row, 1)?,
        duration_s: row.get(2)?,
        claude_active: row.get(3)?,
    })
}

fn aggregate_from_row(row: &Row) -> rusqlite::Result<InputAggregate> {
    Ok(InputAggregate {
        minute_bucket: row.get(0)?,
        counts: InputCounts {
            keystrokes: count_from_sql(row, 1)?,
            mouse_moves: count_from_sql(row, 2)?,
            mouse_clicks: count_from_sql(row, 3)?,
            scroll_events: count_from_sql(row, 4)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::tempdir;

    use crate::daemon::storage::entities::{
        ActivityWindow, InputAggregate, InputCounts, RecoveredRows, Region, ScreenshotRecord,
    };

    use super::{ActivityStore, SqliteActivityStore, StoreError, DB_FILE_NAME};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 7, 4, 10, 0, 0).unwrap()
    }

    fn window(project: Option<&str>, started_at: DateTime<Utc>) -> ActivityWindow {
        ActivityWindow {
            id: None,
            project: project.map(Arc::from),
            window_title: "main.rs - Project-Alpha".into(),
            app_name: "Code".into(),
            confidence: 0.85,
            started_at,
            ended_at: None,
        }
    }

    fn counts(keystrokes: u64, clicks: u64) -> InputCounts {
        InputCounts {
            keystrokes,
            mouse_moves: 0,
            mouse_clicks: clicks,
            scroll_events: 0,
        }
    }

    #[test]
    fn test_window_open_close_roundtrip() -> Result<()> {
        let mut store = SqliteActivityStore::open_in_memory()?;
        let id = store.open_window(&window(Some("Project-Alpha"), start()))?;
        assert_eq!(store.open_windows()?.len(), 1);

        store.close_window(id, start() + Duration::seconds(40))?;
        assert!(store.open_windows()?.is_empty());

        let stored = store.windows_overlapping(start(), start() + Duration::hours(1))?;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].project.as_deref(), Some("Project-Alpha"));
        assert_eq!(stored[0].ended_at, Some(start() + Duration::seconds(40)));
        Ok(())
    }

    #[test]
    fn test_window_is_closed_only_once() -> Result<()> {
        let mut store = SqliteActivityStore::open_in_memory()?;
        let id = store.open_window(&window(None, start()))?;
        store.close_window(id, start() + Duration::seconds(1))?;
        assert!(matches!(
            store.close_window(id, start() + Duration::seconds(2)),
            Err(StoreError::NoOpenRow(_))
        ));
        Ok(())
    }

    #[test]
    fn test_input_merge_adds_to_same_bucket() -> Result<()> {
        let mut store = SqliteActivityStore::open_in_memory()?;
        let bucket = start().timestamp();
        store.merge_input(&InputAggregate {
            minute_bucket: bucket,
            counts: counts(10, 1),
        })?;
        store.merge_input(&InputAggregate {
            minute_bucket: bucket,
            counts: counts(5, 2),
        })?;

        let stored = store.input_bucket(bucket)?.unwrap();
        assert_eq!(stored.counts.keystrokes, 15);
        assert_eq!(stored.counts.mouse_clicks, 3);
        assert_eq!(store.input_between(start(), start() + Duration::minutes(1))?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_input_merge_is_commutative() -> Result<()> {
        let a = counts(7, 0);
        let b = counts(3, 4);
        let bucket = start().timestamp();

        let mut first = SqliteActivityStore::open_in_memory()?;
        let mut second = SqliteActivityStore::open_in_memory()?;
        for (store, order) in [(&mut first, [a, b]), (&mut second, [b, a])] {
            for counts in order {
                store.merge_input(&InputAggregate {
                    minute_bucket: bucket,
                    counts,
                })?;
            }
        }

        assert_eq!(first.input_bucket(bucket)?, second.input_bucket(bucket)?);
        Ok(())
    }

    #[test]
    fn test_presence_period_matched_by_start() -> Result<()> {
        let mut store = SqliteActivityStore::open_in_memory()?;
        let afk_start = start() + Duration::milliseconds(1234);
        store.open_presence(afk_start, false)?;
        store.close_presence(afk_start, afk_start + Duration::seconds(185), 185., true)?;

        let periods = store.presence_overlapping(start(), start() + Duration::hours(1))?;
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].duration_s, Some(185.));
        assert!(periods[0].claude_active);

        assert!(store
            .close_presence(afk_start, afk_start + Duration::seconds(200), 200., false)
            .is_err());
        Ok(())
    }

    #[test]
    fn test_close_dangling_uses_last_screenshot() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(DB_FILE_NAME);
        {
            let mut store = SqliteActivityStore::open(&path)?;
            store.open_window(&window(Some("Project-Alpha"), start()))?;
            store.insert_screenshot(&ScreenshotRecord {
                filepath: "shot.jpg".into(),
                project: Some("Project-Alpha".into()),
                timestamp: start() + Duration::seconds(60),
                region: Region::around(500, 500, 400),
            })?;
            store.open_presence(start() + Duration::seconds(90), false)?;
        }

        let mut store = SqliteActivityStore::open(&path)?;
        let recovered = store.close_dangling()?;
        assert_eq!(
            recovered,
            RecoveredRows {
                windows: 1,
                presence_periods: 1
            }
        );
        assert!(store.open_windows()?.is_empty());
        let windows = store.windows_overlapping(start(), start() + Duration::hours(1))?;
        assert_eq!(windows[0].ended_at, Some(start() + Duration::seconds(60)));
        Ok(())
    }

    #[test]
    fn test_delete_screenshots_before_cutoff() -> Result<()> {
        let mut store = SqliteActivityStore::open_in_memory()?;
        for days in [10, 8, 1] {
            store.insert_screenshot(&ScreenshotRecord {
                filepath: format!("{days}.jpg").into(),
                project: None,
                timestamp: start() - Duration::days(days),
                region: Region::around(0, 0, 400),
            })?;
        }

        let deleted = store.delete_screenshots_before(start() - Duration::days(7))?;
        assert_eq!(deleted, 2);
        let left = store.screenshots_between(start() - Duration::days(30), start())?;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].filepath, std::path::PathBuf::from("1.jpg"));
        Ok(())
    }
}
