use std::{fs, io, path::PathBuf};

use chrono::{DateTime, Duration, Local, NaiveTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    daemon::storage::activity_store::ActivityStore,
    utils::time::{date_to_day_dir_name, day_dir_name_to_date},
};

pub const SCREENSHOTS_DIR_NAME: &str = "screenshots";

/// Directory tree of captured screenshots: one directory per local day, one `HHMMSS.jpg` file per
/// capture.
pub struct ScreenshotArena {
    root: PathBuf,
}

#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct PurgeReport {
    pub removed_dirs: usize,
    pub removed_rows: usize,
}

impl ScreenshotArena {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Destination for a capture taken at `time`. Creates the day directory when missing.
    pub fn path_for(&self, time: DateTime<Utc>) -> io::Result<PathBuf> {
        let local = time.with_timezone(&Local);
        let day_dir = self.root.join(date_to_day_dir_name(local.date_naive()));
        fs::create_dir_all(&day_dir)?;
        Ok(day_dir.join(format!("{}.jpg", local.format("%H%M%S"))))
    }

    /// Removes day directories whose start lies before `now - retention_days`. Entries that are
    /// not day directories are left alone.
    pub fn purge_older_than(&self, retention_days: u32, now: DateTime<Utc>) -> io::Result<usize> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };
        let cutoff = retention_cutoff(retention_days, now)
            .with_timezone(&Local)
            .naive_local();

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(date) = entry.file_name().to_str().and_then(day_dir_name_to_date) else {
                continue;
            };
            if date.and_time(NaiveTime::MIN) < cutoff {
                debug!("Removing screenshot directory {:?}", entry.path());
                fs::remove_dir_all(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

pub fn retention_cutoff(retention_days: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(retention_days as i64)
}

/// Drops screenshot files and their rows older than the retention window. Failures on either
/// side are logged and do not stop the other.
pub fn purge_expired(
    arena: &ScreenshotArena,
    store: &mut dyn ActivityStore,
    retention_days: u32,
    now: DateTime<Utc>,
) -> PurgeReport {
    let mut report = PurgeReport::default();
    match arena.purge_older_than(retention_days, now) {
        Ok(removed) => report.removed_dirs = removed,
        Err(e) => warn!("Failed to purge screenshot directories {e}"),
    }
    match store.delete_screenshots_before(retention_cutoff(retention_days, now)) {
        Ok(removed) => report.removed_rows = removed,
        Err(e) => warn!("Failed to purge screenshot rows {e}"),
    }
    info!(
        "Purged {} screenshot directories and {} rows",
        report.removed_dirs, report.removed_rows
    );
    report
}
