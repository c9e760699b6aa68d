use std::{
    ops::{Add, AddAssign},
    path::PathBuf,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Continuous work on a single inferred project. `ended_at` stays empty while the window is open.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct ActivityWindow {
    pub id: Option<i64>,
    pub project: Option<Arc<str>>,
    pub window_title: Arc<str>,
    pub app_name: Arc<str>,
    pub confidence: f64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ActivityWindow {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Duration of the window, counting an open window up to `now`.
    pub fn duration_until(&self, now: DateTime<Utc>) -> chrono::Duration {
        (self.ended_at.unwrap_or(now) - self.started_at).max(chrono::Duration::zero())
    }
}

/// Input counts collected over some span of time. Only counts are ever kept, never content.
#[derive(Default, PartialEq, Eq, Debug, Serialize, Deserialize, Clone, Copy)]
pub struct InputCounts {
    pub keystrokes: u64,
    pub mouse_moves: u64,
    pub mouse_clicks: u64,
    pub scroll_events: u64,
}

impl InputCounts {
    pub fn is_empty(&self) -> bool {
        *self == InputCounts::default()
    }
}

impl Add for InputCounts {
    type Output = InputCounts;

    fn add(self, rhs: Self) -> Self::Output {
        InputCounts {
            keystrokes: self.keystrokes.saturating_add(rhs.keystrokes),
            mouse_moves: self.mouse_moves.saturating_add(rhs.mouse_moves),
            mouse_clicks: self.mouse_clicks.saturating_add(rhs.mouse_clicks),
            scroll_events: self.scroll_events.saturating_add(rhs.scroll_events),
        }
    }
}

impl AddAssign for InputCounts {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Input counts of one minute. `minute_bucket` is the epoch second the minute starts at.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone, Copy)]
pub struct InputAggregate {
    pub minute_bucket: i64,
    pub counts: InputCounts,
}

/// Time the user spent away from the keyboard.
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct PresencePeriod {
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_s: Option<f64>,
    /// Whether the watched external process was running when the period was last sampled.
    pub claude_active: bool,
}

/// Screen rectangle in pixels.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone, Copy)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Square of side `size` centered on `(x, y)`, clamped so it never starts at negative
    /// coordinates.
    pub fn around(x: i32, y: i32, size: u32) -> Self {
        let half = (size / 2) as i32;
        Region {
            x: (x - half).max(0),
            y: (y - half).max(0),
            width: size,
            height: size,
        }
    }
}

#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct ScreenshotRecord {
    pub filepath: PathBuf,
    pub project: Option<Arc<str>>,
    pub timestamp: DateTime<Utc>,
    pub region: Region,
}

/// Rows closed while recovering from an unclean shutdown.
#[derive(PartialEq, Eq, Debug, Default, Clone, Copy)]
pub struct RecoveredRows {
    pub windows: usize,
    pub presence_periods: usize,
}
