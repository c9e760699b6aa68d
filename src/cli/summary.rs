use std::{collections::HashMap, fmt::Display, path::Path};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use chrono_english::parse_date_string;
use clap::{CommandFactory, Parser, ValueEnum};
use now::DateTimeNow;
use serde::Serialize;

use crate::{
    daemon::storage::{
        activity_store::{SqliteActivityStore, DB_FILE_NAME},
        entities::InputCounts,
    },
    utils::{
        percentage::{duration_percentage, Percentage},
        time::next_day_start,
    },
};

use super::Args;

const UNKNOWN_PROJECT: &str = "unknown";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

#[derive(Debug, Parser)]
pub struct TodayCommand {
    #[arg(
        long,
        short,
        help = "Day to summarize instead of today. Examples are \"yesterday\", \"15/03/2025\""
    )]
    date: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
    #[arg(
        short = 'p',
        long = "percentage",
        help = "Hide projects below this share of tracked time",
        default_value = "0%"
    )]
    min_percentage: Percentage,
    #[arg(long, help = "Print the summary as JSON")]
    json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectTime {
    pub project: String,
    pub seconds: f64,
}

/// Totals of one day of tracking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    /// Tracked time per project, longest first.
    pub projects: Vec<ProjectTime>,
    pub tracked_seconds: f64,
    pub afk_seconds: f64,
    pub keystrokes: u64,
    pub mouse_clicks: u64,
    pub windows: usize,
}

/// Command to process `today`. Summarizes tracked time of a single local day.
pub fn process_today_command(
    TodayCommand {
        date,
        date_style,
        min_percentage,
        json,
    }: TodayCommand,
    dir: &Path,
) -> Result<()> {
    let start = parse_day(date, date_style)?;
    let end = next_day_start(start);

    let db = dir.join(DB_FILE_NAME);
    if !db.exists() {
        return Err(anyhow!("No tracking data in {dir:?}. Start tracking with `worktrace init`"));
    }
    let store = SqliteActivityStore::open(&db)?;
    let summary = summarize(
        &store,
        start.date_naive(),
        start.with_timezone(&Utc),
        end.with_timezone(&Utc),
        Utc::now(),
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, min_percentage);
    }
    Ok(())
}

fn parse_day(date: Option<String>, date_style: DateStyle) -> Result<DateTime<Local>> {
    let now = Local::now();
    let day = match date.map(|s| parse_date_string(&s, now, date_style.into())) {
        Some(Ok(v)) => v.with_timezone(&Local),
        Some(Err(e)) => {
            return Err(Args::command()
                .error(
                    clap::error::ErrorKind::ValueValidation,
                    format!("Failed to validate date {e}"),
                )
                .into());
        }
        None => now,
    };
    Ok(day.beginning_of_day())
}

/// Folds the rows overlapping `[start, end)` into a [DaySummary]. Only the part of a row inside
/// the day counts, and rows still open count up to `now`.
pub fn summarize(
    store: &SqliteActivityStore,
    date: NaiveDate,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<DaySummary> {
    let cap = now.min(end);
    let seconds_between = |from: DateTime<Utc>, to: Option<DateTime<Utc>>| {
        let from = from.max(start);
        let to = to.unwrap_or(cap).min(end);
        (to - from).max(Duration::zero()).num_milliseconds() as f64 / 1000.
    };

    let windows = store.windows_overlapping(start, end)?;
    let mut per_project: HashMap<String, f64> = HashMap::new();
    for window in &windows {
        let project = window.project.as_deref().unwrap_or(UNKNOWN_PROJECT);
        *per_project.entry(project.to_string()).or_default() +=
            seconds_between(window.started_at, window.ended_at);
    }
    let mut projects = per_project
        .into_iter()
        .map(|(project, seconds)| ProjectTime { project, seconds })
        .collect::<Vec<_>>();
    projects.sort_by(|a, b| {
        b.seconds
            .total_cmp(&a.seconds)
            .then_with(|| a.project.cmp(&b.project))
    });

    let afk_seconds: f64 = store
        .presence_overlapping(start, end)?
        .iter()
        .map(|period| seconds_between(period.started_at, period.ended_at))
        .sum();

    let input = store
        .input_between(start, end)?
        .into_iter()
        .fold(InputCounts::default(), |acc, bucket| acc + bucket.counts);

    Ok(DaySummary {
        date,
        tracked_seconds: projects.iter().map(|p| p.seconds).sum(),
        projects,
        afk_seconds,
        keystrokes: input.keystrokes,
        mouse_clicks: input.mouse_clicks,
        windows: windows.len(),
    })
}

fn print_summary(summary: &DaySummary, min_percentage: Percentage) {
    let tracked = seconds_to_duration(summary.tracked_seconds);
    println!("{}\ttracked {}", summary.date.format("%x"), format_duration(tracked));
    for entry in &summary.projects {
        let duration = seconds_to_duration(entry.seconds);
        let percentage = duration_percentage(duration, tracked);
        if percentage < min_percentage {
            continue;
        }
        println!(
            "{}%\t{}\t{}",
            *percentage as i32,
            format_duration(duration),
            entry.project
        );
    }
    println!();
    println!(
        "away\t{}",
        format_duration(seconds_to_duration(summary.afk_seconds))
    );
    println!("keystrokes\t{}", summary.keystrokes);
    println!("clicks\t{}", summary.mouse_clicks);
    println!("windows\t{}", summary.windows);
}

fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::milliseconds((seconds * 1000.) as i64)
}

fn format_duration(v: Duration) -> String {
    if v.num_hours() > 0 {
        format!(
            "{}h{}m{}s",
            v.num_hours(),
            v.num_minutes() % 60,
            v.num_seconds() % 60
        )
    } else if v.num_minutes() > 0 {
        format!("{}m{}s", v.num_minutes() % 60, v.num_seconds() % 60)
    } else {
        format!("{}s", v.num_seconds() % 60)
    }
}
