use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

/// Name of the per-day screenshot directory, e.g. `2025-03-15`.
pub fn date_to_day_dir_name(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn day_dir_name_to_date(name: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(name, "%Y-%m-%d").ok()
}

/// Returns start of the next day.
pub fn next_day_start<Tz: TimeZone>(date: DateTime<Tz>) -> DateTime<Tz> {
    let next = date + Duration::days(1);
    next.clone().with_time(NaiveTime::MIN).earliest().unwrap_or(next)
}

/// Unix epoch seconds with sub-second precision. Timestamps are persisted in this form.
pub fn to_epoch_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.
}

pub fn from_epoch_seconds(seconds: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis((seconds * 1000.).round() as i64)
}

/// Start of the minute `time` falls into, in epoch seconds: `floor(epoch / 60) * 60`.
pub fn minute_bucket(time: DateTime<Utc>) -> i64 {
    time.timestamp().div_euclid(60) * 60
}
