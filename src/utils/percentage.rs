use std::{fmt::Display, ops::Deref, str::FromStr};

use anyhow::anyhow;
use chrono::Duration;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Percentage(f64);

impl Display for Percentage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}

impl Percentage {
    pub fn new_opt(value: f64) -> Option<Percentage> {
        if value < 0. || value.is_nan() {
            None
        } else {
            Some(Percentage(value))
        }
    }
}

impl FromStr for Percentage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end_matches("%");
        let v = s.parse::<f64>()?;
        Percentage::new_opt(v).ok_or_else(|| anyhow!("Can't parse {s} into percentage"))
    }
}

impl Deref for Percentage {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Share of `whole` taken by `value`. An empty `whole` yields 0% rather than NaN, since a day
/// without tracked time is a normal report.
pub fn duration_percentage(value: Duration, whole: Duration) -> Percentage {
    if whole.num_milliseconds() <= 0 {
        return Percentage(0.);
    }
    Percentage(
        (value.num_milliseconds() as f64 / whole.num_milliseconds() as f64 * 100.).max(0.),
    )
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::{duration_percentage, Percentage};

    #[test]
    fn test_percentage_parsing() {
        assert_eq!("12.5%".parse::<Percentage>().ok(), Percentage::new_opt(12.5));
        assert!("-1".parse::<Percentage>().is_err());
    }

    #[test]
    fn test_duration_percentage_of_empty_day() {
        assert_eq!(*duration_percentage(Duration::seconds(5), Duration::zero()), 0.);
        assert_eq!(
            *duration_percentage(Duration::seconds(15), Duration::seconds(60)),
            25.
        );
    }
}
