//! Reporting periods: ISO weeks (`2026-W41`) and calendar months (`2026-10`).

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Week,
    Month,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid period key {0:?}: expected YYYY-Www or YYYY-MM")]
pub struct PeriodParseError(pub String);

/// A closed date range identified by a period key.
///
/// Only the first day is stored; the rest is derived, so every `Period`
/// value is valid by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    start: NaiveDate,
    granularity: Granularity,
}

impl Period {
    pub fn containing(date: NaiveDate, granularity: Granularity) -> Self {
        let start = match granularity {
            Granularity::Week => {
                date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
            }
            Granularity::Month => date - Duration::days(i64::from(date.day0())),
        };
        Self { start, granularity }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last day of the period, inclusive.
    pub fn end(&self) -> NaiveDate {
        match self.granularity {
            Granularity::Week => self.start + Duration::days(6),
            // 31 days past the 1st always lands in the following month.
            Granularity::Month => {
                Period::containing(self.start + Duration::days(31), Granularity::Month).start
                    - Duration::days(1)
            }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end()
    }

    pub fn previous(&self) -> Self {
        Period::containing(self.start - Duration::days(1), self.granularity)
    }

    pub fn next(&self) -> Self {
        Period::containing(self.end() + Duration::days(1), self.granularity)
    }

    /// The `n` periods ending with `self`, oldest first.
    pub fn trailing(&self, n: usize) -> Vec<Period> {
        let mut out = Vec::with_capacity(n);
        let mut current = *self;
        for _ in 0..n {
            out.push(current);
            current = current.previous();
        }
        out.reverse();
        out
    }

    pub fn key(&self) -> String {
        match self.granularity {
            Granularity::Week => {
                let iso = self.start.iso_week();
                format!("{}-W{:02}", iso.year(), iso.week())
            }
            Granularity::Month => format!("{:04}-{:02}", self.start.year(), self.start.month()),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

fn digits(text: &str, len: usize) -> Option<u32> {
    if text.len() == len && text.bytes().all(|b| b.is_ascii_digit()) {
        text.parse().ok()
    } else {
        None
    }
}

/// Only canonical keys parse, so a parsed period always renders back to the
/// text it came from.
impl FromStr for Period {
    type Err = PeriodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || PeriodParseError(s.to_string());

        if let Some((year, week)) = s.split_once("-W") {
            let year = digits(year, 4).ok_or_else(err)?;
            let week = digits(week, 2).ok_or_else(err)?;
            let start = NaiveDate::from_isoywd_opt(year as i32, week, Weekday::Mon).ok_or_else(err)?;
            return Ok(Self {
                start,
                granularity: Granularity::Week,
            });
        }

        let (year, month) = s.split_once('-').ok_or_else(err)?;
        let year = digits(year, 4).ok_or_else(err)?;
        let month = digits(month, 2).ok_or_else(err)?;
        let start = NaiveDate::from_ymd_opt(year as i32, month, 1).ok_or_else(err)?;
        Ok(Self {
            start,
            granularity: Granularity::Month,
        })
    }
}

impl TryFrom<String> for Period {
    type Error = PeriodParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(value: Period) -> Self {
        value.key()
    }
}

/// Inclusive business-date window a sync run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, crate::SyncError> {
        if start > end {
            return Err(crate::SyncError::InvalidInput(format!(
                "window start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn single_day(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Distinct periods touched by the window, oldest first.
    pub fn periods(&self, granularity: Granularity) -> Vec<Period> {
        let mut out = Vec::new();
        let mut current = Period::containing(self.start, granularity);
        while current.start() <= self.end {
            out.push(current);
            current = current.next();
        }
        out
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
