//! Bar period and inclusive date ranges.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// Bar period. Wire strings follow the usual market-data convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1d")]
    Daily,
    #[serde(rename = "1w")]
    Weekly,
    #[serde(rename = "1M")]
    Monthly,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::Daily, Period::Weekly, Period::Monthly];

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Daily => "1d",
            Period::Weekly => "1w",
            Period::Monthly => "1M",
        }
    }

    /// Key of the calendar bucket a date falls into: the date itself for daily
    /// bars, the Monday of its ISO week, or the first of its month.
    pub fn bucket(self, date: NaiveDate) -> NaiveDate {
        match self {
            Period::Daily => date,
            Period::Weekly => date - Duration::days(date.weekday().num_days_from_monday() as i64),
            Period::Monthly => date.with_day(1).unwrap_or(date),
        }
    }

    /// Last calendar day of the bucket `date` falls into.
    pub fn bucket_end(self, date: NaiveDate) -> NaiveDate {
        match self {
            Period::Daily => date,
            Period::Weekly => self.bucket(date) + Duration::days(6),
            Period::Monthly => {
                let (y, m) = if date.month() == 12 {
                    (date.year() + 1, 1)
                } else {
                    (date.year(), date.month() + 1)
                };
                NaiveDate::from_ymd_opt(y, m, 1)
                    .and_then(|next| next.pred_opt())
                    .unwrap_or(date)
            }
        }
    }

    /// Maximum calendar-day distance between two missing points that still
    /// belong to the same download segment.
    pub fn segment_merge_gap_days(self) -> i64 {
        match self {
            Period::Daily => 3,
            Period::Weekly => 10,
            Period::Monthly => 35,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1d" | "daily" => Ok(Period::Daily),
            "1w" | "weekly" => Ok(Period::Weekly),
            "1M" | "monthly" => Ok(Period::Monthly),
            other => Err(format!("unknown period '{other}' (expected 1d, 1w or 1M)")),
        }
    }
}

/// Inclusive `[start, end]` date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DataError> {
        if start > end {
            return Err(DataError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Number of calendar days covered, both ends included.
    pub fn calendar_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}
