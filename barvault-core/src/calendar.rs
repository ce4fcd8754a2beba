//! Trading calendar: which dates are trading days.
//!
//! Weekends are never trading days. Exchange holidays are supplied by the
//! caller (inline, from a CSV file, or from a TOML table) and are never guessed.
//! A holiday source can declare `published_through`, the last date it is
//! authoritative for; beyond that date the calendar degrades to weekdays only
//! and `covers()` reports it so callers can flag the approximation.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::path::Path;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Deserialize;

use crate::domain::Period;
use crate::error::DataError;

/// A set of exchange holidays plus the horizon it was published for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HolidaySet {
    pub dates: BTreeSet<NaiveDate>,
    pub published_through: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct HolidayToml {
    #[serde(default)]
    holidays: Vec<NaiveDate>,
    #[serde(default)]
    published_through: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct HolidayRow {
    date: NaiveDate,
}

impl HolidaySet {
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            dates: dates.into_iter().collect(),
            published_through: None,
        }
    }

    pub fn with_published_through(mut self, date: NaiveDate) -> Self {
        self.published_through = Some(date);
        self
    }

    /// Parse `holidays = ["YYYY-MM-DD", ...]` with an optional
    /// `published_through = "YYYY-MM-DD"`.
    pub fn from_toml_str(content: &str) -> Result<Self, DataError> {
        let parsed: HolidayToml = toml::from_str(content)
            .map_err(|e| DataError::Calendar(format!("holiday table: {e}")))?;
        Ok(Self {
            dates: parsed.holidays.into_iter().collect(),
            published_through: parsed.published_through,
        })
    }

    pub fn from_toml_path(path: &Path) -> Result<Self, DataError> {
        let content = fs::read_to_string(path)
            .map_err(|e| DataError::Calendar(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Read a CSV with a `date` header column. Horizon defaults to the last
    /// listed holiday's year end.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, DataError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut dates = BTreeSet::new();
        for row in rdr.deserialize::<HolidayRow>() {
            let row = row.map_err(|e| DataError::Calendar(format!("holiday csv: {e}")))?;
            dates.insert(row.date);
        }
        let published_through = dates
            .iter()
            .next_back()
            .and_then(|d| NaiveDate::from_ymd_opt(d.year(), 12, 31));
        Ok(Self {
            dates,
            published_through,
        })
    }

    pub fn from_csv_path(path: &Path) -> Result<Self, DataError> {
        let file = fs::File::open(path)
            .map_err(|e| DataError::Calendar(format!("open {}: {e}", path.display())))?;
        Self::from_csv_reader(file)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// Trading calendar built from a weekend rule and a pluggable holiday set.
#[derive(Debug, Clone, Default)]
pub struct TradingCalendar {
    holidays: BTreeSet<NaiveDate>,
    published_through: Option<NaiveDate>,
}

impl TradingCalendar {
    /// Weekends only, no holidays. Authoritative for no date.
    pub fn weekends_only() -> Self {
        Self::default()
    }

    pub fn with_holidays(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
            published_through: None,
        }
    }

    pub fn from_holiday_set(set: HolidaySet) -> Self {
        Self {
            holidays: set.dates,
            published_through: set.published_through,
        }
    }

    pub fn published_through(&self) -> Option<NaiveDate> {
        self.published_through
    }

    /// Whether the holiday source is authoritative for `date`.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.published_through.is_some_and(|p| date <= p)
    }

    pub fn holiday_count(&self) -> usize {
        self.holidays.len()
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// Trading days in `[start, end]`, ascending. Empty when `start > end`.
    pub fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        if start > end {
            return Vec::new();
        }
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| self.is_trading_day(*d))
            .collect()
    }

    /// Trading days in `[start, end]` that are not in `existing`, ascending.
    pub fn missing_trading_days(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        existing: &[NaiveDate],
    ) -> Vec<NaiveDate> {
        let have: BTreeSet<NaiveDate> = existing.iter().copied().collect();
        self.trading_days(start, end)
            .into_iter()
            .filter(|d| !have.contains(d))
            .collect()
    }

    /// Dates a complete series of `period` bars would carry in `[start, end]`:
    /// every trading day for daily bars, otherwise the first trading day of
    /// each week or month bucket that has one.
    pub fn expected_dates(&self, start: NaiveDate, end: NaiveDate, period: Period) -> Vec<NaiveDate> {
        let days = self.trading_days(start, end);
        if period == Period::Daily {
            return days;
        }
        let mut first_by_bucket: BTreeMap<NaiveDate, NaiveDate> = BTreeMap::new();
        for day in days {
            first_by_bucket.entry(period.bucket(day)).or_insert(day);
        }
        first_by_bucket.into_values().collect()
    }
}
