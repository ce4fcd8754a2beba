//! Gap detection: which trading days are missing from local storage.
//!
//! The detector never talks to a provider. Existing dates come from a
//! [`BarIndex`] (the column store implements it), so the detector can be
//! driven from an in-memory index in tests.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::calendar::TradingCalendar;
use crate::domain::{DateRange, Period};
use crate::error::DataError;

/// Source of already-stored bar dates.
pub trait BarIndex: Send + Sync {
    fn existing_dates(
        &self,
        instrument_id: &str,
        period: Period,
        range: DateRange,
    ) -> Result<Vec<NaiveDate>, DataError>;
}

/// A maximal run of missing dates that can be fetched in one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapSegment {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub day_count: usize,
}

impl GapSegment {
    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExistingSummary {
    pub first: Option<NaiveDate>,
    pub last: Option<NaiveDate>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapReport {
    pub instrument_id: String,
    pub period: Period,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub expected_count: usize,
    pub existing: ExistingSummary,
    pub missing_days: Vec<NaiveDate>,
    pub segments: Vec<GapSegment>,
    pub missing_count: usize,
    pub completeness_ratio: f64,
}

impl GapReport {
    pub fn is_complete(&self) -> bool {
        self.missing_count == 0
    }
}

/// Work item for one instrument: the segments to fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub instrument_id: String,
    pub segments: Vec<GapSegment>,
}

impl DownloadTask {
    pub fn missing_days(&self) -> usize {
        self.segments.iter().map(|s| s.day_count).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadPlan {
    pub total_instruments: usize,
    pub instruments_with_gaps: usize,
    pub total_missing_days: usize,
    pub tasks: Vec<DownloadTask>,
}

/// Group ascending missing dates into segments. A date joins the current
/// segment when it is at most `max_gap_days` calendar days after its end.
pub fn group_segments(missing: &[NaiveDate], max_gap_days: i64) -> Vec<GapSegment> {
    let mut segments: Vec<GapSegment> = Vec::new();
    for &day in missing {
        match segments.last_mut() {
            Some(seg) if (day - seg.end_date).num_days() <= max_gap_days => {
                seg.end_date = day;
                seg.day_count += 1;
            }
            _ => segments.push(GapSegment {
                start_date: day,
                end_date: day,
                day_count: 1,
            }),
        }
    }
    segments
}

/// Pure gap computation over an explicit list of stored dates.
///
/// Dates outside `range` are ignored. For weekly and monthly periods a stored
/// bar anywhere inside a bucket satisfies that bucket.
pub fn detect_from_dates(
    calendar: &TradingCalendar,
    instrument_id: &str,
    period: Period,
    range: DateRange,
    existing: &[NaiveDate],
) -> GapReport {
    let present: BTreeSet<NaiveDate> = existing
        .iter()
        .copied()
        .filter(|d| range.contains(*d))
        .collect();
    let expected = calendar.expected_dates(range.start, range.end, period);

    let missing_days: Vec<NaiveDate> = match period {
        Period::Daily => expected.iter().copied().filter(|d| !present.contains(d)).collect(),
        Period::Weekly | Period::Monthly => {
            let buckets: BTreeSet<NaiveDate> = present.iter().map(|d| period.bucket(*d)).collect();
            expected
                .iter()
                .copied()
                .filter(|d| !buckets.contains(&period.bucket(*d)))
                .collect()
        }
    };

    if let Some(horizon) = calendar.published_through() {
        if range.end > horizon {
            warn!(
                instrument_id,
                %range,
                %horizon,
                "range extends past the holiday table; expected days beyond it are weekday-only"
            );
        }
    }

    let expected_count = expected.len();
    // Share of expected dates or buckets that are covered.
    let completeness_ratio = if expected_count == 0 {
        0.0
    } else {
        (expected_count - missing_days.len()) as f64 / expected_count as f64
    };

    GapReport {
        instrument_id: instrument_id.to_string(),
        period,
        start: range.start,
        end: range.end,
        expected_count,
        existing: ExistingSummary {
            first: present.first().copied(),
            last: present.last().copied(),
            count: present.len(),
        },
        segments: group_segments(&missing_days, period.segment_merge_gap_days()),
        missing_count: missing_days.len(),
        missing_days,
        completeness_ratio,
    }
}

/// Detects gaps against a [`BarIndex`].
pub struct GapDetector<'a> {
    calendar: &'a TradingCalendar,
    index: &'a dyn BarIndex,
    period: Period,
}

impl<'a> GapDetector<'a> {
    pub fn new(calendar: &'a TradingCalendar, index: &'a dyn BarIndex) -> Self {
        Self {
            calendar,
            index,
            period: Period::Daily,
        }
    }

    pub fn with_period(mut self, period: Period) -> Self {
        self.period = period;
        self
    }

    pub fn detect(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<GapReport, DataError> {
        let range = DateRange::new(start, end)?;
        let existing = self.index.existing_dates(instrument_id, self.period, range)?;
        let report = detect_from_dates(self.calendar, instrument_id, self.period, range, &existing);
        debug!(
            instrument_id,
            period = %self.period,
            expected = report.expected_count,
            missing = report.missing_count,
            segments = report.segments.len(),
            "gap detection"
        );
        Ok(report)
    }

    pub fn batch_detect(
        &self,
        instrument_ids: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<String, GapReport>, DataError> {
        instrument_ids
            .iter()
            .map(|id| Ok((id.clone(), self.detect(id, start, end)?)))
            .collect()
    }

    /// Plan downloads for the instruments that have at least one missing day.
    /// Tasks keep the caller's instrument order.
    pub fn build_download_plan(
        &self,
        instrument_ids: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<DownloadPlan, DataError> {
        let mut tasks = Vec::new();
        let mut total_missing_days = 0;
        for id in instrument_ids {
            let report = self.detect(id, start, end)?;
            if report.missing_count > 0 {
                total_missing_days += report.missing_count;
                tasks.push(DownloadTask {
                    instrument_id: id.clone(),
                    segments: report.segments,
                });
            }
        }
        Ok(DownloadPlan {
            total_instruments: instrument_ids.len(),
            instruments_with_gaps: tasks.len(),
            total_missing_days,
            tasks,
        })
    }
}
