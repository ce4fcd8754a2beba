//! What `get_bars` hands back: the bars, how complete they are, and any
//! problems met along the way.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use barvault_core::data::{Anomaly, DataSource};
use barvault_core::domain::{AdjustmentVariant, Bar, Period};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmptyReason {
    /// The range contains no trading day.
    NoTradingDays,
    /// Nothing stored and the remote fetch failed.
    Unavailable { cause: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Completeness {
    Complete,
    Partial { missing_days: usize },
    Empty(EmptyReason),
}

impl Completeness {
    pub fn is_complete(&self) -> bool {
        matches!(self, Completeness::Complete)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Completeness::Empty(_))
    }
}

/// Non-fatal problems attached to a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum DataWarning {
    /// Some or all remote fetches failed; local data was returned.
    PartialData { missing_days: usize, cause: String },
    RejectedCorporateAction { ex_date: NaiveDate, reason: String },
    /// Action fetch failed; the stored action set was used.
    StaleCorporateActions { cause: String },
    /// The merged result could not be written back.
    PersistenceFailed { cause: String },
    /// Stored adjusted columns were incomplete or diverged and were rebuilt.
    Recomputed { reason: String },
    IntegrityAnomaly(Anomaly),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarsResponse {
    pub instrument_id: String,
    pub period: Period,
    pub variant: AdjustmentVariant,
    pub bars: Vec<Bar>,
    pub completeness: Completeness,
    pub source: DataSource,
    pub warnings: Vec<DataWarning>,
}

impl BarsResponse {
    pub(crate) fn empty(
        instrument_id: &str,
        period: Period,
        variant: AdjustmentVariant,
        reason: EmptyReason,
    ) -> Self {
        Self {
            instrument_id: instrument_id.to_string(),
            period,
            variant,
            bars: Vec::new(),
            completeness: Completeness::Empty(reason),
            source: DataSource::Store,
            warnings: Vec::new(),
        }
    }

    pub fn has_warning(&self, pred: impl Fn(&DataWarning) -> bool) -> bool {
        self.warnings.iter().any(pred)
    }
}
