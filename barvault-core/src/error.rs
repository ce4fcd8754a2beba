//! Structured error types for the data layer.
//!
//! `ProviderError` covers everything that can go wrong talking to a remote
//! market-data source; `DataError` is the taxonomy the store, the adjustment
//! engine and the orchestrator report with. Both are designed to be
//! displayable as-is in logs and in batch-import reports.

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::Period;

/// Remote fetch failures. All of these are retryable from the caller's point
/// of view: the orchestrator falls back to local data when it sees one.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("instrument not found: {instrument_id}")]
    SymbolNotFound { instrument_id: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("provider call timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("provider I/O error: {0}")]
    Io(String),

    #[error("provider error: {0}")]
    Other(String),
}

/// Errors surfaced by the adjustment-and-caching layer.
#[derive(Debug, Error)]
pub enum DataError {
    /// A single corporate action could not be applied (e.g. dividend >= close).
    #[error("data quality: {instrument_id} action at {ex_date}: {reason}")]
    DataQuality {
        instrument_id: String,
        ex_date: NaiveDate,
        reason: String,
    },

    /// The raw series itself is unusable (unsorted, duplicated, non-positive close).
    #[error("invalid series for {instrument_id}: {reason}")]
    InvalidSeries {
        instrument_id: String,
        reason: String,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("persistence failed for {instrument_id}/{period}: {reason}")]
    Persistence {
        instrument_id: String,
        period: Period,
        reason: String,
    },

    /// Fatal: the store must not be used with an inconsistent schema.
    #[error("schema migration failed in {file} (column '{column}'): {reason}")]
    SchemaMigration {
        file: String,
        column: String,
        reason: String,
    },

    #[error("adjusted data for {instrument_id}/{period} diverges in {start}..={end}: {detail}")]
    Consistency {
        instrument_id: String,
        period: Period,
        start: NaiveDate,
        end: NaiveDate,
        detail: String,
    },

    /// The id cannot be used as a store key or file name.
    #[error("invalid instrument id '{instrument_id}': {reason}")]
    InvalidInstrument {
        instrument_id: String,
        reason: String,
    },

    #[error("invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("calendar error: {0}")]
    Calendar(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("store I/O error: {0}")]
    Io(String),
}

impl DataError {
    /// Whether the orchestrator may continue after this error (with a warning).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DataError::DataQuality { .. } | DataError::Provider(_) | DataError::Persistence { .. }
        )
    }

    pub(crate) fn persistence(
        instrument_id: &str,
        period: Period,
        reason: impl Into<String>,
    ) -> Self {
        DataError::Persistence {
            instrument_id: instrument_id.to_string(),
            period,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_are_recoverable() {
        let err = DataError::from(ProviderError::Timeout { after_ms: 500 });
        assert!(err.is_recoverable());
        assert_eq!(err.to_string(), "provider call timed out after 500ms");
    }

    #[test]
    fn schema_errors_are_fatal() {
        let err = DataError::SchemaMigration {
            file: "bars/instrument=A/period=1d.parquet".into(),
            column: "close_front".into(),
            reason: "backfill mismatch".into(),
        };
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("close_front"));
    }
}
