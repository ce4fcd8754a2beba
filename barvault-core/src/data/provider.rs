//! Remote provider trait.
//!
//! `RemoteProvider` abstracts over market-data sources (Yahoo Finance, a
//! directory of CSV exports, test doubles) so the orchestrator never branches
//! on a vendor's response shape. The store sits above this trait; providers
//! don't know about it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{CorporateAction, Period, RawBar};
use crate::error::ProviderError;

/// Where a batch of bars came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Store,
    Remote,
    Merged,
}

pub trait RemoteProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Raw bars for `[start, end]`. An empty result is valid (no trading).
    fn fetch_bars(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        period: Period,
    ) -> Result<Vec<RawBar>, ProviderError>;

    /// Corporate actions with ex-dates in `[start, end]`. Empty is valid.
    fn fetch_corporate_actions(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CorporateAction>, ProviderError>;

    /// Whether the provider currently accepts requests (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}
