//! Provider bars and served bars.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::Period;

/// OHLCV bar as delivered by a provider, before adjustment.
///
/// One per `(instrument_id, date, period)`; re-ingesting a key overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    /// Traded value over the bar, in quote currency.
    pub amount: f64,
}

impl RawBar {
    /// A close the adjustment engine can use as a reference price.
    pub fn has_usable_close(&self) -> bool {
        self.close.is_finite() && self.close > 0.0
    }

    /// Replace a missing open, high or low with the close. Returns whether
    /// anything was replaced.
    pub fn fill_missing_from_close(&mut self) -> bool {
        let close = self.close;
        let mut filled = false;
        for value in [&mut self.open, &mut self.high, &mut self.low] {
            if !value.is_finite() {
                *value = close;
                filled = true;
            }
        }
        filled
    }
}

/// A bar as served to callers: one variant's OHLC plus the shared volume/amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument_id: String,
    pub date: NaiveDate,
    pub period: Period,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub amount: f64,
}
