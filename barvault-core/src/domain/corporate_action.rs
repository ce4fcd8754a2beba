//! Corporate actions (dividends, bonus shares, rights issues).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One corporate-action event, unique per `(instrument_id, ex_date)`.
///
/// Share ratios are expressed per 10 shares held, as exchanges publish them:
/// a `bonus_ratio` of 3.0 means 3 bonus shares for every 10.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporateAction {
    pub instrument_id: String,
    pub ex_date: NaiveDate,
    #[serde(default)]
    pub dividend_per_share: Option<f64>,
    #[serde(default)]
    pub bonus_ratio: Option<f64>,
    #[serde(default)]
    pub rights_issue_ratio: Option<f64>,
    #[serde(default)]
    pub rights_issue_price: Option<f64>,
    #[serde(default)]
    pub record_date: Option<NaiveDate>,
    #[serde(default)]
    pub pay_date: Option<NaiveDate>,
}

impl CorporateAction {
    /// A bare action on `ex_date` with no components set.
    pub fn new(instrument_id: impl Into<String>, ex_date: NaiveDate) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            ex_date,
            dividend_per_share: None,
            bonus_ratio: None,
            rights_issue_ratio: None,
            rights_issue_price: None,
            record_date: None,
            pay_date: None,
        }
    }

    pub fn cash_dividend(instrument_id: impl Into<String>, ex_date: NaiveDate, amount: f64) -> Self {
        Self {
            dividend_per_share: Some(amount),
            ..Self::new(instrument_id, ex_date)
        }
    }

    pub fn bonus(instrument_id: impl Into<String>, ex_date: NaiveDate, per_ten: f64) -> Self {
        Self {
            bonus_ratio: Some(per_ten),
            ..Self::new(instrument_id, ex_date)
        }
    }

    /// True when no price-affecting component is present.
    pub fn is_empty(&self) -> bool {
        self.dividend_per_share.unwrap_or(0.0) == 0.0
            && self.bonus_ratio.unwrap_or(0.0) == 0.0
            && self.rights_issue_ratio.unwrap_or(0.0) == 0.0
    }
}
