//! Price adjustment for corporate actions.
//!
//! Each applicable action contributes a price ratio `r` computed from the
//! close `c` of the bar on its ex-date (or the first bar after it):
//!
//! - cash dividend `d`: `c / (c - d)`
//! - bonus shares `b` per 10: `1 + b / 10`
//! - rights issue `k` per 10 at price `p`: `1 + (k / 10) * (c - p) / c`
//!
//! Front adjustment multiplies every bar before the ex-date by `r`, so the
//! latest bar keeps its raw price. Back adjustment divides every bar on or
//! after the ex-date by `r`, so the earliest bar keeps its raw price. The
//! geometric variants compound the per-bar returns of their discrete base
//! series from the same anchor.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{AdjustedBarSet, CorporateAction, Ohlc, RawBar, VariantFactors};
use crate::error::DataError;

/// An action that could not be applied. The rest of the series is still adjusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedAction {
    pub ex_date: NaiveDate,
    pub reason: String,
}

impl RejectedAction {
    pub fn into_error(self, instrument_id: &str) -> DataError {
        DataError::DataQuality {
            instrument_id: instrument_id.to_string(),
            ex_date: self.ex_date,
            reason: self.reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentOutcome {
    pub bars: Vec<AdjustedBarSet>,
    pub rejected: Vec<RejectedAction>,
}

/// Ratio of one action in both directions. The back ratio is computed
/// directly rather than as `1 / front` so a lone dividend back-adjusts by
/// exactly `(c - d) / c`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ActionRatio {
    front: f64,
    back: f64,
}

impl ActionRatio {
    const IDENTITY: ActionRatio = ActionRatio {
        front: 1.0,
        back: 1.0,
    };

    fn compose(self, other: ActionRatio) -> ActionRatio {
        ActionRatio {
            front: self.front * other.front,
            back: self.back * other.back,
        }
    }
}

fn finite_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Compute the ratio of one action against the reference close.
fn action_ratio(action: &CorporateAction, close: f64) -> Result<ActionRatio, String> {
    if !finite_positive(close) {
        return Err(format!("reference close {close} is not a positive price"));
    }
    let mut ratio = ActionRatio::IDENTITY;

    if let Some(d) = action.dividend_per_share.filter(|d| *d != 0.0) {
        if !d.is_finite() {
            return Err(format!("dividend {d} is not finite"));
        }
        let ex_price = close - d;
        if ex_price <= 0.0 {
            return Err(format!("dividend {d} is not below the reference close {close}"));
        }
        ratio = ratio.compose(ActionRatio {
            front: close / ex_price,
            back: ex_price / close,
        });
    }

    if let Some(b) = action.bonus_ratio.filter(|b| *b != 0.0) {
        let r = 1.0 + b / 10.0;
        if !finite_positive(r) {
            return Err(format!("bonus ratio {b} per 10 gives non-positive factor {r}"));
        }
        ratio = ratio.compose(ActionRatio {
            front: r,
            back: 1.0 / r,
        });
    }

    if let Some(k) = action.rights_issue_ratio.filter(|k| *k != 0.0) {
        let p = action.rights_issue_price.unwrap_or(f64::NAN);
        if !finite_positive(p) {
            return Err(format!("rights issue {k} per 10 has invalid subscription price {p}"));
        }
        let r = 1.0 + (k / 10.0) * (close - p) / close;
        if !finite_positive(r) {
            return Err(format!("rights issue {k} per 10 at {p} gives non-positive factor {r}"));
        }
        ratio = ratio.compose(ActionRatio {
            front: r,
            back: 1.0 / r,
        });
    }

    Ok(ratio)
}

/// Pure adjustment engine: raw bars and corporate actions in, all four
/// adjusted variants out.
pub struct AdjustmentEngine;

impl AdjustmentEngine {
    /// Adjust one instrument's series.
    ///
    /// `bars` must be strictly ascending by date; anything else fails the
    /// whole range. Individual bad actions are returned in
    /// [`AdjustmentOutcome::rejected`] and skipped.
    pub fn adjust(
        instrument_id: &str,
        bars: &[RawBar],
        actions: &[CorporateAction],
    ) -> Result<AdjustmentOutcome, DataError> {
        validate_series(instrument_id, bars)?;

        let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
            return Ok(AdjustmentOutcome {
                bars: Vec::new(),
                rejected: Vec::new(),
            });
        };

        // Unique per ex_date; the last occurrence wins, as re-import does.
        let by_date: BTreeMap<NaiveDate, &CorporateAction> =
            actions.iter().map(|a| (a.ex_date, a)).collect();

        let n = bars.len();
        let mut ratio_at = vec![ActionRatio::IDENTITY; n];
        let mut rejected = Vec::new();
        let mut applied = 0usize;

        for (ex_date, action) in by_date {
            // Before or on the first bar there is nothing to rescale against
            // the anchor; after the last bar there is no reference close yet.
            if ex_date <= first.date || ex_date > last.date || action.is_empty() {
                debug!(instrument_id, %ex_date, "corporate action outside series, skipped");
                continue;
            }
            let j = bars.partition_point(|b| b.date < ex_date);
            match action_ratio(action, bars[j].close) {
                Ok(ratio) => {
                    ratio_at[j] = ratio_at[j].compose(ratio);
                    applied += 1;
                }
                Err(reason) => {
                    warn!(instrument_id, %ex_date, %reason, "corporate action rejected");
                    rejected.push(RejectedAction { ex_date, reason });
                }
            }
        }

        if applied == 0 {
            return Ok(AdjustmentOutcome {
                bars: bars.iter().map(AdjustedBarSet::unadjusted).collect(),
                rejected,
            });
        }

        let mut front_factor = vec![1.0; n];
        for i in (0..n - 1).rev() {
            front_factor[i] = front_factor[i + 1] * ratio_at[i + 1].front;
        }
        let mut back_factor = vec![1.0; n];
        for i in 1..n {
            back_factor[i] = back_factor[i - 1] * ratio_at[i].back;
        }

        let raw: Vec<Ohlc> = bars.iter().map(Ohlc::of).collect();
        let front: Vec<Ohlc> = raw.iter().zip(&front_factor).map(|(o, f)| o.scaled(*f)).collect();
        let back: Vec<Ohlc> = raw.iter().zip(&back_factor).map(|(o, f)| o.scaled(*f)).collect();

        let geo_back_close = compound_forward(&back, raw[0].close);
        let geo_front_close = compound_backward(&front, raw[n - 1].close);

        let sets = (0..n)
            .map(|i| {
                let gb_scale = geo_back_close[i] / back[i].close;
                let gf_scale = geo_front_close[i] / front[i].close;
                AdjustedBarSet {
                    date: bars[i].date,
                    raw: raw[i],
                    volume: bars[i].volume,
                    amount: bars[i].amount,
                    front: front[i],
                    back: back[i],
                    geo_front: front[i].scaled(gf_scale),
                    geo_back: back[i].scaled(gb_scale),
                    factors: VariantFactors {
                        front: front_factor[i],
                        back: back_factor[i],
                        geo_front: geo_front_close[i] / raw[i].close,
                        geo_back: geo_back_close[i] / raw[i].close,
                    },
                }
            })
            .collect();

        debug!(instrument_id, bars = n, applied, rejected = rejected.len(), "series adjusted");
        Ok(AdjustmentOutcome {
            bars: sets,
            rejected,
        })
    }
}

/// `geo[0] = anchor`, `geo[i] = geo[i-1] * (1 + ret[i])`.
fn compound_forward(series: &[Ohlc], anchor: f64) -> Vec<f64> {
    let mut geo = Vec::with_capacity(series.len());
    geo.push(anchor);
    for i in 1..series.len() {
        let ret = series[i].close / series[i - 1].close - 1.0;
        geo.push(geo[i - 1] * (1.0 + ret));
    }
    geo
}

/// `geo[n-1] = anchor`, compounding the same returns backwards.
fn compound_backward(series: &[Ohlc], anchor: f64) -> Vec<f64> {
    let n = series.len();
    let mut geo = vec![anchor; n];
    for i in (0..n.saturating_sub(1)).rev() {
        let ret = series[i + 1].close / series[i].close - 1.0;
        geo[i] = geo[i + 1] / (1.0 + ret);
    }
    geo
}

fn validate_series(instrument_id: &str, bars: &[RawBar]) -> Result<(), DataError> {
    let invalid = |reason: String| DataError::InvalidSeries {
        instrument_id: instrument_id.to_string(),
        reason,
    };
    for pair in bars.windows(2) {
        if pair[1].date == pair[0].date {
            return Err(invalid(format!("duplicate bar on {}", pair[1].date)));
        }
        if pair[1].date < pair[0].date {
            return Err(invalid(format!(
                "bars out of order: {} after {}",
                pair[1].date, pair[0].date
            )));
        }
    }
    if let Some(bad) = bars.iter().find(|b| !b.has_usable_close()) {
        return Err(invalid(format!("non-positive close {} on {}", bad.close, bad.date)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn flat_bars(start: NaiveDate, n: usize) -> Vec<RawBar> {
        start
            .iter_days()
            .take(n)
            .map(|date| RawBar {
                date,
                open: 100.0,
                high: 102.0,
                low: 99.0,
                close: 101.0,
                volume: 1_000,
                amount: 101_000.0,
            })
            .collect()
    }

    fn dividend(ex: NaiveDate, amount: f64) -> CorporateAction {
        CorporateAction::cash_dividend("A", ex, amount)
    }

    #[test]
    fn no_actions_is_exact_copy() {
        let bars = flat_bars(d(2024, 1, 1), 5);
        let out = AdjustmentEngine::adjust("A", &bars, &[]).unwrap();
        for (set, bar) in out.bars.iter().zip(&bars) {
            assert_eq!(*set, AdjustedBarSet::unadjusted(bar));
        }
    }

    #[test]
    fn dividend_front_and_back() {
        let bars = flat_bars(d(2024, 1, 1), 10);
        let out = AdjustmentEngine::adjust("A", &bars, &[dividend(d(2024, 1, 5), 10.0)]).unwrap();
        let front = 101.0 / 91.0;
        let back = 91.0 / 101.0;

        for set in &out.bars {
            if set.date < d(2024, 1, 5) {
                assert!((set.factors.front - front).abs() < 1e-12);
                assert!((set.front.close - 101.0 * front).abs() < 1e-9);
                assert_eq!(set.factors.back, 1.0);
            } else {
                assert_eq!(set.factors.front, 1.0);
                assert!((set.factors.back - back).abs() < 1e-12);
                assert!((set.back.close - 91.0).abs() < 1e-9);
            }
        }
        assert_eq!(out.bars[9].front.close, 101.0);
        assert_eq!(out.bars[0].back.close, 101.0);
    }

    #[test]
    fn bonus_shares_per_ten() {
        let bars = flat_bars(d(2024, 1, 1), 4);
        let action = CorporateAction::bonus("A", d(2024, 1, 3), 5.0);
        let out = AdjustmentEngine::adjust("A", &bars, &[action]).unwrap();
        assert!((out.bars[0].factors.front - 1.5).abs() < 1e-12);
        assert!((out.bars[3].factors.back - 1.0 / 1.5).abs() < 1e-12);
    }

    #[test]
    fn rights_issue_ratio() {
        let bars = flat_bars(d(2024, 1, 1), 4);
        let action = CorporateAction {
            rights_issue_ratio: Some(3.0),
            rights_issue_price: Some(51.0),
            ..CorporateAction::new("A", d(2024, 1, 3))
        };
        let out = AdjustmentEngine::adjust("A", &bars, &[action]).unwrap();
        let r = 1.0 + 0.3 * (101.0 - 51.0) / 101.0;
        assert!((out.bars[1].factors.front - r).abs() < 1e-12);
        assert!(out.rejected.is_empty());
    }

    #[test]
    fn oversized_dividend_is_rejected_others_continue() {
        let bars = flat_bars(d(2024, 1, 1), 6);
        let actions = [dividend(d(2024, 1, 3), 150.0), dividend(d(2024, 1, 5), 1.0)];
        let out = AdjustmentEngine::adjust("A", &bars, &actions).unwrap();
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].ex_date, d(2024, 1, 3));
        assert!((out.bars[0].factors.front - 101.0 / 100.0).abs() < 1e-12);
        let err = out.rejected[0].clone().into_error("A");
        assert!(matches!(err, DataError::DataQuality { .. }));
    }

    #[test]
    fn ex_date_on_missing_day_uses_next_bar() {
        // 2024-01-06/07 absent; ex-date on the Saturday uses Monday's close
        let mut bars = flat_bars(d(2024, 1, 1), 10);
        bars.retain(|b| b.date != d(2024, 1, 6) && b.date != d(2024, 1, 7));
        bars.iter_mut().filter(|b| b.date == d(2024, 1, 8)).for_each(|b| b.close = 90.0);
        let out = AdjustmentEngine::adjust("A", &bars, &[dividend(d(2024, 1, 6), 9.0)]).unwrap();
        let friday = out.bars.iter().find(|s| s.date == d(2024, 1, 5)).unwrap();
        assert!((friday.factors.front - 90.0 / 81.0).abs() < 1e-12);
        let monday = out.bars.iter().find(|s| s.date == d(2024, 1, 8)).unwrap();
        assert_eq!(monday.factors.front, 1.0);
    }

    #[test]
    fn actions_outside_series_are_ignored() {
        let bars = flat_bars(d(2024, 1, 2), 5);
        let actions = [dividend(d(2023, 12, 1), 1.0), dividend(d(2024, 1, 2), 1.0), dividend(d(2024, 2, 1), 1.0)];
        let out = AdjustmentEngine::adjust("A", &bars, &actions).unwrap();
        assert!(out.bars.iter().all(|s| s.factors == VariantFactors::IDENTITY));
        assert!(out.rejected.is_empty());
    }

    #[test]
    fn geometric_variants_keep_their_anchors() {
        let mut bars = flat_bars(d(2024, 1, 1), 8);
        for (i, b) in bars.iter_mut().enumerate() {
            b.close = 100.0 + i as f64;
            b.high = b.close + 1.0;
        }
        let out = AdjustmentEngine::adjust("A", &bars, &[dividend(d(2024, 1, 4), 2.0)]).unwrap();
        let first = &out.bars[0];
        let last = &out.bars[7];
        assert!((first.geo_back.close - first.raw.close).abs() < 1e-9);
        assert!((last.geo_front.close - last.raw.close).abs() < 1e-9);
        for set in &out.bars {
            assert!((set.geo_back.close - set.back.close).abs() < 1e-9);
            assert!((set.geo_front.close - set.front.close).abs() < 1e-9);
            assert!((set.factors.geo_back * set.raw.close - set.geo_back.close).abs() < 1e-9);
        }
    }

    #[test]
    fn unsorted_or_duplicate_bars_fail() {
        let mut bars = flat_bars(d(2024, 1, 1), 3);
        bars.swap(0, 2);
        assert!(matches!(
            AdjustmentEngine::adjust("A", &bars, &[]),
            Err(DataError::InvalidSeries { .. })
        ));
        let mut dup = flat_bars(d(2024, 1, 1), 2);
        dup[1].date = dup[0].date;
        assert!(AdjustmentEngine::adjust("A", &dup, &[]).is_err());
    }

    #[test]
    fn empty_series_is_empty_outcome() {
        let out = AdjustmentEngine::adjust("A", &[], &[dividend(d(2024, 1, 4), 2.0)]).unwrap();
        assert!(out.bars.is_empty());
    }
}
