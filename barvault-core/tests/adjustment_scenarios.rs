//! End-to-end adjustment scenarios on small hand-checked series.

use barvault_core::domain::{AdjustmentVariant, CorporateAction, RawBar};
use barvault_core::AdjustmentEngine;
use chrono::NaiveDate;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// 2024-01-01..=2024-01-10, every bar 100/102/99/101.
fn flat_series() -> Vec<RawBar> {
    d(2024, 1, 1)
        .iter_days()
        .take(10)
        .map(|date| RawBar {
            date,
            open: 100.0,
            high: 102.0,
            low: 99.0,
            close: 101.0,
            volume: 10_000,
            amount: 1_010_000.0,
        })
        .collect()
}

#[test]
fn single_cash_dividend() {
    let bars = flat_series();
    let action = CorporateAction::cash_dividend("600000.SH", d(2024, 1, 5), 10.0);
    let out = AdjustmentEngine::adjust("600000.SH", &bars, &[action]).unwrap();
    assert!(out.rejected.is_empty());

    let before = &out.bars[0];
    assert!((before.factors.front - 1.109_890_109_89).abs() < 1e-9);
    assert!((before.front.close - 112.098_901).abs() < 1e-5);
    assert!((before.front.open - 100.0 * 101.0 / 91.0).abs() < 1e-9);

    let after = &out.bars[4];
    assert_eq!(after.date, d(2024, 1, 5));
    assert!((after.factors.back - 0.900_990_099).abs() < 1e-9);
    assert!((after.back.close - 91.0).abs() < 1e-9);

    // Anchors
    assert_eq!(out.bars[9].front.close, out.bars[9].raw.close);
    assert_eq!(out.bars[0].back.close, out.bars[0].raw.close);

    // Volume and amount are never adjusted
    for set in &out.bars {
        let bar = set.to_bar("600000.SH", barvault_core::domain::Period::Daily, AdjustmentVariant::Front);
        assert_eq!(bar.volume, 10_000);
        assert_eq!(bar.amount, 1_010_000.0);
    }
}

#[test]
fn no_actions_all_variants_equal_raw() {
    let bars = flat_series();
    let out = AdjustmentEngine::adjust("600000.SH", &bars, &[]).unwrap();
    for (set, raw) in out.bars.iter().zip(&bars) {
        for variant in AdjustmentVariant::ALL {
            let ohlc = set.ohlc(variant);
            assert_eq!(ohlc.open, raw.open);
            assert_eq!(ohlc.high, raw.high);
            assert_eq!(ohlc.low, raw.low);
            assert_eq!(ohlc.close, raw.close);
        }
    }
}

#[test]
fn stacked_actions_compose_multiplicatively() {
    let bars = flat_series();
    let actions = [
        CorporateAction::cash_dividend("A", d(2024, 1, 3), 1.0),
        CorporateAction::bonus("A", d(2024, 1, 7), 10.0),
    ];
    let out = AdjustmentEngine::adjust("A", &bars, &actions).unwrap();

    let r_div = 101.0 / 100.0;
    let r_bonus = 2.0;
    assert!((out.bars[0].factors.front - r_div * r_bonus).abs() < 1e-12);
    assert!((out.bars[3].factors.front - r_bonus).abs() < 1e-12);
    assert_eq!(out.bars[6].factors.front, 1.0);

    assert_eq!(out.bars[1].factors.back, 1.0);
    assert!((out.bars[2].factors.back - 100.0 / 101.0).abs() < 1e-12);
    assert!((out.bars[9].factors.back - 100.0 / 101.0 / 2.0).abs() < 1e-12);
}

#[test]
fn dividend_and_bonus_on_same_day() {
    let bars = flat_series();
    let action = CorporateAction {
        dividend_per_share: Some(1.0),
        bonus_ratio: Some(5.0),
        ..CorporateAction::new("A", d(2024, 1, 4))
    };
    let out = AdjustmentEngine::adjust("A", &bars, &[action]).unwrap();
    let expected = (101.0 / 100.0) * 1.5;
    assert!((out.bars[0].factors.front - expected).abs() < 1e-12);
}

#[test]
fn rejected_action_leaves_series_otherwise_adjusted() {
    let bars = flat_series();
    let actions = [
        CorporateAction::cash_dividend("A", d(2024, 1, 3), 101.0),
        CorporateAction::bonus("A", d(2024, 1, 6), 10.0),
    ];
    let out = AdjustmentEngine::adjust("A", &bars, &actions).unwrap();
    assert_eq!(out.rejected.len(), 1);
    assert_eq!(out.rejected[0].ex_date, d(2024, 1, 3));
    assert!((out.bars[0].factors.front - 2.0).abs() < 1e-12);
}

#[test]
fn geometric_variants_track_discrete_returns() {
    let mut bars = flat_series();
    for (i, bar) in bars.iter_mut().enumerate() {
        bar.close = 100.0 * (1.0 + 0.01 * i as f64);
        bar.high = bar.close + 2.0;
        bar.open = bar.close - 1.0;
        bar.low = bar.close - 2.0;
    }
    let actions = [CorporateAction::cash_dividend("A", d(2024, 1, 6), 3.0)];
    let out = AdjustmentEngine::adjust("A", &bars, &actions).unwrap();

    for pair in out.bars.windows(2) {
        let discrete = pair[1].back.close / pair[0].back.close;
        let geometric = pair[1].geo_back.close / pair[0].geo_back.close;
        assert!((discrete - geometric).abs() < 1e-12);
    }
    assert!((out.bars[0].geo_back.close - bars[0].close).abs() < 1e-9);
    assert!((out.bars[9].geo_front.close - bars[9].close).abs() < 1e-9);
    // Intraday shape is preserved
    for set in &out.bars {
        let spread_raw = set.raw.high / set.raw.low;
        let spread_geo = set.geo_front.high / set.geo_front.low;
        assert!((spread_raw - spread_geo).abs() < 1e-12);
    }
}
