//! Property tests for adjustment and gap-detection invariants.
//!
//! Uses proptest to verify:
//! 1. Anchors: front keeps the last raw close, back keeps the first
//! 2. No actions means every variant equals raw
//! 3. Factors are finite and positive, volume and amount untouched
//! 4. Gap reports partition the expected dates
//! 5. Segments respect the merge gap

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;

use barvault_core::calendar::TradingCalendar;
use barvault_core::domain::{AdjustmentVariant, CorporateAction, DateRange, Period, RawBar};
use barvault_core::gaps::{detect_from_dates, group_segments};
use barvault_core::AdjustmentEngine;

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 2).unwrap()
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_closes() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec((5.0..500.0_f64).prop_map(|p| (p * 100.0).round() / 100.0), 2..60)
}

fn make_bars(closes: &[f64]) -> Vec<RawBar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| RawBar {
            date: base_date() + Duration::days(i as i64),
            open: close * 0.99,
            high: close * 1.02,
            low: close * 0.97,
            close,
            volume: 1_000 + i as u64,
            amount: close * 1_000.0,
        })
        .collect()
}

/// Actions as (bar offset, dividend fraction of the series minimum, bonus per 10).
fn arb_actions() -> impl Strategy<Value = Vec<(usize, f64, f64)>> {
    prop::collection::vec((0..80usize, 0.0..0.8_f64, prop_oneof![Just(0.0), 1.0..10.0_f64]), 0..6)
}

fn make_actions(bars: &[RawBar], spec: &[(usize, f64, f64)]) -> Vec<CorporateAction> {
    let min_close = bars.iter().map(|b| b.close).fold(f64::INFINITY, f64::min);
    spec.iter()
        .map(|&(offset, frac, bonus)| CorporateAction {
            dividend_per_share: Some(frac * min_close),
            bonus_ratio: Some(bonus),
            ..CorporateAction::new("P", base_date() + Duration::days(offset as i64))
        })
        .collect()
}

// ── 1-3. Adjustment ──────────────────────────────────────────────────

proptest! {
    /// Front adjustment never changes the last bar; back never changes the first.
    #[test]
    fn anchors_hold(closes in arb_closes(), spec in arb_actions()) {
        let bars = make_bars(&closes);
        let actions = make_actions(&bars, &spec);
        let out = AdjustmentEngine::adjust("P", &bars, &actions).unwrap();
        prop_assert!(out.rejected.is_empty());

        let last = out.bars.last().unwrap();
        prop_assert_eq!(last.front.close, last.raw.close);
        prop_assert_eq!(last.factors.front, 1.0);
        prop_assert!((last.geo_front.close - last.raw.close).abs() <= 1e-9 * last.raw.close);

        let first = &out.bars[0];
        prop_assert_eq!(first.back.close, first.raw.close);
        prop_assert_eq!(first.factors.back, 1.0);
        prop_assert!((first.geo_back.close - first.raw.close).abs() <= 1e-9 * first.raw.close);
    }

    #[test]
    fn no_actions_is_identity(closes in arb_closes()) {
        let bars = make_bars(&closes);
        let out = AdjustmentEngine::adjust("P", &bars, &[]).unwrap();
        for (set, raw) in out.bars.iter().zip(&bars) {
            for variant in AdjustmentVariant::ALL {
                prop_assert_eq!(set.ohlc(variant).close, raw.close);
                prop_assert_eq!(set.factor(variant), 1.0);
            }
        }
    }

    #[test]
    fn factors_positive_and_volume_untouched(closes in arb_closes(), spec in arb_actions()) {
        let bars = make_bars(&closes);
        let actions = make_actions(&bars, &spec);
        let out = AdjustmentEngine::adjust("P", &bars, &actions).unwrap();
        prop_assert_eq!(out.bars.len(), bars.len());
        for (set, raw) in out.bars.iter().zip(&bars) {
            prop_assert!(set.is_complete());
            for variant in AdjustmentVariant::ALL {
                let f = set.factor(variant);
                prop_assert!(f.is_finite() && f > 0.0);
            }
            prop_assert_eq!(set.volume, raw.volume);
            prop_assert_eq!(set.amount, raw.amount);
            // Front factors never drop below one, back factors never exceed it
            prop_assert!(set.factors.front >= 1.0);
            prop_assert!(set.factors.back <= 1.0);
        }
        // Front factor is non-increasing over time
        for pair in out.bars.windows(2) {
            prop_assert!(pair[0].factors.front >= pair[1].factors.front);
        }
    }
}

// ── 4-5. Gaps ────────────────────────────────────────────────────────

proptest! {
    /// Every expected date is either present or missing, never both.
    #[test]
    fn gap_report_partitions_expected(
        span in 1..120i64,
        keep in prop::collection::vec(any::<bool>(), 120),
    ) {
        let cal = TradingCalendar::weekends_only();
        let range = DateRange::new(base_date(), base_date() + Duration::days(span)).unwrap();
        let expected = cal.trading_days(range.start, range.end);
        let existing: Vec<NaiveDate> = expected
            .iter()
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|(d, _)| *d)
            .collect();

        let report = detect_from_dates(&cal, "P", Period::Daily, range, &existing);
        prop_assert_eq!(report.expected_count, expected.len());
        prop_assert_eq!(report.missing_count + existing.len(), expected.len());
        for day in &report.missing_days {
            prop_assert!(!existing.contains(day));
            prop_assert!(cal.is_trading_day(*day));
        }
        let segment_days: usize = report.segments.iter().map(|s| s.day_count).sum();
        prop_assert_eq!(segment_days, report.missing_count);
        prop_assert_eq!(report.is_complete(), report.missing_count == 0);
    }

    /// Adjacent segments are separated by more than the merge gap.
    #[test]
    fn segments_respect_merge_gap(
        offsets in prop::collection::btree_set(0..365i64, 0..50),
        max_gap in 1..15i64,
    ) {
        let missing: Vec<NaiveDate> = offsets.iter().map(|o| base_date() + Duration::days(*o)).collect();
        let segments = group_segments(&missing, max_gap);
        for pair in segments.windows(2) {
            prop_assert!((pair[1].start_date - pair[0].end_date).num_days() > max_gap);
        }
        for seg in &segments {
            prop_assert!(seg.start_date <= seg.end_date);
        }
        prop_assert_eq!(segments.iter().map(|s| s.day_count).sum::<usize>(), missing.len());
    }
}
