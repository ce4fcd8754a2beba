//! Orchestrator behaviour end to end: cache hits, incremental fetches,
//! fallbacks and warnings, against a temp-dir store and a mock provider.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use barvault_core::data::DataSource;
use barvault_core::domain::{AdjustmentVariant, CorporateAction, Period};
use barvault_core::DataError;
use barvault_runner::{Completeness, DataWarning, EmptyReason};

use common::{d, orchestrator, test_config, weekdays, MockProvider};

const ID: &str = "600000.SH";

#[test]
fn second_call_is_served_from_store() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::with_instruments(&[ID]));
    let orch = orchestrator(test_config(dir.path()), Arc::clone(&provider));

    let first = orch
        .get_bars(ID, d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::Front)
        .unwrap();
    assert_eq!(first.completeness, Completeness::Complete);
    assert_eq!(first.source, DataSource::Remote);
    assert_eq!(first.bars.len(), 23);
    assert_eq!(provider.bar_calls(), 1);

    let second = orch
        .get_bars(ID, d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::Front)
        .unwrap();
    assert_eq!(second.completeness, Completeness::Complete);
    assert_eq!(second.source, DataSource::Store);
    assert_eq!(second.bars, first.bars);
    assert_eq!(provider.bar_calls(), 1);
    assert_eq!(provider.action_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn only_missing_segments_are_fetched() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::with_instruments(&[ID]));
    let orch = orchestrator(test_config(dir.path()), Arc::clone(&provider));

    orch.get_bars(ID, d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::None)
        .unwrap();
    let resp = orch
        .get_bars(ID, d(1, 1), d(2, 29), Period::Daily, AdjustmentVariant::None)
        .unwrap();
    assert_eq!(resp.completeness, Completeness::Complete);
    assert_eq!(resp.source, DataSource::Merged);
    assert_eq!(resp.bars.len(), 23 + 21);

    let requests = provider.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1], (ID.to_string(), d(2, 1), d(2, 29)));
}

#[test]
fn adjusted_variants_follow_stored_actions() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        MockProvider::with_instruments(&[ID])
            .with_action(CorporateAction::cash_dividend(ID, d(1, 15), 0.5)),
    );
    let orch = orchestrator(test_config(dir.path()), Arc::clone(&provider));

    let front = orch
        .get_bars(ID, d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::Front)
        .unwrap();
    let raw = orch
        .get_bars(ID, d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::None)
        .unwrap();
    let back = orch
        .get_bars(ID, d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::Back)
        .unwrap();

    let last = raw.bars.len() - 1;
    assert_eq!(front.bars[last].close, raw.bars[last].close);
    assert!(front.bars[0].close > raw.bars[0].close);
    assert_eq!(back.bars[0].close, raw.bars[0].close);
    assert!(back.bars[last].close < raw.bars[last].close);
    assert_eq!(front.bars[0].volume, raw.bars[0].volume);
    assert_eq!(orch.store().read_corporate_actions(ID).unwrap().len(), 1);
}

#[test]
fn remote_failure_returns_partial_local_data() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::with_instruments(&[ID]));
    let orch = orchestrator(test_config(dir.path()), Arc::clone(&provider));
    orch.get_bars(ID, d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::None)
        .unwrap();

    provider.fail_bars.store(true, Ordering::SeqCst);
    let resp = orch
        .get_bars(ID, d(1, 1), d(2, 29), Period::Daily, AdjustmentVariant::None)
        .unwrap();
    assert_eq!(resp.completeness, Completeness::Partial { missing_days: 21 });
    assert_eq!(resp.bars.len(), 23);
    assert!(resp.has_warning(|w| matches!(w, DataWarning::PartialData { missing_days: 21, .. })));
}

#[test]
fn empty_store_and_failed_remote_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::with_instruments(&[ID]));
    provider.fail_bars.store(true, Ordering::SeqCst);
    let orch = orchestrator(test_config(dir.path()), Arc::clone(&provider));

    let resp = orch
        .get_bars(ID, d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::Front)
        .unwrap();
    assert!(resp.bars.is_empty());
    match resp.completeness {
        Completeness::Empty(EmptyReason::Unavailable { cause }) => assert!(cause.contains("mock offline")),
        other => panic!("expected unavailable, got {other:?}"),
    }
}

#[test]
fn weekend_range_has_no_trading_days() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::with_instruments(&[ID]));
    let orch = orchestrator(test_config(dir.path()), Arc::clone(&provider));

    let resp = orch
        .get_bars(ID, d(1, 6), d(1, 7), Period::Daily, AdjustmentVariant::None)
        .unwrap();
    assert_eq!(resp.completeness, Completeness::Empty(EmptyReason::NoTradingDays));
    assert_eq!(provider.bar_calls(), 0);
}

#[test]
fn failed_action_fetch_uses_stored_actions() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::with_instruments(&[ID]));
    provider.fail_actions.store(true, Ordering::SeqCst);
    let orch = orchestrator(test_config(dir.path()), Arc::clone(&provider));

    let resp = orch
        .get_bars(ID, d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::Front)
        .unwrap();
    assert_eq!(resp.completeness, Completeness::Complete);
    assert!(resp.has_warning(|w| matches!(w, DataWarning::StaleCorporateActions { .. })));
}

#[test]
fn inverted_range_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::with_instruments(&[ID]));
    let orch = orchestrator(test_config(dir.path()), provider);
    let err = orch
        .get_bars(ID, d(2, 1), d(1, 1), Period::Daily, AdjustmentVariant::None)
        .unwrap_err();
    assert!(matches!(err, DataError::InvalidRange { .. }));
}

#[test]
fn tampered_store_is_recomputed_on_verified_read() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.store.verify_on_read = true;
    let provider = Arc::new(MockProvider::with_instruments(&[ID]));
    let orch = orchestrator(config, Arc::clone(&provider));
    orch.get_bars(ID, d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::None)
        .unwrap();

    let mut sets = orch.store().read_adjusted(ID, Period::Daily, None).unwrap();
    sets[3].front.close *= 1.5;
    orch.store().upsert_bars(ID, Period::Daily, &sets).unwrap();

    let resp = orch
        .get_bars(ID, d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::Front)
        .unwrap();
    assert!(resp.has_warning(|w| matches!(w, DataWarning::Recomputed { .. })));
    assert_eq!(resp.bars[3].close, sets[3].raw.close);
    assert_eq!(provider.bar_calls(), 1);
    orch.store().verify_adjustments(ID, Period::Daily).unwrap();
}

#[test]
fn weekly_bars_are_matched_by_bucket() {
    let dir = tempfile::tempdir().unwrap();
    let mut provider = MockProvider::default();
    // One bar per week, dated the Friday.
    let fridays = weekdays(d(1, 1), d(2, 29))
        .into_iter()
        .filter(|day| chrono::Datelike::weekday(day) == chrono::Weekday::Fri);
    provider.bars.insert(
        ID.to_string(),
        fridays
            .enumerate()
            .map(|(i, date)| barvault_core::domain::RawBar {
                date,
                open: 10.0,
                high: 10.5,
                low: 9.5,
                close: 10.0 + i as f64 * 0.1,
                volume: 500_000,
                amount: 5_000_000.0,
            })
            .collect(),
    );
    let provider = Arc::new(provider);
    let orch = orchestrator(test_config(dir.path()), Arc::clone(&provider));

    let first = orch
        .get_bars(ID, d(1, 1), d(2, 23), Period::Weekly, AdjustmentVariant::None)
        .unwrap();
    assert_eq!(first.completeness, Completeness::Complete);
    assert_eq!(first.bars.len(), 8);
    let calls = provider.bar_calls();

    let second = orch
        .get_bars(ID, d(1, 1), d(2, 23), Period::Weekly, AdjustmentVariant::None)
        .unwrap();
    assert_eq!(second.source, DataSource::Store);
    assert_eq!(provider.bar_calls(), calls);
}

#[test]
fn statistics_reflect_imported_series() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::with_instruments(&[ID, "510300.SH"]));
    let orch = orchestrator(test_config(dir.path()), Arc::clone(&provider));
    for id in [ID, "510300.SH"] {
        orch.get_bars(id, d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::None)
            .unwrap();
    }

    let stats = orch.get_statistics().unwrap();
    assert_eq!(stats.instruments, 2);
    assert_eq!(stats.total_records, 46);
    assert_eq!(stats.per_series.len(), 2);
    assert!(stats.per_series.iter().all(|s| s.missing_days == 0));
}

#[test]
fn unreadable_store_file_fails_the_schema_check() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let bad = config.store.root.join("bars").join("instrument=X");
    std::fs::create_dir_all(&bad).unwrap();
    std::fs::write(bad.join("period=1d.parquet"), b"definitely not parquet").unwrap();

    let provider = Arc::new(MockProvider::with_instruments(&[ID]));
    let orch = orchestrator(config, Arc::clone(&provider));
    assert!(orch
        .get_bars(ID, d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::None)
        .is_err());
    assert_eq!(provider.bar_calls(), 0);
}

#[test]
fn unwritable_store_still_returns_bars() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::with_instruments(&[ID]));
    let orch = orchestrator(test_config(dir.path()), Arc::clone(&provider));
    orch.get_statistics().unwrap();

    // A plain file where the instrument directory should be.
    let blocked = orch.store().root().join("bars").join(format!("instrument={ID}"));
    std::fs::write(&blocked, b"not a dir").unwrap();

    let resp = orch
        .get_bars(ID, d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::Front)
        .unwrap();
    assert_eq!(resp.completeness, Completeness::Complete);
    assert_eq!(resp.bars.len(), 23);
    assert!(resp.has_warning(|w| matches!(w, DataWarning::PersistenceFailed { .. })));
    assert!(blocked.is_file());
}

#[test]
fn slow_provider_times_out_into_fallbacks() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.provider.timeout_secs = 1;
    let provider = Arc::new(MockProvider::with_instruments(&[ID]));
    let orch = orchestrator(config, Arc::clone(&provider));
    orch.get_bars(ID, d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::None)
        .unwrap();

    provider.bar_delay_ms.store(1_500, Ordering::SeqCst);
    let partial = orch
        .get_bars(ID, d(1, 1), d(2, 29), Period::Daily, AdjustmentVariant::None)
        .unwrap();
    assert_eq!(partial.completeness, Completeness::Partial { missing_days: 21 });
    assert_eq!(partial.bars.len(), 23);
    assert!(partial.has_warning(
        |w| matches!(w, DataWarning::PartialData { cause, .. } if cause.contains("timed out"))
    ));

    let empty = orch
        .get_bars("510300.SH", d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::None)
        .unwrap();
    match empty.completeness {
        Completeness::Empty(EmptyReason::Unavailable { cause }) => assert!(cause.contains("timed out")),
        other => panic!("expected unavailable, got {other:?}"),
    }
}

#[test]
fn path_like_ids_are_refused_before_any_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::with_instruments(&[ID]));
    let orch = orchestrator(test_config(dir.path()), Arc::clone(&provider));

    let err = orch
        .get_bars("../x", d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::None)
        .unwrap_err();
    assert!(matches!(err, DataError::InvalidInstrument { .. }));
    assert_eq!(provider.bar_calls(), 0);
}

#[test]
fn hung_provider_is_cut_off_after_repeated_timeouts() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.provider.timeout_secs = 1;
    let provider = Arc::new(MockProvider::with_instruments(&["A.SH", "B.SH", "C.SH", "D.SH"]));
    provider.bar_delay_ms.store(1_300, Ordering::SeqCst);
    let orch = orchestrator(config, Arc::clone(&provider));

    for id in ["A.SH", "B.SH", "C.SH"] {
        let resp = orch
            .get_bars(id, d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::None)
            .unwrap();
        assert!(matches!(
            resp.completeness,
            Completeness::Empty(EmptyReason::Unavailable { ref cause }) if cause.contains("timed out")
        ));
    }
    assert_eq!(provider.bar_calls(), 3);

    let refused = orch
        .get_bars("D.SH", d(1, 1), d(1, 31), Period::Daily, AdjustmentVariant::None)
        .unwrap();
    match refused.completeness {
        Completeness::Empty(EmptyReason::Unavailable { cause }) => assert!(cause.contains("circuit breaker")),
        other => panic!("expected unavailable, got {other:?}"),
    }
    assert_eq!(provider.bar_calls(), 3);
}
