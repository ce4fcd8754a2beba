//! Shared test double: an in-memory provider with switchable failures and
//! call accounting.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Weekday};

use barvault_core::data::{ColumnStore, RemoteProvider};
use barvault_core::domain::{CorporateAction, Period, RawBar};
use barvault_core::{ProviderError, TradingCalendar};
use barvault_runner::{Config, Orchestrator};

pub fn d(m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, day).unwrap()
}

pub fn weekdays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|day| *day <= end)
        .filter(|day| !matches!(day.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}

/// One bar per weekday of Q1 2024, close drifting up a cent a day.
pub fn q1_history() -> Vec<RawBar> {
    weekdays(d(1, 1), d(3, 29))
        .into_iter()
        .enumerate()
        .map(|(i, date)| {
            let close = 10.0 + i as f64 * 0.01;
            RawBar {
                date,
                open: close - 0.05,
                high: close + 0.10,
                low: close - 0.10,
                close,
                volume: 100_000 + i as u64,
                amount: close * 100_000.0,
            }
        })
        .collect()
}

#[derive(Default)]
pub struct MockProvider {
    pub bars: BTreeMap<String, Vec<RawBar>>,
    pub actions: BTreeMap<String, Vec<CorporateAction>>,
    pub fail_bars: AtomicBool,
    pub fail_actions: AtomicBool,
    /// Instruments whose bar fetches always fail.
    pub failing: Mutex<BTreeSet<String>>,
    /// Sleep before answering a bar fetch.
    pub bar_delay_ms: AtomicU64,
    pub bar_calls: AtomicUsize,
    pub action_calls: AtomicUsize,
    pub requests: Mutex<Vec<(String, NaiveDate, NaiveDate)>>,
}

impl MockProvider {
    pub fn with_instruments(ids: &[&str]) -> Self {
        let mut provider = MockProvider::default();
        for id in ids {
            provider.bars.insert(id.to_string(), q1_history());
        }
        provider
    }

    pub fn with_action(mut self, action: CorporateAction) -> Self {
        self.actions
            .entry(action.instrument_id.clone())
            .or_default()
            .push(action);
        self
    }

    pub fn bar_calls(&self) -> usize {
        self.bar_calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, id: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(id.to_string());
        } else {
            set.remove(id);
        }
    }
}

impl RemoteProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn fetch_bars(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        _period: Period,
    ) -> Result<Vec<RawBar>, ProviderError> {
        self.bar_calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((instrument_id.to_string(), start, end));
        let delay = self.bar_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.fail_bars.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(instrument_id) {
            return Err(ProviderError::NetworkUnreachable("mock offline".into()));
        }
        let history = self
            .bars
            .get(instrument_id)
            .ok_or_else(|| ProviderError::SymbolNotFound {
                instrument_id: instrument_id.to_string(),
            })?;
        Ok(history
            .iter()
            .filter(|b| b.date >= start && b.date <= end)
            .cloned()
            .collect())
    }

    fn fetch_corporate_actions(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CorporateAction>, ProviderError> {
        self.action_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_actions.load(Ordering::SeqCst) {
            return Err(ProviderError::Timeout { after_ms: 10 });
        }
        Ok(self
            .actions
            .get(instrument_id)
            .map(|list| {
                list.iter()
                    .filter(|a| a.ex_date >= start && a.ex_date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn is_available(&self) -> bool {
        true
    }
}

pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.store.root = dir.join("store");
    config.runner.checkpoint_dir = dir.join("checkpoints");
    config.runner.concurrency = 2;
    config.runner.batch_size = 2;
    config
}

pub fn orchestrator(config: Config, provider: Arc<MockProvider>) -> Orchestrator {
    let store = Arc::new(ColumnStore::new(&config.store.root));
    Orchestrator::new(config, store, provider, Arc::new(TradingCalendar::weekends_only()))
}
