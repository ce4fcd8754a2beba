//! Local CSV provider: a directory of `{instrument}.bars.csv` and
//! `{instrument}.actions.csv` exports, used for offline backfill.
//!
//! Bars CSV columns: `date,open,high,low,close,volume,amount` (`amount`
//! optional). Actions CSV columns: `ex_date` plus any of the corporate-action
//! fields. A missing actions file means "no actions".

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;

use super::provider::RemoteProvider;
use crate::domain::{validate_instrument_id, CorporateAction, Period, RawBar};
use crate::error::ProviderError;

#[derive(Debug, Deserialize)]
struct BarRow {
    date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
    #[serde(default)]
    amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ActionRow {
    ex_date: NaiveDate,
    #[serde(default)]
    dividend_per_share: Option<f64>,
    #[serde(default)]
    bonus_ratio: Option<f64>,
    #[serde(default)]
    rights_issue_ratio: Option<f64>,
    #[serde(default)]
    rights_issue_price: Option<f64>,
    #[serde(default)]
    record_date: Option<NaiveDate>,
    #[serde(default)]
    pay_date: Option<NaiveDate>,
}

pub struct CsvProvider {
    dir: PathBuf,
}

impl CsvProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn bars_path(&self, instrument_id: &str) -> PathBuf {
        self.dir.join(format!("{instrument_id}.bars.csv"))
    }

    pub fn actions_path(&self, instrument_id: &str) -> PathBuf {
        self.dir.join(format!("{instrument_id}.actions.csv"))
    }

    fn check_id(instrument_id: &str) -> Result<(), ProviderError> {
        validate_instrument_id(instrument_id).map_err(|e| ProviderError::Other(e.to_string()))
    }

    fn reader(path: &Path) -> Result<csv::Reader<fs::File>, ProviderError> {
        csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| ProviderError::Io(format!("{}: {e}", path.display())))
    }
}

impl RemoteProvider for CsvProvider {
    fn name(&self) -> &str {
        "csv_directory"
    }

    /// CSV exports carry one period; the `period` argument is not checked.
    fn fetch_bars(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        _period: Period,
    ) -> Result<Vec<RawBar>, ProviderError> {
        Self::check_id(instrument_id)?;
        let path = self.bars_path(instrument_id);
        if !path.exists() {
            return Err(ProviderError::SymbolNotFound {
                instrument_id: instrument_id.to_string(),
            });
        }
        let mut bars = Vec::new();
        for row in Self::reader(&path)?.deserialize::<BarRow>() {
            let row = row.map_err(|e| {
                ProviderError::ResponseFormatChanged(format!("{}: {e}", path.display()))
            })?;
            if row.date < start || row.date > end {
                continue;
            }
            bars.push(RawBar {
                date: row.date,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
                amount: row.amount.unwrap_or(row.close * row.volume as f64),
            });
        }
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    fn fetch_corporate_actions(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CorporateAction>, ProviderError> {
        Self::check_id(instrument_id)?;
        let path = self.actions_path(instrument_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut actions = Vec::new();
        for row in Self::reader(&path)?.deserialize::<ActionRow>() {
            let row = row.map_err(|e| {
                ProviderError::ResponseFormatChanged(format!("{}: {e}", path.display()))
            })?;
            if row.ex_date < start || row.ex_date > end {
                continue;
            }
            actions.push(CorporateAction {
                instrument_id: instrument_id.to_string(),
                ex_date: row.ex_date,
                dividend_per_share: row.dividend_per_share,
                bonus_ratio: row.bonus_ratio,
                rights_issue_ratio: row.rights_issue_ratio,
                rights_issue_price: row.rights_issue_price,
                record_date: row.record_date,
                pay_date: row.pay_date,
            });
        }
        actions.sort_by_key(|a| a.ex_date);
        Ok(actions)
    }

    fn is_available(&self) -> bool {
        self.dir.is_dir()
    }
}
