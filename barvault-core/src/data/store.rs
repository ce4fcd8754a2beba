//! Parquet column store with Hive-style partitioning.
//!
//! Layout:
//!
//! ```text
//! {root}/manifest.json
//! {root}/bars/instrument={ID}/period={P}.parquet
//! {root}/corporate_actions/instrument={ID}.parquet
//! {root}/quality_stats.parquet
//! ```
//!
//! Every write rewrites one file to `.tmp` and renames it into place, so a
//! failed write leaves the previous state intact and readers never see a
//! partial file. Writes are serialised through one mutex; reads take no lock.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adjust::AdjustmentEngine;
use crate::calendar::TradingCalendar;
use crate::domain::{
    validate_instrument_id, AdjustedBarSet, AdjustmentVariant, Bar, CorporateAction, DateRange, Period,
    RawBar, SymbolType,
};
use crate::error::DataError;
use crate::gaps::{detect_from_dates, BarIndex};

use super::frames::{self, StoredBar};
use super::schema::{
    self, Manifest, MigrationRecord, SeriesEntry, BARS_COLUMNS, CORPORATE_ACTION_COLUMNS,
    CURRENT_SCHEMA_VERSION,
};

/// Informational quality summary for one `(instrument, period)` series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityStats {
    pub instrument_id: String,
    pub period: Period,
    pub record_count: u64,
    /// Distinct dates stored.
    pub trading_days: u64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    /// Expected dates between first and last that are not stored.
    pub missing_days: u64,
    pub completeness: f64,
    /// Epoch milliseconds.
    pub checked_at: i64,
}

impl QualityStats {
    pub fn compute(
        instrument_id: &str,
        period: Period,
        dates: &[NaiveDate],
        calendar: &TradingCalendar,
    ) -> Self {
        let mut distinct: Vec<NaiveDate> = dates.to_vec();
        distinct.sort();
        distinct.dedup();
        let first_date = distinct.first().copied();
        let last_date = distinct.last().copied();

        let (missing_days, completeness) = match (first_date, last_date) {
            (Some(start), Some(end)) => {
                let report =
                    detect_from_dates(calendar, instrument_id, period, DateRange { start, end }, &distinct);
                (report.missing_count as u64, report.completeness_ratio)
            }
            _ => (0, 0.0),
        };

        Self {
            instrument_id: instrument_id.to_string(),
            period,
            record_count: dates.len() as u64,
            trading_days: distinct.len() as u64,
            first_date,
            last_date,
            missing_days,
            completeness,
            checked_at: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub schema_version: u32,
    pub instruments: usize,
    pub total_records: u64,
    pub corporate_actions: usize,
    pub per_series: Vec<QualityStats>,
}

/// Counts from one bars upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Outcome of `ensure_schema`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaReport {
    pub from_version: u32,
    pub to_version: u32,
    pub files_migrated: Vec<String>,
}

pub struct ColumnStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl ColumnStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    fn bars_root(&self) -> PathBuf {
        self.root.join("bars")
    }

    fn actions_root(&self) -> PathBuf {
        self.root.join("corporate_actions")
    }

    /// `{root}/bars/instrument={ID}/period={P}.parquet`
    pub fn bars_path(&self, instrument_id: &str, period: Period) -> PathBuf {
        self.bars_root()
            .join(format!("instrument={instrument_id}"))
            .join(format!("period={period}.parquet"))
    }

    /// `{root}/corporate_actions/instrument={ID}.parquet`
    pub fn actions_path(&self, instrument_id: &str) -> PathBuf {
        self.actions_root()
            .join(format!("instrument={instrument_id}.parquet"))
    }

    fn quality_path(&self) -> PathBuf {
        self.root.join("quality_stats.parquet")
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    // ── Schema ──────────────────────────────────────────────────────

    /// Create the layout and bring every stored file up to the current
    /// schema. Safe to call any number of times.
    pub fn ensure_schema(&self) -> Result<SchemaReport, DataError> {
        let _guard = self.lock();

        for dir in [self.root.clone(), self.bars_root(), self.actions_root()] {
            fs::create_dir_all(&dir)
                .map_err(|e| DataError::Io(format!("create {}: {e}", dir.display())))?;
        }

        let bar_files = self.list_bar_files()?;
        let action_files = self.list_action_files()?;

        let mut manifest = match Manifest::load(&self.manifest_path())? {
            Some(m) => m,
            // Files without a manifest predate it: version 1.
            None if !bar_files.is_empty() || !action_files.is_empty() => Manifest::new(1),
            None => Manifest::new(CURRENT_SCHEMA_VERSION),
        };
        let from_version = manifest.schema_version;
        let now_ms = Utc::now().timestamp_millis();
        let mut files_migrated = Vec::new();

        let targets = bar_files
            .into_iter()
            .map(|(id, _, path)| (id, path, BARS_COLUMNS))
            .chain(action_files.into_iter().map(|(id, path)| (id, path, CORPORATE_ACTION_COLUMNS)));

        for (instrument_id, path, specs) in targets {
            let file = self.relative(&path);
            let mut df = frames::read_parquet(&path)?;
            let actions = schema::upgrade_frame(&mut df, specs, &file, &instrument_id, now_ms)?;
            if actions.is_empty() {
                continue;
            }
            frames::write_parquet_atomic(&mut df, &path)?;
            info!(
                file = %file,
                added = actions.added.len(),
                widened = actions.widened.len(),
                "schema migrated"
            );
            manifest.migrations.push(MigrationRecord {
                from_version,
                to_version: CURRENT_SCHEMA_VERSION,
                file: file.clone(),
                added: actions.added,
                widened: actions.widened,
                applied_at: Utc::now(),
            });
            files_migrated.push(file);
        }

        let manifest_missing = !self.manifest_path().exists();
        if manifest_missing || from_version != CURRENT_SCHEMA_VERSION || !files_migrated.is_empty() {
            manifest.schema_version = CURRENT_SCHEMA_VERSION;
            manifest.save(&self.manifest_path())?;
        }

        Ok(SchemaReport {
            from_version,
            to_version: CURRENT_SCHEMA_VERSION,
            files_migrated,
        })
    }

    pub fn manifest(&self) -> Result<Manifest, DataError> {
        Ok(Manifest::load(&self.manifest_path())?.unwrap_or_else(|| Manifest::new(CURRENT_SCHEMA_VERSION)))
    }

    /// `(instrument_id, period, path)` for every bars file.
    fn list_bar_files(&self) -> Result<Vec<(String, Period, PathBuf)>, DataError> {
        let mut out = Vec::new();
        for instrument_dir in read_dir_sorted(&self.bars_root())? {
            let Some(instrument_id) = partition_value(&instrument_dir, "instrument=") else {
                continue;
            };
            for file in read_dir_sorted(&instrument_dir)? {
                if file.extension().and_then(|e| e.to_str()) != Some("parquet") {
                    continue;
                }
                let period = file
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.strip_prefix("period="))
                    .and_then(|s| s.parse::<Period>().ok());
                if let Some(period) = period {
                    out.push((instrument_id.clone(), period, file));
                }
            }
        }
        Ok(out)
    }

    fn list_action_files(&self) -> Result<Vec<(String, PathBuf)>, DataError> {
        Ok(read_dir_sorted(&self.actions_root())?
            .into_iter()
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("parquet"))
            .filter_map(|p| {
                let stem = p.file_stem()?.to_str()?;
                Some((stem.strip_prefix("instrument=")?.to_string(), p))
            })
            .collect())
    }

    // ── Bars ────────────────────────────────────────────────────────

    fn load_rows(&self, instrument_id: &str, period: Period) -> Result<Vec<StoredBar>, DataError> {
        validate_instrument_id(instrument_id)?;
        let path = self.bars_path(instrument_id, period);
        if !path.exists() {
            return Ok(Vec::new());
        }
        frames::frame_to_bars(&frames::read_parquet(&path)?)
    }

    /// Replace-by-date upsert of adjusted sets. Rows whose content is
    /// unchanged keep both timestamps, so writing the same input twice
    /// leaves identical rows.
    pub fn upsert_bars(
        &self,
        instrument_id: &str,
        period: Period,
        sets: &[AdjustedBarSet],
    ) -> Result<UpsertSummary, DataError> {
        validate_instrument_id(instrument_id)?;
        let _guard = self.lock();
        let persist = |e: DataError| DataError::persistence(instrument_id, period, e.to_string());

        let mut rows: BTreeMap<NaiveDate, StoredBar> = self
            .load_rows(instrument_id, period)
            .map_err(persist)?
            .into_iter()
            .map(|r| (r.set.date, r))
            .collect();

        let now = Utc::now().timestamp_millis();
        let symbol_type = SymbolType::infer(instrument_id);
        let mut summary = UpsertSummary::default();

        for set in sets {
            match rows.get_mut(&set.date) {
                Some(existing) if existing.set == *set => summary.unchanged += 1,
                Some(existing) => {
                    existing.set = set.clone();
                    existing.updated_at = now;
                    summary.updated += 1;
                }
                None => {
                    rows.insert(
                        set.date,
                        StoredBar {
                            set: set.clone(),
                            symbol_type,
                            created_at: now,
                            updated_at: now,
                        },
                    );
                    summary.inserted += 1;
                }
            }
        }

        if summary.inserted == 0 && summary.updated == 0 {
            debug!(instrument_id, %period, unchanged = summary.unchanged, "upsert: nothing to write");
            return Ok(summary);
        }

        let rows: Vec<StoredBar> = rows.into_values().collect();
        let path = self.bars_path(instrument_id, period);
        let mut df = frames::bars_to_frame(instrument_id, period, &rows).map_err(persist)?;
        frames::write_parquet_atomic(&mut df, &path).map_err(persist)?;

        if let Err(e) = self.update_series_entry(instrument_id, period, &rows) {
            warn!(instrument_id, %period, error = %e, "manifest series entry not updated");
        }

        info!(
            instrument_id,
            %period,
            inserted = summary.inserted,
            updated = summary.updated,
            total = rows.len(),
            "bars upserted"
        );
        Ok(summary)
    }

    fn update_series_entry(
        &self,
        instrument_id: &str,
        period: Period,
        rows: &[StoredBar],
    ) -> Result<(), DataError> {
        let raw: Vec<RawBar> = rows.iter().map(|r| r.set.raw_bar()).collect();
        let hash = blake3::hash(
            &serde_json::to_vec(&raw).map_err(|e| DataError::Io(format!("hash serialization: {e}")))?,
        );
        let mut manifest = self.manifest()?;
        manifest.series.insert(
            Manifest::series_key(instrument_id, period),
            SeriesEntry {
                instrument_id: instrument_id.to_string(),
                period,
                first_date: raw.first().map(|b| b.date),
                last_date: raw.last().map(|b| b.date),
                bar_count: raw.len(),
                data_hash: hash.to_hex().to_string(),
                updated_at: Utc::now(),
            },
        );
        manifest.save(&self.manifest_path())
    }

    /// All stored variants, ascending, optionally restricted to `range`.
    pub fn read_adjusted(
        &self,
        instrument_id: &str,
        period: Period,
        range: Option<DateRange>,
    ) -> Result<Vec<AdjustedBarSet>, DataError> {
        Ok(self
            .load_rows(instrument_id, period)?
            .into_iter()
            .map(|r| r.set)
            .filter(|s| range.map_or(true, |r| r.contains(s.date)))
            .collect())
    }

    pub fn read_raw(
        &self,
        instrument_id: &str,
        period: Period,
        range: Option<DateRange>,
    ) -> Result<Vec<RawBar>, DataError> {
        Ok(self
            .read_adjusted(instrument_id, period, range)?
            .iter()
            .map(AdjustedBarSet::raw_bar)
            .collect())
    }

    /// One variant's OHLC plus the shared volume/amount, ascending.
    pub fn read_bars(
        &self,
        instrument_id: &str,
        period: Period,
        range: DateRange,
        variant: AdjustmentVariant,
    ) -> Result<Vec<Bar>, DataError> {
        Ok(self
            .read_adjusted(instrument_id, period, Some(range))?
            .iter()
            .map(|s| s.to_bar(instrument_id, period, variant))
            .collect())
    }

    /// Instruments with at least one bars file, sorted.
    pub fn instruments(&self) -> Result<Vec<String>, DataError> {
        let mut ids: Vec<String> = self.list_bar_files()?.into_iter().map(|(id, _, _)| id).collect();
        ids.dedup();
        Ok(ids)
    }

    // ── Corporate actions ───────────────────────────────────────────

    pub fn read_corporate_actions(&self, instrument_id: &str) -> Result<Vec<CorporateAction>, DataError> {
        validate_instrument_id(instrument_id)?;
        let path = self.actions_path(instrument_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        frames::frame_to_actions(&frames::read_parquet(&path)?)
    }

    /// Replace-by-`ex_date` upsert. Returns the number of stored actions.
    pub fn upsert_corporate_actions(
        &self,
        instrument_id: &str,
        actions: &[CorporateAction],
    ) -> Result<usize, DataError> {
        validate_instrument_id(instrument_id)?;
        let _guard = self.lock();
        let persist = |e: DataError| DataError::persistence(instrument_id, Period::Daily, e.to_string());

        let mut by_date: BTreeMap<NaiveDate, CorporateAction> = self
            .read_corporate_actions(instrument_id)
            .map_err(persist)?
            .into_iter()
            .map(|a| (a.ex_date, a))
            .collect();
        let before = by_date.clone();
        for action in actions {
            let mut action = action.clone();
            action.instrument_id = instrument_id.to_string();
            by_date.insert(action.ex_date, action);
        }
        if by_date == before {
            return Ok(by_date.len());
        }

        let merged: Vec<CorporateAction> = by_date.into_values().collect();
        let mut df = frames::actions_to_frame(instrument_id, &merged).map_err(persist)?;
        frames::write_parquet_atomic(&mut df, &self.actions_path(instrument_id)).map_err(persist)?;
        debug!(instrument_id, stored = merged.len(), "corporate actions upserted");
        Ok(merged.len())
    }

    // ── Consistency ─────────────────────────────────────────────────

    /// Recompute the adjusted variants from stored raw bars and actions and
    /// compare with what is stored.
    pub fn verify_adjustments(&self, instrument_id: &str, period: Period) -> Result<(), DataError> {
        let stored = self.read_adjusted(instrument_id, period, None)?;
        let (Some(first), Some(last)) = (stored.first(), stored.last()) else {
            return Ok(());
        };
        let (start, end) = (first.date, last.date);
        let raw: Vec<RawBar> = stored.iter().map(AdjustedBarSet::raw_bar).collect();
        let actions = self.read_corporate_actions(instrument_id)?;
        let expected = AdjustmentEngine::adjust(instrument_id, &raw, &actions)?;

        let diverged: Vec<NaiveDate> = stored
            .iter()
            .zip(&expected.bars)
            .filter(|(have, want)| !sets_match(have, want))
            .map(|(have, _)| have.date)
            .collect();

        match (diverged.first(), diverged.last()) {
            (Some(from), Some(to)) => Err(DataError::Consistency {
                instrument_id: instrument_id.to_string(),
                period,
                start: *from,
                end: *to,
                detail: format!("{} of {} bars differ from recomputation", diverged.len(), stored.len()),
            }),
            _ => {
                debug!(instrument_id, %period, %start, %end, "adjustments verified");
                Ok(())
            }
        }
    }

    // ── Quality ─────────────────────────────────────────────────────

    pub fn read_quality(&self) -> Result<Vec<QualityStats>, DataError> {
        let path = self.quality_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        frames::frame_to_quality(&frames::read_parquet(&path)?)
    }

    /// Replace the stats row for `(stats.instrument_id, stats.period)`.
    pub fn record_quality(&self, stats: &QualityStats) -> Result<(), DataError> {
        let _guard = self.lock();
        let persist = |e: DataError| DataError::persistence(&stats.instrument_id, stats.period, e.to_string());
        let mut all = self.read_quality().map_err(persist)?;
        all.retain(|s| !(s.instrument_id == stats.instrument_id && s.period == stats.period));
        all.push(stats.clone());
        all.sort_by(|a, b| (&a.instrument_id, a.period).cmp(&(&b.instrument_id, b.period)));
        let mut df = frames::quality_to_frame(&all).map_err(persist)?;
        frames::write_parquet_atomic(&mut df, &self.quality_path()).map_err(persist)
    }

    pub fn statistics(&self) -> Result<StoreStatistics, DataError> {
        let bar_files = self.list_bar_files()?;
        let mut instruments: Vec<&str> = bar_files.iter().map(|(id, _, _)| id.as_str()).collect();
        instruments.dedup();

        let mut total_records = 0u64;
        for (_, _, path) in &bar_files {
            total_records += frames::read_parquet(path)?.height() as u64;
        }
        let mut corporate_actions = 0usize;
        for (_, path) in self.list_action_files()? {
            corporate_actions += frames::read_parquet(&path)?.height();
        }

        Ok(StoreStatistics {
            schema_version: self.manifest()?.schema_version,
            instruments: instruments.len(),
            total_records,
            corporate_actions,
            per_series: self.read_quality()?,
        })
    }
}

impl BarIndex for ColumnStore {
    fn existing_dates(
        &self,
        instrument_id: &str,
        period: Period,
        range: DateRange,
    ) -> Result<Vec<NaiveDate>, DataError> {
        validate_instrument_id(instrument_id)?;
        let path = self.bars_path(instrument_id, period);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut dates = frames::frame_dates(&frames::read_parquet(&path)?)?;
        dates.retain(|d| range.contains(*d));
        dates.sort();
        Ok(dates)
    }
}

const TOLERANCE: f64 = 1e-9;

fn close_enough(a: f64, b: f64) -> bool {
    (a - b).abs() <= TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

fn sets_match(have: &AdjustedBarSet, want: &AdjustedBarSet) -> bool {
    if have.date != want.date || !have.is_complete() {
        return false;
    }
    AdjustmentVariant::ALL.iter().all(|v| {
        let (a, b) = (have.ohlc(*v), want.ohlc(*v));
        close_enough(a.open, b.open)
            && close_enough(a.high, b.high)
            && close_enough(a.low, b.low)
            && close_enough(a.close, b.close)
            && close_enough(have.factor(*v), want.factor(*v))
    })
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, DataError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| DataError::Io(format!("read dir {}: {e}", dir.display())))? {
        let entry = entry.map_err(|e| DataError::Io(format!("dir entry: {e}")))?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

fn partition_value(path: &Path, prefix: &str) -> Option<String> {
    if !path.is_dir() {
        return None;
    }
    path.file_name()?
        .to_str()?
        .strip_prefix(prefix)
        .map(str::to_string)
}
