//! Read-through orchestration: serve bars from the store, fetch only what is
//! missing, recompute adjustments over the merged history, persist, return.
//!
//! Fallback policy for `get_bars`:
//! 1. Store covers every expected date → serve it (rebuilding adjusted
//!    columns first if they are incomplete or fail verification)
//! 2. Gaps and the provider delivers → merge (remote wins), adjust, persist
//! 3. Gaps and every fetch fails → serve what is stored, marked `Partial`
//! 4. Nothing stored and every fetch fails → `Empty(Unavailable)`

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use barvault_core::data::{ingest, ColumnStore, DataSource, QualityStats, RemoteProvider, StoreStatistics};
use barvault_core::domain::{
    validate_instrument_id, AdjustedBarSet, AdjustmentVariant, CorporateAction, DateRange, Period, RawBar,
};
use barvault_core::gaps::{detect_from_dates, GapDetector, GapReport};
use barvault_core::{AdjustmentEngine, DataError, TradingCalendar};

use crate::config::{Config, ConfigError};
use crate::fetch::TimedProvider;
use crate::response::{BarsResponse, Completeness, DataWarning, EmptyReason};

pub struct Orchestrator {
    config: Config,
    store: Arc<ColumnStore>,
    provider: TimedProvider,
    calendar: Arc<TradingCalendar>,
    schema_ready: OnceLock<()>,
}

/// Adjusted sets plus what went wrong producing them.
struct Rebuilt {
    sets: Vec<AdjustedBarSet>,
    warnings: Vec<DataWarning>,
    persist_error: Option<DataError>,
}

/// Outcome of fetching the missing segments.
struct Fetched {
    bars: Vec<RawBar>,
    failed_segments: usize,
    cause: Option<String>,
}

impl Fetched {
    fn all_failed(&self, segments: usize) -> bool {
        segments > 0 && self.failed_segments == segments
    }
}

impl Orchestrator {
    pub fn new(
        config: Config,
        store: Arc<ColumnStore>,
        provider: Arc<dyn RemoteProvider>,
        calendar: Arc<TradingCalendar>,
    ) -> Self {
        let provider = TimedProvider::new(
            provider,
            config.provider.timeout(),
            Duration::from_secs(config.provider.breaker_cooldown_secs),
        );
        Self {
            config,
            store,
            provider,
            calendar,
            schema_ready: OnceLock::new(),
        }
    }

    /// Build the store, provider and calendar named in `config`.
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let store = Arc::new(ColumnStore::new(&config.store.root));
        let provider = config.build_provider()?;
        let calendar = Arc::new(config.build_calendar()?);
        Ok(Self::new(config, store, provider, calendar))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ColumnStore {
        &self.store
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub(crate) fn provider(&self) -> &TimedProvider {
        &self.provider
    }

    /// Runs the store's schema check once per orchestrator. A failure is
    /// returned every time until a check succeeds.
    pub(crate) fn ensure_schema(&self) -> Result<(), DataError> {
        if self.schema_ready.get().is_some() {
            return Ok(());
        }
        let report = self.store.ensure_schema()?;
        if !report.files_migrated.is_empty() {
            info!(
                from = report.from_version,
                to = report.to_version,
                files = report.files_migrated.len(),
                "store schema upgraded"
            );
        }
        let _ = self.schema_ready.set(());
        Ok(())
    }

    pub fn get_statistics(&self) -> Result<StoreStatistics, DataError> {
        self.ensure_schema()?;
        self.store.statistics()
    }

    pub(crate) fn detect_gaps(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        period: Period,
    ) -> Result<GapReport, DataError> {
        GapDetector::new(&self.calendar, self.store.as_ref())
            .with_period(period)
            .detect(instrument_id, start, end)
    }

    /// Bars for `[start, end]` in the requested variant.
    ///
    /// Errors are reserved for invalid ranges, schema failures, and adjusted
    /// data that diverges and cannot be repaired. Everything else comes back
    /// as a response with completeness and warnings set.
    pub fn get_bars(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        period: Period,
        variant: AdjustmentVariant,
    ) -> Result<BarsResponse, DataError> {
        validate_instrument_id(instrument_id)?;
        let range = DateRange::new(start, end)?;
        self.ensure_schema()?;

        if self.calendar.expected_dates(start, end, period).is_empty() {
            debug!(instrument_id, %range, %period, "no trading days in range");
            return Ok(BarsResponse::empty(
                instrument_id,
                period,
                variant,
                EmptyReason::NoTradingDays,
            ));
        }

        let stored = self.store.read_adjusted(instrument_id, period, None)?;
        let report = self.detect_gaps(instrument_id, start, end, period)?;

        if report.missing_count == 0 {
            return self.serve_cached(instrument_id, period, variant, range, stored);
        }

        info!(
            instrument_id,
            %period,
            missing = report.missing_count,
            segments = report.segments.len(),
            "gaps found, fetching"
        );
        let fetched = self.fetch_segments(instrument_id, period, range, &report);

        if fetched.all_failed(report.segments.len()) {
            let cause = fetched.cause.unwrap_or_else(|| "provider unavailable".to_string());
            return self.serve_local_after_failure(instrument_id, period, variant, range, stored, &report, cause);
        }

        self.merge_and_serve(instrument_id, period, variant, range, stored, fetched)
    }

    fn serve_cached(
        &self,
        instrument_id: &str,
        period: Period,
        variant: AdjustmentVariant,
        range: DateRange,
        stored: Vec<AdjustedBarSet>,
    ) -> Result<BarsResponse, DataError> {
        let mut warnings = Vec::new();

        // (reason, must persist)
        let recompute = if stored.iter().any(|s| !s.is_complete()) {
            Some(("stored adjusted columns are incomplete".to_string(), false))
        } else if self.config.store.verify_on_read {
            match self.store.verify_adjustments(instrument_id, period) {
                Ok(()) => None,
                Err(e @ DataError::Consistency { .. }) => Some((e.to_string(), true)),
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let sets = match recompute {
            None => {
                debug!(instrument_id, %period, %range, "served from store");
                stored
            }
            Some((reason, must_persist)) => {
                warn!(instrument_id, %period, %reason, "recomputing adjusted columns");
                let raw: Vec<RawBar> = stored.iter().map(AdjustedBarSet::raw_bar).collect();
                let actions = self.store.read_corporate_actions(instrument_id)?;
                let rebuilt = self.adjust_and_persist(instrument_id, period, &raw, &actions)?;
                if let Some(e) = rebuilt.persist_error {
                    if must_persist {
                        return Err(e);
                    }
                    warnings.push(DataWarning::PersistenceFailed { cause: e.to_string() });
                }
                warnings.push(DataWarning::Recomputed { reason });
                warnings.extend(rebuilt.warnings);
                rebuilt.sets
            }
        };

        Ok(respond(
            instrument_id,
            period,
            variant,
            range,
            &sets,
            Completeness::Complete,
            DataSource::Store,
            warnings,
        ))
    }

    /// One provider call per gap segment. A failed segment does not stop the
    /// others. Weekly and monthly segments are widened to the end of their
    /// last bucket, clamped to the request.
    fn fetch_segments(
        &self,
        instrument_id: &str,
        period: Period,
        range: DateRange,
        report: &GapReport,
    ) -> Fetched {
        let mut fetched = Fetched {
            bars: Vec::new(),
            failed_segments: 0,
            cause: None,
        };
        if !self.provider.is_available() {
            warn!(instrument_id, provider = self.provider.name(), "provider unavailable");
            fetched.failed_segments = report.segments.len();
            fetched.cause = Some(format!("provider '{}' is unavailable", self.provider.name()));
            return fetched;
        }

        for segment in &report.segments {
            let end = period.bucket_end(segment.end_date).min(range.end);
            match self
                .provider
                .fetch_bars(instrument_id, segment.start_date, end, period)
            {
                Ok(bars) => {
                    debug!(
                        instrument_id,
                        start = %segment.start_date,
                        %end,
                        received = bars.len(),
                        "segment fetched"
                    );
                    fetched.bars.extend(bars);
                }
                Err(e) => {
                    warn!(
                        instrument_id,
                        start = %segment.start_date,
                        %end,
                        error = %e,
                        "segment fetch failed"
                    );
                    fetched.failed_segments += 1;
                    fetched.cause.get_or_insert_with(|| e.to_string());
                }
            }
        }
        fetched
    }

    #[allow(clippy::too_many_arguments)]
    fn serve_local_after_failure(
        &self,
        instrument_id: &str,
        period: Period,
        variant: AdjustmentVariant,
        range: DateRange,
        stored: Vec<AdjustedBarSet>,
        report: &GapReport,
        cause: String,
    ) -> Result<BarsResponse, DataError> {
        if !stored.iter().any(|s| range.contains(s.date)) {
            warn!(instrument_id, %period, %cause, "nothing stored and remote failed");
            return Ok(BarsResponse::empty(
                instrument_id,
                period,
                variant,
                EmptyReason::Unavailable { cause },
            ));
        }

        let mut warnings = vec![DataWarning::PartialData {
            missing_days: report.missing_count,
            cause,
        }];
        let sets = if stored.iter().all(AdjustedBarSet::is_complete) {
            stored
        } else {
            let raw: Vec<RawBar> = stored.iter().map(AdjustedBarSet::raw_bar).collect();
            let actions = self.store.read_corporate_actions(instrument_id)?;
            let rebuilt = self.adjust_and_persist(instrument_id, period, &raw, &actions)?;
            if let Some(e) = rebuilt.persist_error {
                warnings.push(DataWarning::PersistenceFailed { cause: e.to_string() });
            }
            warnings.push(DataWarning::Recomputed {
                reason: "stored adjusted columns are incomplete".into(),
            });
            warnings.extend(rebuilt.warnings);
            rebuilt.sets
        };

        Ok(respond(
            instrument_id,
            period,
            variant,
            range,
            &sets,
            Completeness::Partial {
                missing_days: report.missing_count,
            },
            DataSource::Store,
            warnings,
        ))
    }

    fn merge_and_serve(
        &self,
        instrument_id: &str,
        period: Period,
        variant: AdjustmentVariant,
        range: DateRange,
        stored: Vec<AdjustedBarSet>,
        fetched: Fetched,
    ) -> Result<BarsResponse, DataError> {
        let mut warnings = Vec::new();
        if let Some(cause) = &fetched.cause {
            warnings.push(DataWarning::PartialData {
                missing_days: 0,
                cause: cause.clone(),
            });
        }

        let ingested = ingest::ingest(instrument_id, fetched.bars);
        warnings.extend(ingested.anomalies.into_iter().map(DataWarning::IntegrityAnomaly));
        let source = if stored.is_empty() {
            DataSource::Remote
        } else {
            DataSource::Merged
        };

        // Whole stored history, remote wins on overlap.
        let mut merged: BTreeMap<NaiveDate, RawBar> =
            stored.iter().map(|s| (s.date, s.raw_bar())).collect();
        let earliest = stored.first().map_or(range.start, |s| s.date.min(range.start));
        for bar in ingested.bars {
            merged.insert(bar.date, bar);
        }
        let merged: Vec<RawBar> = merged.into_values().collect();

        let actions = self.refresh_actions(instrument_id, earliest, range.end, &mut warnings)?;
        let rebuilt = self.adjust_and_persist(instrument_id, period, &merged, &actions)?;
        if let Some(e) = rebuilt.persist_error {
            warnings.push(DataWarning::PersistenceFailed { cause: e.to_string() });
        }
        warnings.extend(rebuilt.warnings);

        let dates: Vec<NaiveDate> = merged.iter().map(|b| b.date).collect();
        let residual = detect_from_dates(&self.calendar, instrument_id, period, range, &dates);
        let completeness = if residual.missing_count == 0 {
            Completeness::Complete
        } else {
            Completeness::Partial {
                missing_days: residual.missing_count,
            }
        };
        // Report the residual gap on the fetch-failure warning.
        for w in &mut warnings {
            if let DataWarning::PartialData { missing_days, .. } = w {
                *missing_days = residual.missing_count;
            }
        }

        info!(
            instrument_id,
            %period,
            total = merged.len(),
            residual_missing = residual.missing_count,
            warnings = warnings.len(),
            "bars merged"
        );
        Ok(respond(
            instrument_id,
            period,
            variant,
            range,
            &rebuilt.sets,
            completeness,
            source,
            warnings,
        ))
    }

    /// Stored actions overlaid with a fresh fetch. If the fetch fails the
    /// stored set is used and a warning attached.
    fn refresh_actions(
        &self,
        instrument_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        warnings: &mut Vec<DataWarning>,
    ) -> Result<Vec<CorporateAction>, DataError> {
        let stored = self.store.read_corporate_actions(instrument_id)?;
        let fresh = match self.provider.fetch_corporate_actions(instrument_id, start, end) {
            Ok(actions) => actions,
            Err(e) => {
                warn!(instrument_id, error = %e, "corporate action fetch failed, using stored set");
                warnings.push(DataWarning::StaleCorporateActions { cause: e.to_string() });
                return Ok(stored);
            }
        };

        if let Err(e) = self.store.upsert_corporate_actions(instrument_id, &fresh) {
            warn!(instrument_id, error = %e, "corporate actions not persisted");
            warnings.push(DataWarning::PersistenceFailed { cause: e.to_string() });
        }
        let mut by_date: BTreeMap<NaiveDate, CorporateAction> =
            stored.into_iter().map(|a| (a.ex_date, a)).collect();
        for action in fresh {
            by_date.insert(action.ex_date, action);
        }
        Ok(by_date.into_values().collect())
    }

    /// Adjust the full series and write it back with its quality row.
    /// Persistence problems are returned in `Rebuilt`, not as `Err`.
    fn adjust_and_persist(
        &self,
        instrument_id: &str,
        period: Period,
        raw: &[RawBar],
        actions: &[CorporateAction],
    ) -> Result<Rebuilt, DataError> {
        let outcome = AdjustmentEngine::adjust(instrument_id, raw, actions)?;
        let mut warnings: Vec<DataWarning> = outcome
            .rejected
            .into_iter()
            .map(|r| DataWarning::RejectedCorporateAction {
                ex_date: r.ex_date,
                reason: r.reason,
            })
            .collect();

        let mut persist_error = None;
        if let Err(e) = self.store.upsert_bars(instrument_id, period, &outcome.bars) {
            warn!(instrument_id, %period, error = %e, "adjusted bars not persisted");
            persist_error = Some(e);
        } else if !raw.is_empty() {
            let dates: Vec<NaiveDate> = raw.iter().map(|b| b.date).collect();
            let stats = QualityStats::compute(instrument_id, period, &dates, &self.calendar);
            if let Err(e) = self.store.record_quality(&stats) {
                warn!(instrument_id, %period, error = %e, "quality stats not persisted");
                warnings.push(DataWarning::PersistenceFailed { cause: e.to_string() });
            }
        }

        Ok(Rebuilt {
            sets: outcome.bars,
            warnings,
            persist_error,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn respond(
    instrument_id: &str,
    period: Period,
    variant: AdjustmentVariant,
    range: DateRange,
    sets: &[AdjustedBarSet],
    completeness: Completeness,
    source: DataSource,
    warnings: Vec<DataWarning>,
) -> BarsResponse {
    BarsResponse {
        instrument_id: instrument_id.to_string(),
        period,
        variant,
        bars: sets
            .iter()
            .filter(|s| range.contains(s.date))
            .map(|s| s.to_bar(instrument_id, period, variant))
            .collect(),
        completeness,
        source,
        warnings,
    }
}
