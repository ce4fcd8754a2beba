//! Batch import: fill gaps for many instruments on a private rayon pool,
//! with per-instrument checkpoints so an interrupted run resumes where it
//! stopped.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use barvault_core::domain::AdjustmentVariant;

use crate::checkpoint::{Checkpoint, ImportRequest};
use crate::orchestrator::Orchestrator;
use crate::response::{BarsResponse, Completeness, DataWarning, EmptyReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Success,
    Failed,
    Skipped,
}

/// One row of the import report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportDetail {
    pub instrument_id: String,
    pub status: ImportStatus,
    pub bars: usize,
    /// Expected days still missing afterwards.
    pub missing_days: usize,
    pub message: Option<String>,
}

impl ImportDetail {
    fn skipped(instrument_id: &str, message: &str) -> Self {
        Self {
            instrument_id: instrument_id.to_string(),
            status: ImportStatus::Skipped,
            bars: 0,
            missing_days: 0,
            message: Some(message.to_string()),
        }
    }

    fn failed(instrument_id: &str, message: String) -> Self {
        Self {
            instrument_id: instrument_id.to_string(),
            status: ImportStatus::Failed,
            bars: 0,
            missing_days: 0,
            message: Some(message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    /// Stopped early by the cancel flag.
    pub cancelled: bool,
    pub details: Vec<ImportDetail>,
}

impl ImportReport {
    fn push(&mut self, detail: ImportDetail) {
        match detail.status {
            ImportStatus::Success => self.success_count += 1,
            ImportStatus::Failed => self.failed_count += 1,
            ImportStatus::Skipped => self.skipped_count += 1,
        }
        self.details.push(detail);
    }

    pub fn to_csv(&self) -> Result<String> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        for detail in &self.details {
            wtr.serialize(detail).context("failed to write report row")?;
        }
        let data = wtr.into_inner().context("failed to flush CSV writer")?;
        String::from_utf8(data).context("CSV output is not valid UTF-8")
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating report dir {}", parent.display()))?;
        }
        fs::write(path, self.to_csv()?)
            .with_context(|| format!("writing import report {}", path.display()))
    }
}

/// Callbacks during a batch import. Called from pool threads.
pub trait ImportProgress: Send + Sync {
    fn on_start(&self, instrument_id: &str, index: usize, total: usize);

    fn on_complete(&self, instrument_id: &str, index: usize, total: usize, detail: &ImportDetail);

    fn on_batch_complete(&self, report: &ImportReport);
}

/// Progress reporter that logs through `tracing`.
pub struct LogProgress;

impl ImportProgress for LogProgress {
    fn on_start(&self, instrument_id: &str, index: usize, total: usize) {
        info!(instrument_id, n = index + 1, total, "importing");
    }

    fn on_complete(&self, instrument_id: &str, index: usize, total: usize, detail: &ImportDetail) {
        match detail.status {
            ImportStatus::Failed => warn!(
                instrument_id,
                n = index + 1,
                total,
                reason = detail.message.as_deref().unwrap_or(""),
                "import failed"
            ),
            _ => info!(instrument_id, n = index + 1, total, bars = detail.bars, "import done"),
        }
    }

    fn on_batch_complete(&self, report: &ImportReport) {
        info!(
            succeeded = report.success_count,
            failed = report.failed_count,
            skipped = report.skipped_count,
            cancelled = report.cancelled,
            "batch import complete"
        );
    }
}

/// Map a `get_bars` response to an import outcome. Persistence failures and
/// failed fetches count as failures; gaps the provider simply has no data
/// for do not.
fn classify(instrument_id: &str, response: &BarsResponse) -> ImportDetail {
    let cause = response.warnings.iter().find_map(|w| match w {
        DataWarning::PersistenceFailed { cause } => Some(format!("not persisted: {cause}")),
        DataWarning::PartialData { cause, .. } => Some(format!("fetch failed: {cause}")),
        _ => None,
    });
    match (&response.completeness, cause) {
        (Completeness::Empty(EmptyReason::NoTradingDays), _) => {
            ImportDetail::skipped(instrument_id, "no trading days in range")
        }
        (Completeness::Empty(EmptyReason::Unavailable { cause }), _) => {
            ImportDetail::failed(instrument_id, cause.clone())
        }
        (completeness, Some(cause)) => ImportDetail {
            missing_days: missing_of(completeness),
            bars: response.bars.len(),
            ..ImportDetail::failed(instrument_id, cause)
        },
        (completeness, None) => ImportDetail {
            instrument_id: instrument_id.to_string(),
            status: ImportStatus::Success,
            bars: response.bars.len(),
            missing_days: missing_of(completeness),
            message: None,
        },
    }
}

fn missing_of(completeness: &Completeness) -> usize {
    match completeness {
        Completeness::Partial { missing_days } => *missing_days,
        _ => 0,
    }
}

impl Orchestrator {
    /// Fill gaps for every instrument in `request`.
    ///
    /// Instruments without gaps, or already finished according to the
    /// checkpoint, are skipped. The rest run `batch_size` at a time on a pool
    /// of `concurrency` threads. Setting `cancel` stops new instruments from
    /// starting; finished ones stay checkpointed. The checkpoint is deleted
    /// when a run completes with no failures.
    pub fn import_batch(
        &self,
        request: &ImportRequest,
        progress: &dyn ImportProgress,
        cancel: &AtomicBool,
    ) -> Result<ImportReport> {
        self.ensure_schema().context("store schema check failed")?;

        let runner = &self.config().runner;
        let checkpoint = Checkpoint::load_or_new(&runner.checkpoint_dir, &request.key())?;
        let plan = GapPlan::build(self, request, &checkpoint)?;
        info!(
            instruments = request.instrument_ids.len(),
            with_gaps = plan.pending.len(),
            resumed = checkpoint.completed.len(),
            "batch import planned"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(runner.concurrency)
            .thread_name(|i| format!("barvault-import-{i}"))
            .build()
            .context("failed to build import thread pool")?;

        // `Orchestrator::new` accepts unvalidated configs.
        let batch_size = runner.batch_size.max(1);
        let checkpoint = Mutex::new(checkpoint);
        let total = plan.pending.len();
        let mut results: Vec<(usize, ImportDetail)> = plan.skipped;
        let mut cancelled = false;

        for (chunk_no, chunk) in plan.pending.chunks(batch_size).enumerate() {
            if cancel.load(Ordering::Relaxed) {
                cancelled = true;
                break;
            }
            let chunk_results: Vec<(usize, usize, ImportDetail)> = pool.install(|| {
                chunk
                    .par_iter()
                    .enumerate()
                    .map(|(i, (order, id))| {
                        let index = chunk_no * batch_size + i;
                        if cancel.load(Ordering::Relaxed) {
                            return (index, *order, ImportDetail::skipped(id, "cancelled"));
                        }
                        progress.on_start(id, index, total);
                        let detail = self.import_one(request, id, &checkpoint);
                        progress.on_complete(id, index, total, &detail);
                        (index, *order, detail)
                    })
                    .collect()
            });
            for (_, order, detail) in chunk_results {
                cancelled |= detail.message.as_deref() == Some("cancelled");
                results.push((order, detail));
            }
        }

        // Instruments never reached because of cancellation.
        let reached: BTreeSet<usize> = results.iter().map(|(order, _)| *order).collect();
        for (order, id) in &plan.pending {
            if !reached.contains(order) {
                results.push((*order, ImportDetail::skipped(id, "cancelled")));
            }
        }

        results.sort_by_key(|(order, _)| *order);
        let mut report = ImportReport {
            cancelled,
            ..ImportReport::default()
        };
        for (_, detail) in results {
            report.push(detail);
        }

        let checkpoint = checkpoint.into_inner().unwrap_or_else(|p| p.into_inner());
        if !report.cancelled && report.failed_count == 0 {
            checkpoint.remove()?;
        } else {
            checkpoint.save()?;
        }

        progress.on_batch_complete(&report);
        Ok(report)
    }

    fn import_one(
        &self,
        request: &ImportRequest,
        instrument_id: &str,
        checkpoint: &Mutex<Checkpoint>,
    ) -> ImportDetail {
        let detail = match self.get_bars(
            instrument_id,
            request.start,
            request.end,
            request.period,
            AdjustmentVariant::None,
        ) {
            Ok(response) => classify(instrument_id, &response),
            Err(e) => ImportDetail::failed(instrument_id, e.to_string()),
        };

        if detail.status == ImportStatus::Success {
            let mut cp = checkpoint.lock().unwrap_or_else(|p| p.into_inner());
            cp.mark_completed(instrument_id);
            if let Err(e) = cp.save() {
                warn!(instrument_id, error = %e, "checkpoint not saved");
            }
        }
        detail
    }
}

/// Instruments split into work and already-settled rows, each tagged with
/// its position in the request.
struct GapPlan {
    pending: Vec<(usize, String)>,
    skipped: Vec<(usize, ImportDetail)>,
}

impl GapPlan {
    fn build(orch: &Orchestrator, request: &ImportRequest, checkpoint: &Checkpoint) -> Result<Self> {
        let mut seen = BTreeSet::new();
        let mut skipped = Vec::new();
        let mut candidates = Vec::new();
        for (order, id) in request.instrument_ids.iter().enumerate() {
            if !seen.insert(id.as_str()) {
                skipped.push((order, ImportDetail::skipped(id, "duplicate in request")));
            } else if checkpoint.is_completed(id) {
                skipped.push((order, ImportDetail::skipped(id, "completed in a previous run")));
            } else {
                candidates.push((order, id.clone()));
            }
        }

        let ids: Vec<String> = candidates.iter().map(|(_, id)| id.clone()).collect();
        let plan = barvault_core::GapDetector::new(orch.calendar(), orch.store())
            .with_period(request.period)
            .build_download_plan(&ids, request.start, request.end)
            .context("gap detection failed")?;
        let with_gaps: BTreeSet<&str> = plan.tasks.iter().map(|t| t.instrument_id.as_str()).collect();

        let mut pending = Vec::new();
        for (order, id) in candidates {
            if with_gaps.contains(id.as_str()) {
                pending.push((order, id));
            } else {
                skipped.push((order, ImportDetail::skipped(&id, "no gaps")));
            }
        }
        Ok(Self { pending, skipped })
    }
}
