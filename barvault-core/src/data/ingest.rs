//! Ingest pipeline: sort, dedupe and sanity-check provider bars before they
//! reach the adjustment engine.
//!
//! Bars without a usable close are dropped (they cannot anchor an
//! adjustment). A missing open, high or low takes the close so every stored
//! price is finite. Suspicious rows are reported as anomalies so the caller
//! can surface them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::RawBar;

/// A daily close-to-close move larger than this fraction is flagged.
pub const LARGE_MOVE_THRESHOLD: f64 = 0.20;

/// Volume above `mean + VOLUME_SIGMA * stddev` is flagged.
pub const VOLUME_SIGMA: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    NonPositivePrice,
    HighBelowBody,
    LowAboveBody,
    LargeMove,
    VolumeSpike,
    /// Dropped: close missing or not positive.
    Unusable,
    /// Open, high or low was missing and now equals the close.
    FilledFromClose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub date: NaiveDate,
    pub kind: AnomalyKind,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct IngestResult {
    pub bars: Vec<RawBar>,
    pub dropped: usize,
    pub duplicates: usize,
    pub anomalies: Vec<Anomaly>,
}

/// Canonicalise a batch of provider bars for one instrument.
pub fn ingest(instrument_id: &str, mut bars: Vec<RawBar>) -> IngestResult {
    let received = bars.len();

    // Stable sort keeps arrival order within a date; the last one wins.
    bars.sort_by_key(|b| b.date);
    let mut deduped: Vec<RawBar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match deduped.last_mut() {
            Some(prev) if prev.date == bar.date => *prev = bar,
            _ => deduped.push(bar),
        }
    }
    let duplicates = received - deduped.len();

    let mut anomalies = Vec::new();
    let before = deduped.len();
    deduped.retain(|b| {
        let usable = b.has_usable_close();
        if !usable {
            anomalies.push(Anomaly {
                date: b.date,
                kind: AnomalyKind::Unusable,
                detail: format!("close {} cannot be adjusted", b.close),
            });
        }
        usable
    });
    let dropped = before - deduped.len();

    for bar in &mut deduped {
        let original = (bar.open, bar.high, bar.low);
        if bar.fill_missing_from_close() {
            anomalies.push(Anomaly {
                date: bar.date,
                kind: AnomalyKind::FilledFromClose,
                detail: format!(
                    "o={} h={} l={} replaced by close {}",
                    original.0, original.1, original.2, bar.close
                ),
            });
        }
    }

    anomalies.extend(check_integrity(&deduped));

    if dropped > 0 || !anomalies.is_empty() {
        warn!(
            instrument_id,
            received,
            dropped,
            duplicates,
            anomalies = anomalies.len(),
            "ingest found problems"
        );
    } else {
        debug!(instrument_id, received, duplicates, "ingest clean");
    }

    IngestResult {
        bars: deduped,
        dropped,
        duplicates,
        anomalies,
    }
}

/// Row-level and series-level integrity checks on a sorted series.
pub fn check_integrity(bars: &[RawBar]) -> Vec<Anomaly> {
    let mut out = Vec::new();

    for bar in bars {
        if bar.open <= 0.0 || bar.high <= 0.0 || bar.low <= 0.0 || bar.close <= 0.0 {
            out.push(Anomaly {
                date: bar.date,
                kind: AnomalyKind::NonPositivePrice,
                detail: format!(
                    "o={} h={} l={} c={}",
                    bar.open, bar.high, bar.low, bar.close
                ),
            });
        }
        if bar.high < bar.open.max(bar.close) {
            out.push(Anomaly {
                date: bar.date,
                kind: AnomalyKind::HighBelowBody,
                detail: format!("high {} below max(open, close)", bar.high),
            });
        }
        if bar.low > bar.open.min(bar.close) {
            out.push(Anomaly {
                date: bar.date,
                kind: AnomalyKind::LowAboveBody,
                detail: format!("low {} above min(open, close)", bar.low),
            });
        }
    }

    for pair in bars.windows(2) {
        let change = pair[1].close / pair[0].close - 1.0;
        if change.abs() > LARGE_MOVE_THRESHOLD {
            out.push(Anomaly {
                date: pair[1].date,
                kind: AnomalyKind::LargeMove,
                detail: format!("close moved {:.1}%", change * 100.0),
            });
        }
    }

    if bars.len() >= 2 {
        let n = bars.len() as f64;
        let mean = bars.iter().map(|b| b.volume as f64).sum::<f64>() / n;
        let var = bars
            .iter()
            .map(|b| (b.volume as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        let limit = mean + VOLUME_SIGMA * var.sqrt();
        for bar in bars.iter().filter(|b| var > 0.0 && b.volume as f64 > limit) {
            out.push(Anomaly {
                date: bar.date,
                kind: AnomalyKind::VolumeSpike,
                detail: format!("volume {} above {:.0}", bar.volume, limit),
            });
        }
    }

    out.sort_by_key(|a| a.date);
    out
}
