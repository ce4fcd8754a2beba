//! BarVault Core: the adjustment-and-caching data layer.
//!
//! This crate contains:
//! - Domain types (raw bars, corporate actions, adjusted bar sets, periods)
//! - Trading calendar with pluggable holiday tables
//! - Gap detection against stored data
//! - The adjustment engine (front, back and their geometric forms)
//! - Provider trait with Yahoo Finance and CSV adapters
//! - Parquet column store with versioned schema migration

pub mod adjust;
pub mod calendar;
pub mod data;
pub mod domain;
pub mod error;
pub mod gaps;

pub use adjust::{AdjustmentEngine, AdjustmentOutcome, RejectedAction};
pub use calendar::{HolidaySet, TradingCalendar};
pub use error::{DataError, ProviderError};
pub use gaps::{BarIndex, DownloadPlan, DownloadTask, GapDetector, GapReport, GapSegment};
