//! BarVault Runner: orchestration on top of `barvault-core`.
//!
//! This crate provides:
//! - TOML configuration with per-section defaults
//! - The read-through orchestrator (`get_bars`, `get_statistics`)
//! - Deadline enforcement around provider calls
//! - Batch import on a private rayon pool with resumable checkpoints
//! - Tracing subscriber setup

pub mod checkpoint;
pub mod config;
pub mod fetch;
pub mod import;
pub mod orchestrator;
pub mod response;
pub mod telemetry;

pub use checkpoint::{Checkpoint, ImportRequest};
pub use config::{Config, ConfigError};
pub use fetch::TimedProvider;
pub use import::{ImportDetail, ImportProgress, ImportReport, ImportStatus, LogProgress};
pub use orchestrator::Orchestrator;
pub use response::{BarsResponse, Completeness, DataWarning, EmptyReason};
pub use telemetry::init_tracing;
