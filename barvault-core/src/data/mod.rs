//! Data ingestion, providers and the Parquet column store.

pub mod circuit_breaker;
pub mod csv_provider;
pub mod frames;
pub mod ingest;
pub mod provider;
pub mod schema;
pub mod store;
pub mod yahoo;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use csv_provider::CsvProvider;
pub use frames::StoredBar;
pub use ingest::{Anomaly, AnomalyKind, IngestResult};
pub use provider::{DataSource, RemoteProvider};
pub use schema::{Manifest, MigrationRecord, SeriesEntry, CURRENT_SCHEMA_VERSION};
pub use store::{ColumnStore, QualityStats, SchemaReport, StoreStatistics, UpsertSummary};
pub use yahoo::YahooProvider;
