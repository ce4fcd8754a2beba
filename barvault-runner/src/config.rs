//! Runner configuration loaded from TOML.
//!
//! Every section has defaults, so an empty file is a valid configuration:
//!
//! ```toml
//! [store]
//! root = "data/barvault"
//! verify_on_read = false
//!
//! [provider]
//! kind = "yahoo"          # or "csv" with csv_dir = "exports/"
//! timeout_secs = 30
//! max_retries = 3
//!
//! [runner]
//! concurrency = 4
//! batch_size = 50
//! checkpoint_dir = "data/barvault/checkpoints"
//!
//! [calendar]
//! holidays_file = "holidays/sse.toml"
//!
//! [logging]
//! filter = "info,barvault_core=debug"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use barvault_core::calendar::{HolidaySet, TradingCalendar};
use barvault_core::data::{CircuitBreaker, CsvProvider, RemoteProvider, YahooProvider};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
    /// Recompute and compare adjusted columns on every cache hit.
    #[serde(default)]
    pub verify_on_read: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
            verify_on_read: false,
        }
    }
}

fn default_store_root() -> PathBuf {
    PathBuf::from("data/barvault")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Yahoo,
    Csv,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_kind")]
    pub kind: ProviderKind,
    /// Directory of CSV exports, required when `kind = "csv"`.
    #[serde(default)]
    pub csv_dir: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            csv_dir: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
        }
    }
}

const fn default_provider_kind() -> ProviderKind {
    ProviderKind::Yahoo
}
const fn default_timeout_secs() -> u64 {
    30
}
const fn default_max_retries() -> u32 {
    3
}
const fn default_retry_base_ms() -> u64 {
    500
}
const fn default_breaker_cooldown_secs() -> u64 {
    30 * 60
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Worker threads in the batch-import pool.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Instruments per chunk; a checkpoint is flushed per instrument regardless.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
            checkpoint_dir: default_checkpoint_dir(),
        }
    }
}

const fn default_concurrency() -> usize {
    4
}
const fn default_batch_size() -> usize {
    50
}
fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("data/barvault/checkpoints")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// TOML (`holidays = [...]`) or CSV (`date` column) holiday table.
    /// Without one the calendar treats every weekday as a trading day.
    #[serde(default)]
    pub holidays_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.concurrency == 0 {
            return Err(ConfigError::Invalid("runner.concurrency must be at least 1".into()));
        }
        if self.runner.batch_size == 0 {
            return Err(ConfigError::Invalid("runner.batch_size must be at least 1".into()));
        }
        if self.provider.timeout_secs == 0 {
            return Err(ConfigError::Invalid("provider.timeout_secs must be at least 1".into()));
        }
        if self.provider.kind == ProviderKind::Csv && self.provider.csv_dir.is_none() {
            return Err(ConfigError::Invalid(
                "provider.csv_dir is required when provider.kind = \"csv\"".into(),
            ));
        }
        if self.store.root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store.root must not be empty".into()));
        }
        Ok(())
    }

    /// Weekday calendar plus the configured holiday table, if any.
    pub fn build_calendar(&self) -> Result<TradingCalendar, ConfigError> {
        let Some(path) = &self.calendar.holidays_file else {
            return Ok(TradingCalendar::weekends_only());
        };
        let set = match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => HolidaySet::from_csv_path(path),
            _ => HolidaySet::from_toml_path(path),
        }
        .map_err(|e| ConfigError::Invalid(format!("calendar.holidays_file: {e}")))?;
        Ok(TradingCalendar::from_holiday_set(set))
    }

    pub fn build_provider(&self) -> Result<Arc<dyn RemoteProvider>, ConfigError> {
        match self.provider.kind {
            ProviderKind::Yahoo => {
                let breaker = Arc::new(CircuitBreaker::new(Duration::from_secs(
                    self.provider.breaker_cooldown_secs,
                )));
                let provider = YahooProvider::new(breaker, self.provider.timeout())
                    .map_err(|e| ConfigError::Invalid(format!("provider: {e}")))?
                    .with_retries(
                        self.provider.max_retries,
                        Duration::from_millis(self.provider.retry_base_ms),
                    );
                Ok(Arc::new(provider))
            }
            ProviderKind::Csv => {
                let dir = self.provider.csv_dir.clone().ok_or_else(|| {
                    ConfigError::Invalid("provider.csv_dir is required for the csv provider".into())
                })?;
                Ok(Arc::new(CsvProvider::new(dir)))
            }
        }
    }
}
