//! Store schema, the manifest, and the column-widening migration.
//!
//! A column whose type changed between schema versions is never dropped and
//! recreated. Instead a shadow column of the new type is added, backfilled
//! from the old one, verified value by value, swapped in under the original
//! name, and only then is the old column retired. If verification fails the
//! frame is left as it was and the caller gets `SchemaMigration`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{Period, SymbolType};
use crate::error::DataError;

/// Version 1 stored adjusted prices as Float32 and had no geometric factors.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Utf8,
    Date,
    Float64,
    UInt64,
    Int64,
}

impl ColumnType {
    pub fn dtype(self) -> DataType {
        match self {
            ColumnType::Utf8 => DataType::String,
            ColumnType::Date => DataType::Date,
            ColumnType::Float64 => DataType::Float64,
            ColumnType::UInt64 => DataType::UInt64,
            ColumnType::Int64 => DataType::Int64,
        }
    }
}

/// Value used when an older file lacks the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDefault {
    /// The file is unusable without it.
    Required,
    /// Nulls; adjusted columns are recomputed on the next read.
    Null,
    One,
    Zero,
    Now,
    InferredSymbolType,
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: ColumnType,
    pub default: ColumnDefault,
}

const fn spec(name: &'static str, ty: ColumnType, default: ColumnDefault) -> ColumnSpec {
    ColumnSpec { name, ty, default }
}

use ColumnDefault::{InferredSymbolType, Now, Null, One, Required, Zero};
use ColumnType::{Date, Float64, Int64, UInt64, Utf8};

pub const BARS_COLUMNS: &[ColumnSpec] = &[
    spec("instrument_id", Utf8, Required),
    spec("symbol_type", Utf8, InferredSymbolType),
    spec("date", Date, Required),
    spec("period", Utf8, Required),
    spec("open", Float64, Required),
    spec("high", Float64, Required),
    spec("low", Float64, Required),
    spec("close", Float64, Required),
    spec("volume", UInt64, Zero),
    spec("amount", Float64, Zero),
    spec("open_front", Float64, Null),
    spec("high_front", Float64, Null),
    spec("low_front", Float64, Null),
    spec("close_front", Float64, Null),
    spec("open_back", Float64, Null),
    spec("high_back", Float64, Null),
    spec("low_back", Float64, Null),
    spec("close_back", Float64, Null),
    spec("open_geo_front", Float64, Null),
    spec("high_geo_front", Float64, Null),
    spec("low_geo_front", Float64, Null),
    spec("close_geo_front", Float64, Null),
    spec("open_geo_back", Float64, Null),
    spec("high_geo_back", Float64, Null),
    spec("low_geo_back", Float64, Null),
    spec("close_geo_back", Float64, Null),
    spec("factor", Float64, One),
    spec("factor_front", Float64, Null),
    spec("factor_back", Float64, Null),
    spec("factor_geo_front", Float64, Null),
    spec("factor_geo_back", Float64, Null),
    spec("created_at", Int64, Now),
    spec("updated_at", Int64, Now),
];

pub const CORPORATE_ACTION_COLUMNS: &[ColumnSpec] = &[
    spec("instrument_id", Utf8, Required),
    spec("ex_date", Date, Required),
    spec("dividend_per_share", Float64, Null),
    spec("bonus_ratio", Float64, Null),
    spec("rights_issue_ratio", Float64, Null),
    spec("rights_issue_price", Float64, Null),
    spec("record_date", Date, Null),
    spec("pay_date", Date, Null),
];

// ── Manifest ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub from_version: u32,
    pub to_version: u32,
    pub file: String,
    pub added: Vec<String>,
    pub widened: Vec<String>,
    pub applied_at: DateTime<Utc>,
}

/// Per-series summary kept in the manifest, refreshed on every bars upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub instrument_id: String,
    pub period: Period,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub bar_count: usize,
    /// blake3 of the raw series.
    pub data_hash: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default)]
    pub migrations: Vec<MigrationRecord>,
    #[serde(default)]
    pub series: BTreeMap<String, SeriesEntry>,
}

impl Manifest {
    pub fn new(schema_version: u32) -> Self {
        Self {
            schema_version,
            migrations: Vec::new(),
            series: BTreeMap::new(),
        }
    }

    pub fn series_key(instrument_id: &str, period: Period) -> String {
        format!("{instrument_id}/{period}")
    }

    pub fn load(path: &Path) -> Result<Option<Self>, DataError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .map_err(|e| DataError::Io(format!("read {}: {e}", path.display())))?;
        let manifest = serde_json::from_str(&content)
            .map_err(|e| DataError::Io(format!("parse {}: {e}", path.display())))?;
        Ok(Some(manifest))
    }

    pub fn save(&self, path: &Path) -> Result<(), DataError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DataError::Io(format!("manifest serialization: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| DataError::Io(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, path)
            .map_err(|e| DataError::Io(format!("atomic rename to {}: {e}", path.display())))
    }
}

// ── Upgrade ─────────────────────────────────────────────────────────

/// What an upgrade did to one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpgradeActions {
    pub added: Vec<String>,
    pub widened: Vec<String>,
}

impl UpgradeActions {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.widened.is_empty()
    }
}

/// Bring `df` up to `specs`: add missing columns with their defaults and
/// widen columns whose type changed. Columns not in `specs` are left alone.
pub fn upgrade_frame(
    df: &mut DataFrame,
    specs: &[ColumnSpec],
    file: &str,
    instrument_id: &str,
    now_ms: i64,
) -> Result<UpgradeActions, DataError> {
    let mut actions = UpgradeActions::default();
    let height = df.height();

    for spec in specs {
        let existing = df.column(spec.name).ok().map(|c| c.dtype().clone());
        match existing {
            None => {
                let column = default_column(spec, height, instrument_id, now_ms).ok_or_else(|| {
                    DataError::SchemaMigration {
                        file: file.to_string(),
                        column: spec.name.to_string(),
                        reason: "required column is missing".into(),
                    }
                })?;
                let column = column.map_err(|e| DataError::SchemaMigration {
                    file: file.to_string(),
                    column: spec.name.to_string(),
                    reason: format!("building default: {e}"),
                })?;
                df.with_column(column).map_err(|e| DataError::SchemaMigration {
                    file: file.to_string(),
                    column: spec.name.to_string(),
                    reason: format!("adding column: {e}"),
                })?;
                actions.added.push(spec.name.to_string());
            }
            Some(dtype) if dtype == spec.ty.dtype() => {}
            Some(dtype) => {
                migrate_column(df, spec.name, spec.ty).map_err(|reason| {
                    DataError::SchemaMigration {
                        file: file.to_string(),
                        column: spec.name.to_string(),
                        reason: format!("{dtype} -> {}: {reason}", spec.ty.dtype()),
                    }
                })?;
                actions.widened.push(spec.name.to_string());
            }
        }
    }
    Ok(actions)
}

fn default_column(
    spec: &ColumnSpec,
    height: usize,
    instrument_id: &str,
    now_ms: i64,
) -> Option<PolarsResult<Column>> {
    let name: PlSmallStr = spec.name.into();
    let column = match (spec.default, spec.ty) {
        (Required, _) => return None,
        (InferredSymbolType, _) => Ok(Column::new(
            name,
            vec![SymbolType::infer(instrument_id).as_str().to_string(); height],
        )),
        (Now, _) => Ok(Column::new(name, vec![now_ms; height])),
        (One, _) => Ok(Column::new(name, vec![1.0f64; height])),
        (Zero, UInt64) => Ok(Column::new(name, vec![0u64; height])),
        (Zero, _) => Ok(Column::new(name, vec![0.0f64; height])),
        (Null, Date) => Column::new(name, vec![None::<i32>; height]).cast(&DataType::Date),
        (Null, Utf8) => Ok(Column::new(name, vec![None::<String>; height])),
        (Null, _) => Column::new(name, vec![None::<f64>; height]).cast(&spec.ty.dtype()),
    };
    Some(column)
}

/// Shadow-column swap for one column. On any error `df` is unchanged.
fn migrate_column(df: &mut DataFrame, name: &str, target: ColumnType) -> Result<(), String> {
    let shadow = format!("{name}__v{CURRENT_SCHEMA_VERSION}");
    let mut staged = df.clone();

    let old = staged.column(name).map_err(|e| e.to_string())?.clone();
    let backfill = match target {
        Float64 => Column::new(shadow.as_str().into(), widen_to_f64(&old)?),
        UInt64 => Column::new(shadow.as_str().into(), widen_to_u64(&old)?),
        other => return Err(format!("no widening path to {}", other.dtype())),
    };
    staged.with_column(backfill).map_err(|e| e.to_string())?;

    let written = staged.column(&shadow).map_err(|e| e.to_string())?.clone();
    verify_backfill(&old, &written)?;

    staged = staged.drop(name).map_err(|e| e.to_string())?;
    staged.rename(&shadow, name.into()).map_err(|e| e.to_string())?;
    *df = staged;
    Ok(())
}

fn widen_to_f64(col: &Column) -> Result<Vec<Option<f64>>, String> {
    match col.dtype() {
        DataType::Float32 => Ok(col
            .f32()
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(|v| v.map(f64::from))
            .collect()),
        DataType::Int32 => Ok(col
            .i32()
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(|v| v.map(f64::from))
            .collect()),
        DataType::Int64 => col
            .i64()
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(|v| match v {
                Some(x) if (x as f64) as i64 == x && x.unsigned_abs() <= 1 << 53 => Ok(Some(x as f64)),
                Some(x) => Err(format!("{x} is not exactly representable as Float64")),
                None => Ok(None),
            })
            .collect(),
        other => Err(format!("cannot widen {other} to Float64")),
    }
}

fn widen_to_u64(col: &Column) -> Result<Vec<Option<u64>>, String> {
    let signed: Vec<Option<i64>> = match col.dtype() {
        DataType::Int64 => col.i64().map_err(|e| e.to_string())?.into_iter().collect(),
        DataType::Int32 => col
            .i32()
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(|v| v.map(i64::from))
            .collect(),
        DataType::UInt32 => col
            .u32()
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(|v| v.map(i64::from))
            .collect(),
        other => return Err(format!("cannot widen {other} to UInt64")),
    };
    signed
        .into_iter()
        .map(|v| match v {
            Some(x) => u64::try_from(x).map(Some).map_err(|_| format!("negative value {x}")),
            None => Ok(None),
        })
        .collect()
}

/// Same null mask, and every backfilled value narrows back to the original.
fn verify_backfill(old: &Column, shadow: &Column) -> Result<(), String> {
    if old.len() != shadow.len() {
        return Err(format!("length {} != {}", shadow.len(), old.len()));
    }
    let mismatch = |i: usize| Err(format!("backfill mismatch at row {i}"));

    match shadow.dtype() {
        DataType::Float64 => {
            let new: Vec<Option<f64>> = shadow.f64().map_err(|e| e.to_string())?.into_iter().collect();
            match old.dtype() {
                DataType::Float32 => {
                    let orig = old.f32().map_err(|e| e.to_string())?;
                    for (i, (a, b)) in orig.into_iter().zip(&new).enumerate() {
                        let same = match (a, b) {
                            (None, None) => true,
                            (Some(a), Some(b)) => (a.is_nan() && b.is_nan()) || (*b as f32).to_bits() == a.to_bits(),
                            _ => false,
                        };
                        if !same {
                            return mismatch(i);
                        }
                    }
                }
                DataType::Int32 => {
                    let orig = old.i32().map_err(|e| e.to_string())?;
                    for (i, (a, b)) in orig.into_iter().zip(&new).enumerate() {
                        if a.map(f64::from) != *b {
                            return mismatch(i);
                        }
                    }
                }
                DataType::Int64 => {
                    let orig = old.i64().map_err(|e| e.to_string())?;
                    for (i, (a, b)) in orig.into_iter().zip(&new).enumerate() {
                        if a != b.map(|v| v as i64) {
                            return mismatch(i);
                        }
                    }
                }
                other => return Err(format!("unverifiable source type {other}")),
            }
        }
        DataType::UInt64 => {
            let new: Vec<Option<u64>> = shadow.u64().map_err(|e| e.to_string())?.into_iter().collect();
            let orig = widen_to_u64(old)?;
            if let Some(i) = orig.iter().zip(&new).position(|(a, b)| a != b) {
                return mismatch(i);
            }
        }
        other => return Err(format!("unverifiable target type {other}")),
    }
    Ok(())
}
