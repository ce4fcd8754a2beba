//! Conversions between domain rows and polars DataFrames, plus Parquet I/O.

use std::fs;
use std::path::Path;

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;

use crate::domain::{
    AdjustedBarSet, CorporateAction, Ohlc, Period, SymbolType, VariantFactors,
};
use crate::error::DataError;

use super::store::QualityStats;

/// `NaiveDate::num_days_from_ce()` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

pub(crate) fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

pub(crate) fn days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
}

fn parquet_err(context: &str) -> impl Fn(PolarsError) -> DataError + '_ {
    move |e| DataError::Parquet(format!("{context}: {e}"))
}

/// A stored bars row: the adjusted set plus bookkeeping columns.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBar {
    pub set: AdjustedBarSet,
    pub symbol_type: SymbolType,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
}

// ── Column readers ──────────────────────────────────────────────────

fn column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, DataError> {
    df.column(name)
        .map_err(|e| DataError::Parquet(format!("missing column '{name}': {e}")))
}

/// Float column; nulls read as NaN.
fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<f64>, DataError> {
    Ok(opt_f64_values(df, name)?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

fn opt_f64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>, DataError> {
    let ca = column(df, name)?
        .f64()
        .map_err(parquet_err(name))?;
    Ok(ca.into_iter().collect())
}

fn u64_values(df: &DataFrame, name: &str) -> Result<Vec<u64>, DataError> {
    let ca = column(df, name)?.u64().map_err(parquet_err(name))?;
    Ok(ca.into_iter().map(|v| v.unwrap_or(0)).collect())
}

fn i64_values(df: &DataFrame, name: &str) -> Result<Vec<i64>, DataError> {
    let ca = column(df, name)?.i64().map_err(parquet_err(name))?;
    Ok(ca.into_iter().map(|v| v.unwrap_or(0)).collect())
}

fn str_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, DataError> {
    let ca = column(df, name)?.str().map_err(parquet_err(name))?;
    Ok(ca.into_iter().map(|v| v.map(str::to_string)).collect())
}

fn opt_date_values(df: &DataFrame, name: &str) -> Result<Vec<Option<NaiveDate>>, DataError> {
    let physical = column(df, name)?
        .cast(&DataType::Int32)
        .map_err(parquet_err(name))?;
    let ca = physical.i32().map_err(parquet_err(name))?;
    Ok(ca.into_iter().map(|v| v.and_then(days_to_date)).collect())
}

fn date_values(df: &DataFrame, name: &str) -> Result<Vec<NaiveDate>, DataError> {
    opt_date_values(df, name)?
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.ok_or_else(|| DataError::Parquet(format!("null {name} at row {i}"))))
        .collect()
}

fn date_column(name: &str, dates: Vec<Option<i32>>) -> Result<Column, DataError> {
    Column::new(name.into(), dates)
        .cast(&DataType::Date)
        .map_err(parquet_err("date cast"))
}

// ── Bars ────────────────────────────────────────────────────────────

pub(crate) fn bars_to_frame(
    instrument_id: &str,
    period: Period,
    rows: &[StoredBar],
) -> Result<DataFrame, DataError> {
    let n = rows.len();
    let ohlc_columns = |suffix: &str, pick: fn(&AdjustedBarSet) -> Ohlc| -> Vec<Column> {
        let name = |field: &str| {
            if suffix.is_empty() {
                field.to_string()
            } else {
                format!("{field}_{suffix}")
            }
        };
        vec![
            Column::new(name("open").into(), rows.iter().map(|r| pick(&r.set).open).collect::<Vec<f64>>()),
            Column::new(name("high").into(), rows.iter().map(|r| pick(&r.set).high).collect::<Vec<f64>>()),
            Column::new(name("low").into(), rows.iter().map(|r| pick(&r.set).low).collect::<Vec<f64>>()),
            Column::new(name("close").into(), rows.iter().map(|r| pick(&r.set).close).collect::<Vec<f64>>()),
        ]
    };

    let mut columns = vec![
        Column::new("instrument_id".into(), vec![instrument_id.to_string(); n]),
        Column::new(
            "symbol_type".into(),
            rows.iter().map(|r| r.symbol_type.as_str().to_string()).collect::<Vec<String>>(),
        ),
        date_column("date", rows.iter().map(|r| Some(date_to_days(r.set.date))).collect())?,
        Column::new("period".into(), vec![period.as_str().to_string(); n]),
    ];
    columns.extend(ohlc_columns("", |s| s.raw));
    columns.push(Column::new("volume".into(), rows.iter().map(|r| r.set.volume).collect::<Vec<u64>>()));
    columns.push(Column::new("amount".into(), rows.iter().map(|r| r.set.amount).collect::<Vec<f64>>()));
    columns.extend(ohlc_columns("front", |s| s.front));
    columns.extend(ohlc_columns("back", |s| s.back));
    columns.extend(ohlc_columns("geo_front", |s| s.geo_front));
    columns.extend(ohlc_columns("geo_back", |s| s.geo_back));
    columns.push(Column::new("factor".into(), vec![1.0f64; n]));
    columns.push(Column::new("factor_front".into(), rows.iter().map(|r| r.set.factors.front).collect::<Vec<f64>>()));
    columns.push(Column::new("factor_back".into(), rows.iter().map(|r| r.set.factors.back).collect::<Vec<f64>>()));
    columns.push(Column::new("factor_geo_front".into(), rows.iter().map(|r| r.set.factors.geo_front).collect::<Vec<f64>>()));
    columns.push(Column::new("factor_geo_back".into(), rows.iter().map(|r| r.set.factors.geo_back).collect::<Vec<f64>>()));
    columns.push(Column::new("created_at".into(), rows.iter().map(|r| r.created_at).collect::<Vec<i64>>()));
    columns.push(Column::new("updated_at".into(), rows.iter().map(|r| r.updated_at).collect::<Vec<i64>>()));

    DataFrame::new(columns).map_err(parquet_err("bars frame"))
}

fn ohlc_values(df: &DataFrame, suffix: &str) -> Result<Vec<Ohlc>, DataError> {
    let name = |field: &str| {
        if suffix.is_empty() {
            field.to_string()
        } else {
            format!("{field}_{suffix}")
        }
    };
    let open = f64_values(df, &name("open"))?;
    let high = f64_values(df, &name("high"))?;
    let low = f64_values(df, &name("low"))?;
    let close = f64_values(df, &name("close"))?;
    Ok((0..df.height())
        .map(|i| Ohlc {
            open: open[i],
            high: high[i],
            low: low[i],
            close: close[i],
        })
        .collect())
}

/// Rows sorted by date. Missing adjusted values read as NaN, which marks the
/// set incomplete.
pub(crate) fn frame_to_bars(df: &DataFrame) -> Result<Vec<StoredBar>, DataError> {
    let dates = date_values(df, "date")?;
    let symbol_types = str_values(df, "symbol_type")?;
    let raw = ohlc_values(df, "")?;
    let front = ohlc_values(df, "front")?;
    let back = ohlc_values(df, "back")?;
    let geo_front = ohlc_values(df, "geo_front")?;
    let geo_back = ohlc_values(df, "geo_back")?;
    let volume = u64_values(df, "volume")?;
    let amount = f64_values(df, "amount")?;
    let f_front = f64_values(df, "factor_front")?;
    let f_back = f64_values(df, "factor_back")?;
    let f_geo_front = f64_values(df, "factor_geo_front")?;
    let f_geo_back = f64_values(df, "factor_geo_back")?;
    let created = i64_values(df, "created_at")?;
    let updated = i64_values(df, "updated_at")?;

    let mut rows: Vec<StoredBar> = (0..df.height())
        .map(|i| StoredBar {
            set: AdjustedBarSet {
                date: dates[i],
                raw: raw[i],
                volume: volume[i],
                amount: amount[i],
                front: front[i],
                back: back[i],
                geo_front: geo_front[i],
                geo_back: geo_back[i],
                factors: VariantFactors {
                    front: f_front[i],
                    back: f_back[i],
                    geo_front: f_geo_front[i],
                    geo_back: f_geo_back[i],
                },
            },
            symbol_type: symbol_types[i]
                .as_deref()
                .and_then(SymbolType::parse)
                .unwrap_or(SymbolType::Stock),
            created_at: created[i],
            updated_at: updated[i],
        })
        .collect();
    rows.sort_by_key(|r| r.set.date);
    Ok(rows)
}

/// Only the date column, for gap detection.
pub(crate) fn frame_dates(df: &DataFrame) -> Result<Vec<NaiveDate>, DataError> {
    date_values(df, "date")
}

// ── Corporate actions ───────────────────────────────────────────────

pub(crate) fn actions_to_frame(
    instrument_id: &str,
    actions: &[CorporateAction],
) -> Result<DataFrame, DataError> {
    let n = actions.len();
    DataFrame::new(vec![
        Column::new("instrument_id".into(), vec![instrument_id.to_string(); n]),
        date_column("ex_date", actions.iter().map(|a| Some(date_to_days(a.ex_date))).collect())?,
        Column::new(
            "dividend_per_share".into(),
            actions.iter().map(|a| a.dividend_per_share).collect::<Vec<Option<f64>>>(),
        ),
        Column::new(
            "bonus_ratio".into(),
            actions.iter().map(|a| a.bonus_ratio).collect::<Vec<Option<f64>>>(),
        ),
        Column::new(
            "rights_issue_ratio".into(),
            actions.iter().map(|a| a.rights_issue_ratio).collect::<Vec<Option<f64>>>(),
        ),
        Column::new(
            "rights_issue_price".into(),
            actions.iter().map(|a| a.rights_issue_price).collect::<Vec<Option<f64>>>(),
        ),
        date_column("record_date", actions.iter().map(|a| a.record_date.map(date_to_days)).collect())?,
        date_column("pay_date", actions.iter().map(|a| a.pay_date.map(date_to_days)).collect())?,
    ])
    .map_err(parquet_err("corporate actions frame"))
}

pub(crate) fn frame_to_actions(df: &DataFrame) -> Result<Vec<CorporateAction>, DataError> {
    let ids = str_values(df, "instrument_id")?;
    let ex = date_values(df, "ex_date")?;
    let dividend = opt_f64_values(df, "dividend_per_share")?;
    let bonus = opt_f64_values(df, "bonus_ratio")?;
    let rights = opt_f64_values(df, "rights_issue_ratio")?;
    let rights_price = opt_f64_values(df, "rights_issue_price")?;
    let record = opt_date_values(df, "record_date")?;
    let pay = opt_date_values(df, "pay_date")?;

    let mut actions: Vec<CorporateAction> = (0..df.height())
        .map(|i| CorporateAction {
            instrument_id: ids[i].clone().unwrap_or_default(),
            ex_date: ex[i],
            dividend_per_share: dividend[i],
            bonus_ratio: bonus[i],
            rights_issue_ratio: rights[i],
            rights_issue_price: rights_price[i],
            record_date: record[i],
            pay_date: pay[i],
        })
        .collect();
    actions.sort_by_key(|a| a.ex_date);
    Ok(actions)
}

// ── Quality stats ───────────────────────────────────────────────────

pub(crate) fn quality_to_frame(stats: &[QualityStats]) -> Result<DataFrame, DataError> {
    DataFrame::new(vec![
        Column::new(
            "instrument_id".into(),
            stats.iter().map(|s| s.instrument_id.clone()).collect::<Vec<String>>(),
        ),
        Column::new(
            "period".into(),
            stats.iter().map(|s| s.period.as_str().to_string()).collect::<Vec<String>>(),
        ),
        Column::new("record_count".into(), stats.iter().map(|s| s.record_count).collect::<Vec<u64>>()),
        Column::new("trading_days".into(), stats.iter().map(|s| s.trading_days).collect::<Vec<u64>>()),
        date_column("first_date", stats.iter().map(|s| s.first_date.map(date_to_days)).collect())?,
        date_column("last_date", stats.iter().map(|s| s.last_date.map(date_to_days)).collect())?,
        Column::new("missing_days".into(), stats.iter().map(|s| s.missing_days).collect::<Vec<u64>>()),
        Column::new("completeness".into(), stats.iter().map(|s| s.completeness).collect::<Vec<f64>>()),
        Column::new("checked_at".into(), stats.iter().map(|s| s.checked_at).collect::<Vec<i64>>()),
    ])
    .map_err(parquet_err("quality frame"))
}

pub(crate) fn frame_to_quality(df: &DataFrame) -> Result<Vec<QualityStats>, DataError> {
    let ids = str_values(df, "instrument_id")?;
    let periods = str_values(df, "period")?;
    let record_count = u64_values(df, "record_count")?;
    let trading_days = u64_values(df, "trading_days")?;
    let first = opt_date_values(df, "first_date")?;
    let last = opt_date_values(df, "last_date")?;
    let missing = u64_values(df, "missing_days")?;
    let completeness = f64_values(df, "completeness")?;
    let checked = i64_values(df, "checked_at")?;

    (0..df.height())
        .map(|i| {
            let period = periods[i]
                .as_deref()
                .unwrap_or_default()
                .parse::<Period>()
                .map_err(DataError::Parquet)?;
            Ok(QualityStats {
                instrument_id: ids[i].clone().unwrap_or_default(),
                period,
                record_count: record_count[i],
                trading_days: trading_days[i],
                first_date: first[i],
                last_date: last[i],
                missing_days: missing[i],
                completeness: completeness[i],
                checked_at: checked[i],
            })
        })
        .collect()
}

// ── Parquet I/O ─────────────────────────────────────────────────────

pub(crate) fn read_parquet(path: &Path) -> Result<DataFrame, DataError> {
    let file = fs::File::open(path)
        .map_err(|e| DataError::Parquet(format!("open {}: {e}", path.display())))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::Parquet(format!("read {}: {e}", path.display())))
}

/// Write to `{path}.tmp` and rename into place, so readers only ever see a
/// complete file.
pub(crate) fn write_parquet_atomic(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| DataError::Io(format!("create {}: {e}", parent.display())))?;
    }
    let tmp_path = path.with_extension("parquet.tmp");
    let file = fs::File::create(&tmp_path)
        .map_err(|e| DataError::Io(format!("create {}: {e}", tmp_path.display())))?;
    if let Err(e) = ParquetWriter::new(file).finish(df) {
        let _ = fs::remove_file(&tmp_path);
        return Err(DataError::Parquet(format!("write {}: {e}", tmp_path.display())));
    }
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        DataError::Io(format!("atomic rename to {}: {e}", path.display()))
    })
}
