//! Adjusted price variants and the per-bar set that carries all of them.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{Bar, Period, RawBar};

/// Which price series a caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentVariant {
    /// Raw, unadjusted prices.
    None,
    /// Forward adjustment: history rescaled so the latest bar is unchanged.
    Front,
    /// Backward adjustment: later bars rescaled so the earliest bar is unchanged.
    Back,
    GeometricFront,
    GeometricBack,
}

impl AdjustmentVariant {
    pub const ALL: [AdjustmentVariant; 5] = [
        AdjustmentVariant::None,
        AdjustmentVariant::Front,
        AdjustmentVariant::Back,
        AdjustmentVariant::GeometricFront,
        AdjustmentVariant::GeometricBack,
    ];

    /// Column-name suffix used by the store (`close_front`, `factor_geo_back`, ...).
    /// `None` maps to the raw columns.
    pub fn column_suffix(self) -> Option<&'static str> {
        match self {
            AdjustmentVariant::None => None,
            AdjustmentVariant::Front => Some("front"),
            AdjustmentVariant::Back => Some("back"),
            AdjustmentVariant::GeometricFront => Some("geo_front"),
            AdjustmentVariant::GeometricBack => Some("geo_back"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AdjustmentVariant::None => "none",
            AdjustmentVariant::Front => "front",
            AdjustmentVariant::Back => "back",
            AdjustmentVariant::GeometricFront => "geometric_front",
            AdjustmentVariant::GeometricBack => "geometric_back",
        }
    }
}

impl fmt::Display for AdjustmentVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdjustmentVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AdjustmentVariant::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("unknown adjustment variant '{s}'"))
    }
}

/// One OHLC quadruple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Ohlc {
    pub fn of(bar: &RawBar) -> Self {
        Self {
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
        }
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            open: self.open * factor,
            high: self.high * factor,
            low: self.low * factor,
            close: self.close * factor,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.open.is_finite() && self.high.is_finite() && self.low.is_finite() && self.close.is_finite()
    }
}

/// Cumulative factor of each adjusted variant for one bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariantFactors {
    pub front: f64,
    pub back: f64,
    pub geo_front: f64,
    pub geo_back: f64,
}

impl VariantFactors {
    pub const IDENTITY: VariantFactors = VariantFactors {
        front: 1.0,
        back: 1.0,
        geo_front: 1.0,
        geo_back: 1.0,
    };
}

/// Raw OHLC, the four adjusted OHLC quadruples and their factors for one
/// `(instrument_id, date, period)` key. Adjusted values are always derived
/// from raw + corporate actions and never edited independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustedBarSet {
    pub date: NaiveDate,
    pub raw: Ohlc,
    pub volume: u64,
    pub amount: f64,
    pub front: Ohlc,
    pub back: Ohlc,
    pub geo_front: Ohlc,
    pub geo_back: Ohlc,
    pub factors: VariantFactors,
}

impl AdjustedBarSet {
    /// A set where every variant equals the raw bar.
    pub fn unadjusted(bar: &RawBar) -> Self {
        let raw = Ohlc::of(bar);
        Self {
            date: bar.date,
            raw,
            volume: bar.volume,
            amount: bar.amount,
            front: raw,
            back: raw,
            geo_front: raw,
            geo_back: raw,
            factors: VariantFactors::IDENTITY,
        }
    }

    pub fn ohlc(&self, variant: AdjustmentVariant) -> Ohlc {
        match variant {
            AdjustmentVariant::None => self.raw,
            AdjustmentVariant::Front => self.front,
            AdjustmentVariant::Back => self.back,
            AdjustmentVariant::GeometricFront => self.geo_front,
            AdjustmentVariant::GeometricBack => self.geo_back,
        }
    }

    pub fn factor(&self, variant: AdjustmentVariant) -> f64 {
        match variant {
            AdjustmentVariant::None => 1.0,
            AdjustmentVariant::Front => self.factors.front,
            AdjustmentVariant::Back => self.factors.back,
            AdjustmentVariant::GeometricFront => self.factors.geo_front,
            AdjustmentVariant::GeometricBack => self.factors.geo_back,
        }
    }

    pub fn raw_bar(&self) -> RawBar {
        RawBar {
            date: self.date,
            open: self.raw.open,
            high: self.raw.high,
            low: self.raw.low,
            close: self.raw.close,
            volume: self.volume,
            amount: self.amount,
        }
    }

    pub fn to_bar(&self, instrument_id: &str, period: Period, variant: AdjustmentVariant) -> Bar {
        let ohlc = self.ohlc(variant);
        Bar {
            instrument_id: instrument_id.to_string(),
            date: self.date,
            period,
            open: ohlc.open,
            high: ohlc.high,
            low: ohlc.low,
            close: ohlc.close,
            volume: self.volume,
            amount: self.amount,
        }
    }

    /// False when any adjusted value is missing (e.g. columns added by a
    /// schema upgrade and not yet recomputed).
    pub fn is_complete(&self) -> bool {
        self.raw.is_finite()
            && self.front.is_finite()
            && self.back.is_finite()
            && self.geo_front.is_finite()
            && self.geo_back.is_finite()
            && self.factors.front.is_finite()
            && self.factors.back.is_finite()
            && self.factors.geo_front.is_finite()
            && self.factors.geo_back.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawBar {
        RawBar {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            open: 100.0,
            high: 102.0,
            low: 99.0,
            close: 101.0,
            volume: 1_000,
            amount: 101_000.0,
        }
    }

    #[test]
    fn unadjusted_set_mirrors_raw() {
        let set = AdjustedBarSet::unadjusted(&raw());
        for v in AdjustmentVariant::ALL {
            assert_eq!(set.ohlc(v), set.raw);
            assert_eq!(set.factor(v), 1.0);
        }
        assert_eq!(set.raw_bar(), raw());
        assert!(set.is_complete());
    }

    #[test]
    fn nan_adjusted_value_marks_set_incomplete() {
        let mut set = AdjustedBarSet::unadjusted(&raw());
        set.geo_back.low = f64::NAN;
        assert!(!set.is_complete());
    }

    #[test]
    fn variant_names_parse() {
        for v in AdjustmentVariant::ALL {
            assert_eq!(v.as_str().parse::<AdjustmentVariant>().unwrap(), v);
        }
        assert_eq!(AdjustmentVariant::GeometricBack.column_suffix(), Some("geo_back"));
        assert_eq!(AdjustmentVariant::None.column_suffix(), None);
    }
}
