//! Instrument classification and identifier checks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DataError;

const MAX_ID_LEN: usize = 64;

/// Instrument ids name files and partition directories, so they are limited
/// to ASCII letters, digits and `. - _ ^ =`, must not start with `.`, and are
/// at most 64 bytes.
pub fn validate_instrument_id(instrument_id: &str) -> Result<(), DataError> {
    let invalid = |reason: &str| DataError::InvalidInstrument {
        instrument_id: instrument_id.to_string(),
        reason: reason.to_string(),
    };
    if instrument_id.is_empty() {
        return Err(invalid("empty"));
    }
    if instrument_id.len() > MAX_ID_LEN {
        return Err(invalid("longer than 64 bytes"));
    }
    if instrument_id.starts_with('.') {
        return Err(invalid("starts with '.'"));
    }
    if let Some(c) = instrument_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '^' | '=')))
    {
        return Err(invalid(&format!("character {c:?} is not allowed")));
    }
    Ok(())
}

/// Broad instrument class, persisted alongside every bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolType {
    Stock,
    Etf,
    Index,
}

impl SymbolType {
    /// Infer the class from an exchange-suffixed code such as `510300.SH`.
    ///
    /// Shanghai funds start with `5`, Shenzhen funds with `15`/`16`; the
    /// composite index ranges are `000xxx.SH` and `399xxx.SZ`. Anything else,
    /// including codes without a recognised suffix, is treated as a stock.
    pub fn infer(instrument_id: &str) -> SymbolType {
        let Some((code, exchange)) = instrument_id.rsplit_once('.') else {
            return SymbolType::Stock;
        };
        match exchange.to_ascii_uppercase().as_str() {
            "SH" if code.starts_with('5') => SymbolType::Etf,
            "SH" if code.starts_with("000") => SymbolType::Index,
            "SZ" if code.starts_with("15") || code.starts_with("16") => SymbolType::Etf,
            "SZ" if code.starts_with("399") => SymbolType::Index,
            _ => SymbolType::Stock,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SymbolType::Stock => "stock",
            SymbolType::Etf => "etf",
            SymbolType::Index => "index",
        }
    }

    pub fn parse(s: &str) -> Option<SymbolType> {
        match s {
            "stock" => Some(SymbolType::Stock),
            "etf" => Some(SymbolType::Etf),
            "index" => Some(SymbolType::Index),
            _ => None,
        }
    }
}

impl fmt::Display for SymbolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
