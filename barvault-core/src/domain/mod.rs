//! Domain types for BarVault

pub mod adjusted;
pub mod bar;
pub mod corporate_action;
pub mod instrument;
pub mod period;

pub use adjusted::{AdjustedBarSet, AdjustmentVariant, Ohlc, VariantFactors};
pub use bar::{Bar, RawBar};
pub use corporate_action::CorporateAction;
pub use instrument::{validate_instrument_id, SymbolType};
pub use period::{DateRange, Period};
