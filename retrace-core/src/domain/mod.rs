//! Domain types for Retrace

pub mod bar;
pub mod params;
pub mod position;
pub mod series;
pub mod trade;

pub use bar::Bar;
pub use params::{format_pct, ParamsError, StrategyParams, DEFAULT_RULE_LABEL};
pub use position::Position;
pub use series::{PriceSeries, SeriesError, MIN_RUN_BARS};
pub use trade::{TradeOutcome, TradeRecord};

/// Asset identifier type alias
pub type AssetId = String;
