//! Retrace Core — domain types, indicators, entry signals and the backtest engine.
//!
//! This crate contains the pure, I/O-free part of the system:
//! - Domain types (bars, price series, strategy parameters, positions, trades)
//! - Indicators precomputed once per series (RSI, EMA, MACD)
//! - Entry signals: fibonacci retracement proximity, candle scores, and a
//!   tagged predicate tree combining them
//! - The FLAT/LONG position state machine and the per-series bar loop
//! - Stable strategy fingerprints

pub mod domain;
pub mod engine;
pub mod fingerprint;
pub mod indicators;
pub mod signals;

pub use domain::{Bar, PriceSeries, StrategyParams};
pub use engine::{run_backtest, EngineConfig, EngineError, RunOutput};
pub use fingerprint::StrategyId;
pub use signals::EntryRule;
