//! Entry signals — portfolio-agnostic.
//!
//! Signals see bar history and precomputed indicators only, never capital or
//! position state. They answer "would we enter here?", not "can we afford it?".

pub mod candle;
pub mod fibonacci;
pub mod rule;

pub use candle::CandlePattern;
pub use fibonacci::{level_label, FibHit, FibonacciDetector};
pub use rule::{EntryMatch, EntryRule, RuleContext};

use thiserror::Error;

/// Entry-rule construction errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("invalid fibonacci detector: {0}")]
    InvalidFibonacci(String),

    #[error("{0}: period must be >= 1")]
    ZeroPeriod(&'static str),

    #[error("{rule}: threshold out of range: {value}")]
    ThresholdOutOfRange { rule: &'static str, value: f64 },

    #[error("macd_bullish_cross: fast period ({fast}) must be shorter than slow ({slow})")]
    MacdPeriods { fast: usize, slow: usize },

    #[error("all/any combinator needs at least one rule")]
    EmptyCombinator,
}
