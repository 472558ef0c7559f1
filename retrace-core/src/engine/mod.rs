//! Backtesting engine — position state machine and the per-series bar loop.

pub mod loop_runner;
pub mod state;

pub use loop_runner::{run_backtest, RunOutput};
pub use state::{
    EngineConfig, MachineState, PositionStateMachine, Transition, DEFAULT_FEE_RATE,
    DEFAULT_INITIAL_CAPITAL,
};

use crate::signals::RuleError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("{asset}: {len} bars do not cover the {warmup}-bar warm-up")]
    InsufficientHistory {
        asset: String,
        len: usize,
        warmup: usize,
    },
}
