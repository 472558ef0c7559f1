//! Single backtest runner — loads one series, runs the engine, derives metrics.
//!
//! Used directly by the CLI `run` command and once per asset by the sweep.

use thiserror::Error;

use retrace_core::domain::StrategyParams;
use retrace_core::engine::{run_backtest, EngineConfig, EngineError, RunOutput};
use retrace_core::signals::EntryRule;

use crate::data_loader::{LoadError, SeriesLoader};
use crate::metrics::RunResult;

/// Per-asset failures. The sweep treats both kinds as a skip.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("simulation failed: {0}")]
    Engine(#[from] EngineError),
}

/// Engine output plus the metrics derived from it.
#[derive(Debug, Clone)]
pub struct SingleRun {
    pub output: RunOutput,
    pub result: RunResult,
}

/// Load `asset`, check eligibility, and run one strategy over it.
pub fn run_single(
    loader: &dyn SeriesLoader,
    asset: &str,
    params: &StrategyParams,
    rule: &EntryRule,
    engine: &EngineConfig,
    min_bars: usize,
) -> Result<SingleRun, RunError> {
    let series = loader.load(asset)?;
    if !series.is_eligible(min_bars) {
        return Err(LoadError::TooShort {
            asset: asset.to_string(),
            len: series.len(),
            min: min_bars,
        }
        .into());
    }
    let output = run_backtest(&series, params, rule, engine)?;
    let result = RunResult::from_output(&output);
    Ok(SingleRun { output, result })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use retrace_core::domain::{PriceSeries, DEFAULT_RULE_LABEL};
    use std::collections::HashMap;

    struct MapLoader(HashMap<String, PriceSeries>);

    impl SeriesLoader for MapLoader {
        fn load(&self, asset: &str) -> Result<PriceSeries, LoadError> {
            self.0.get(asset).cloned().ok_or_else(|| LoadError::NotFound {
                asset: asset.to_string(),
                path: asset.into(),
            })
        }
    }

    fn loader(len: usize) -> MapLoader {
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let series = PriceSeries::from_closes("FLAT", start, &vec![100.0; len]).unwrap();
        MapLoader(HashMap::from([("FLAT".to_string(), series)]))
    }

    fn params() -> StrategyParams {
        StrategyParams::new(0.1, 0.05, None, DEFAULT_RULE_LABEL).unwrap()
    }

    #[test]
    fn flat_series_runs_without_trades() {
        let run = run_single(
            &loader(120),
            "FLAT",
            &params(),
            &EntryRule::default(),
            &EngineConfig::default(),
            100,
        )
        .unwrap();
        assert_eq!(run.result.trade_count, 0);
        assert_eq!(run.result.total_return_pct, 0.0);
        assert_eq!(run.output.capital_history.len(), 61);
    }

    #[test]
    fn short_series_is_too_short() {
        let err = run_single(
            &loader(99),
            "FLAT",
            &params(),
            &EntryRule::default(),
            &EngineConfig::default(),
            100,
        )
        .unwrap_err();
        assert!(matches!(err, RunError::Load(LoadError::TooShort { len: 99, min: 100, .. })));
    }

    #[test]
    fn missing_asset_is_load_error() {
        let err = run_single(
            &loader(120),
            "OTHER",
            &params(),
            &EntryRule::default(),
            &EngineConfig::default(),
            100,
        )
        .unwrap_err();
        assert!(matches!(err, RunError::Load(LoadError::NotFound { .. })));
    }

    #[test]
    fn series_shorter_than_warmup_is_engine_error() {
        let rule = EntryRule::Fibonacci(retrace_core::signals::FibonacciDetector {
            window: 150,
            ..Default::default()
        });
        let err = run_single(&loader(120), "FLAT", &params(), &rule, &EngineConfig::default(), 100)
            .unwrap_err();
        assert!(matches!(err, RunError::Engine(EngineError::InsufficientHistory { .. })));
    }
}
