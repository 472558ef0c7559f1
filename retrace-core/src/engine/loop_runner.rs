//! Bar-by-bar replay of one strategy over one series.
//!
//! Per bar, after warm-up:
//! 1. FLAT: evaluate the entry rule on the bar's close, enter if it fires
//! 2. LONG: exit check, then averaging check
//! 3. Mark-to-market into the capital history
//!
//! At series end any open position is liquidated at the last close.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::domain::{PriceSeries, StrategyParams, TradeRecord};
use crate::indicators::IndicatorValues;
use crate::signals::{EntryRule, RuleContext};

use super::state::{EngineConfig, PositionStateMachine, Transition};
use super::EngineError;

/// Raw output of a single run. Metrics are derived from it downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub asset: String,
    pub initial_capital: f64,
    pub final_capital: f64,
    /// `history[0]` is the initial capital, then one entry per processed bar.
    pub capital_history: Vec<f64>,
    pub trades: Vec<TradeRecord>,
    /// Fibonacci level label → times a fibonacci leaf detected it while flat,
    /// whether or not the whole rule fired.
    pub fib_hits: BTreeMap<String, usize>,
    /// Index of the first processed bar.
    pub warmup: usize,
}

impl RunOutput {
    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }

    pub fn has_trades(&self) -> bool {
        !self.trades.is_empty()
    }
}

/// Run one strategy over one series.
///
/// Bars `warmup..len` are processed, where `warmup = rule.warmup_bars()`, so
/// the capital history has `len - warmup + 1` entries.
pub fn run_backtest(
    series: &PriceSeries,
    params: &StrategyParams,
    rule: &EntryRule,
    config: &EngineConfig,
) -> Result<RunOutput, EngineError> {
    config.validate()?;
    rule.validate()?;

    let bars = series.bars();
    let warmup = rule.warmup_bars();
    if bars.len() <= warmup {
        return Err(EngineError::InsufficientHistory {
            asset: series.asset().to_string(),
            len: bars.len(),
            warmup,
        });
    }

    let indicators = IndicatorValues::precompute(&rule.required_indicators(), bars);
    let mut machine = PositionStateMachine::new(params, config);
    let mut fib_hits: BTreeMap<String, usize> = BTreeMap::new();

    for (t, bar) in bars.iter().enumerate().skip(warmup) {
        let transition = if machine.is_flat() {
            let ctx = RuleContext::new(bars, t, &indicators);
            if let Some(hit) = rule.fib_detection(&ctx) {
                *fib_hits.entry(hit.label()).or_default() += 1;
            }
            match rule.evaluate(&ctx) {
                Some(_) => machine.try_enter(t, bar),
                None => Transition::Hold,
            }
        } else {
            machine.manage(t, bar)
        };

        if transition != Transition::Hold {
            trace!(asset = series.asset(), bar = t, ?transition, "transition");
        }
        machine.mark(bar.close);
    }

    let last_close = bars[bars.len() - 1].close;
    machine.finish(last_close);
    let (final_capital, capital_history, trades) = machine.into_parts();

    Ok(RunOutput {
        asset: series.asset().to_string(),
        initial_capital: config.initial_capital,
        final_capital,
        capital_history,
        trades,
        fib_hits,
        warmup,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_RULE_LABEL;
    use chrono::NaiveDate;

    fn series(closes: &[f64]) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        PriceSeries::from_closes("TEST", start, closes).unwrap()
    }

    fn params() -> StrategyParams {
        StrategyParams::new(0.10, 0.05, None, DEFAULT_RULE_LABEL).unwrap()
    }

    #[test]
    fn history_length_is_len_minus_warmup_plus_one() {
        let out = run_backtest(
            &series(&[100.0; 120]),
            &params(),
            &EntryRule::default(),
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(out.warmup, 60);
        assert_eq!(out.capital_history.len(), 61);
    }

    #[test]
    fn series_not_longer_than_warmup_is_rejected() {
        let err = run_backtest(
            &series(&[100.0; 60]),
            &params(),
            &EntryRule::default(),
            &EngineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientHistory { len: 60, warmup: 60, .. }));
    }

    #[test]
    fn invalid_rule_is_rejected_before_running() {
        let rule = EntryRule::All { rules: vec![] };
        let err = run_backtest(&series(&[100.0; 120]), &params(), &rule, &EngineConfig::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::Rule(_)));
    }

    #[test]
    fn fib_detections_count_even_when_rule_does_not_fire() {
        let mut closes = vec![150.0; 30];
        closes.extend([50.0; 30]);
        closes.push(88.2);
        let rule = EntryRule::All {
            rules: vec![
                EntryRule::default(),
                EntryRule::RsiBelow {
                    period: 14,
                    threshold: 1.0,
                },
            ],
        };
        let out = run_backtest(&series(&closes), &params(), &rule, &EngineConfig::default()).unwrap();
        assert!(!out.has_trades());
        assert_eq!(out.fib_hits.get("level_61.8%"), Some(&1));
    }

    #[test]
    fn rule_without_warmup_processes_every_bar() {
        let out = run_backtest(
            &series(&[100.0; 10]),
            &params(),
            &EntryRule::CandleBullish,
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(out.capital_history.len(), 11);
        assert!(!out.has_trades());
    }
}
