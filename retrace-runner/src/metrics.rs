//! Performance metrics — pure functions that reduce a run to statistics.
//!
//! Every metric is a pure function: capital history and/or trade list in,
//! scalar out. Percentages are expressed on a 0–100 scale.

use serde::{Deserialize, Serialize};
use retrace_core::domain::TradeRecord;
use retrace_core::engine::RunOutput;

/// Metrics of one (strategy, asset) run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub asset: String,
    pub total_return_pct: f64,
    pub win_rate_pct: f64,
    pub max_drawdown_pct: f64,
    pub trade_count: usize,
    pub final_capital: f64,
}

impl RunResult {
    pub fn from_output(output: &RunOutput) -> Self {
        Self {
            asset: output.asset.clone(),
            total_return_pct: total_return_pct(output.initial_capital, output.final_capital),
            win_rate_pct: win_rate_pct(&output.trades),
            max_drawdown_pct: max_drawdown_pct(&output.capital_history),
            trade_count: output.trades.len(),
            final_capital: output.final_capital,
        }
    }

    /// Win rate and return are only meaningful when at least one trade closed.
    pub fn has_trades(&self) -> bool {
        self.trade_count > 0
    }
}

/// Per-strategy mean over the assets that traded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub total_return_pct: f64,
    pub win_rate_pct: f64,
    pub max_drawdown_pct: f64,
    /// Assets that contributed (traded at least once).
    pub asset_count: usize,
    pub trade_count: usize,
}

/// A strategy either has metrics or explicitly traded nowhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyOutcome {
    Metrics(AggregateMetrics),
    NoTrades,
}

impl StrategyOutcome {
    pub fn metrics(&self) -> Option<&AggregateMetrics> {
        match self {
            Self::Metrics(m) => Some(m),
            Self::NoTrades => None,
        }
    }
}

/// Arithmetic mean of return, win rate and drawdown across qualifying runs.
///
/// Runs without trades are excluded; if none remain the outcome is `NoTrades`.
/// Results are summed in slice order so the reduction is deterministic.
pub fn aggregate(results: &[RunResult]) -> StrategyOutcome {
    let qualifying: Vec<&RunResult> = results.iter().filter(|r| r.has_trades()).collect();
    if qualifying.is_empty() {
        return StrategyOutcome::NoTrades;
    }
    let n = qualifying.len() as f64;
    let mean = |f: fn(&RunResult) -> f64| qualifying.iter().map(|&r| f(r)).sum::<f64>() / n;
    StrategyOutcome::Metrics(AggregateMetrics {
        total_return_pct: mean(|r| r.total_return_pct),
        win_rate_pct: mean(|r| r.win_rate_pct),
        max_drawdown_pct: mean(|r| r.max_drawdown_pct),
        asset_count: qualifying.len(),
        trade_count: qualifying.iter().map(|r| r.trade_count).sum(),
    })
}

// ─── Individual metric functions ────────────────────────────────────

/// Total return in percent: (final / initial - 1) * 100.
pub fn total_return_pct(initial_capital: f64, final_capital: f64) -> f64 {
    if initial_capital <= 0.0 {
        return 0.0;
    }
    (final_capital / initial_capital - 1.0) * 100.0
}

/// Fraction of trades that were winners, in percent. Zero trades → 0.
pub fn win_rate_pct(trades: &[TradeRecord]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let winners = trades.iter().filter(|t| t.is_winner()).count();
    winners as f64 / trades.len() as f64 * 100.0
}

/// Drawdown from the running peak at every point, as a fraction in `[0, 1]`.
///
/// A zero peak yields zero drawdown.
pub fn drawdown_series(history: &[f64]) -> Vec<f64> {
    let mut peak = f64::NEG_INFINITY;
    history
        .iter()
        .map(|&value| {
            peak = peak.max(value);
            if peak > 0.0 {
                ((peak - value) / peak).clamp(0.0, 1.0)
            } else {
                0.0
            }
        })
        .collect()
}

/// Largest peak-to-trough decline in percent (0 for a flat or rising curve).
pub fn max_drawdown_pct(history: &[f64]) -> f64 {
    drawdown_series(history)
        .into_iter()
        .fold(0.0_f64, f64::max)
        * 100.0
}
