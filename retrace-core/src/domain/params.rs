//! Strategy parameters — one point in the sweep's cross-product.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label used in strategy names when the entry rule is the plain fibonacci detector.
pub const DEFAULT_RULE_LABEL: &str = "피보나치";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamsError {
    #[error("{field} must be a finite ratio > 0, got {value}")]
    NonPositiveRatio { field: &'static str, value: f64 },

    #[error("rule label must not be empty or contain the '->' delimiter: {0:?}")]
    InvalidLabel(String),
}

/// Exit/averaging parameters of a strategy plus its deterministic name.
///
/// The name is a pure function of the ratios and the entry-rule label, so a
/// strategy run in one session is recognised in the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    profit_target: f64,
    stop_loss: f64,
    dca_threshold: Option<f64>,
    name: String,
}

impl StrategyParams {
    pub fn new(
        profit_target: f64,
        stop_loss: f64,
        dca_threshold: Option<f64>,
        rule_label: &str,
    ) -> Result<Self, ParamsError> {
        check_ratio("profit_target", profit_target)?;
        check_ratio("stop_loss", stop_loss)?;
        if let Some(dca) = dca_threshold {
            check_ratio("dca_threshold", dca)?;
        }
        let label = rule_label.trim();
        if label.is_empty() || label.contains("->") {
            return Err(ParamsError::InvalidLabel(rule_label.to_string()));
        }

        let dca = match dca_threshold {
            Some(d) => format!("{}%", format_pct(d)),
            None => "없음".to_string(),
        };
        let name = format!(
            "전략: {label}, 수익률 {}%, 손절율 {}%, 물타기 {dca}",
            format_pct(profit_target),
            format_pct(stop_loss),
        );

        Ok(Self {
            profit_target,
            stop_loss,
            dca_threshold,
            name,
        })
    }

    pub fn profit_target(&self) -> f64 {
        self.profit_target
    }

    pub fn stop_loss(&self) -> f64 {
        self.stop_loss
    }

    pub fn dca_threshold(&self) -> Option<f64> {
        self.dca_threshold
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dca_enabled(&self) -> bool {
        self.dca_threshold.is_some()
    }

    /// Share of capital committed on entry: half when averaging is allowed.
    pub fn allocation_ratio(&self) -> f64 {
        if self.dca_enabled() {
            0.5
        } else {
            1.0
        }
    }
}

fn check_ratio(field: &'static str, value: f64) -> Result<(), ParamsError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ParamsError::NonPositiveRatio { field, value })
    }
}

/// Render a ratio as a percentage without float noise (0.1 → "10", 0.025 → "2.5").
pub fn format_pct(ratio: f64) -> String {
    let pct = (ratio * 100.0 * 1e6).round() / 1e6;
    format!("{pct}")
}
