//! Fibonacci retracement proximity detector.
//!
//! The range comes from the `window` bars strictly before the evaluated bar;
//! the proximity test uses the evaluated bar's own close. Levels are tested
//! in configured order and the first match wins.

use crate::domain::{format_pct, Bar, DEFAULT_RULE_LABEL};
use serde::{Deserialize, Serialize};

use super::RuleError;

pub const DEFAULT_FIB_WINDOW: usize = 60;
pub const DEFAULT_FIB_TOLERANCE: f64 = 0.01;
pub const DEFAULT_FIB_LEVELS: [f64; 2] = [0.382, 0.618];

/// A retracement level that matched, tagged for analytics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FibHit {
    pub ratio: f64,
    pub level_price: f64,
}

impl FibHit {
    /// Analytics key, e.g. `level_61.8%`.
    pub fn label(&self) -> String {
        level_label(self.ratio)
    }
}

pub fn level_label(ratio: f64) -> String {
    format!("level_{}%", format_pct(ratio))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FibonacciDetector {
    pub window: usize,
    pub tolerance: f64,
    pub levels: Vec<f64>,
}

impl Default for FibonacciDetector {
    fn default() -> Self {
        Self {
            window: DEFAULT_FIB_WINDOW,
            tolerance: DEFAULT_FIB_TOLERANCE,
            levels: DEFAULT_FIB_LEVELS.to_vec(),
        }
    }
}

impl FibonacciDetector {
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.window < 2 {
            return Err(RuleError::InvalidFibonacci(format!(
                "window must be >= 2, got {}",
                self.window
            )));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(RuleError::InvalidFibonacci(format!(
                "tolerance must be > 0, got {}",
                self.tolerance
            )));
        }
        if self.levels.is_empty() {
            return Err(RuleError::InvalidFibonacci("no levels configured".into()));
        }
        if let Some(bad) = self
            .levels
            .iter()
            .find(|r| !(r.is_finite() && **r > 0.0 && **r < 1.0))
        {
            return Err(RuleError::InvalidFibonacci(format!(
                "level ratio must lie in (0, 1), got {bad}"
            )));
        }
        Ok(())
    }

    /// Label used in strategy names.
    ///
    /// The default detector is the bare `피보나치`; any other setting renders
    /// as `피보나치(<window>/<tolerance>%)`, plus `/<levels>` when the levels differ.
    pub fn label(&self) -> String {
        if *self == Self::default() {
            return DEFAULT_RULE_LABEL.to_string();
        }
        let mut label = format!(
            "{DEFAULT_RULE_LABEL}({}/{}%",
            self.window,
            format_pct(self.tolerance)
        );
        if self.levels != DEFAULT_FIB_LEVELS {
            let levels: Vec<String> = self.levels.iter().map(|&r| format_pct(r)).collect();
            label.push('/');
            label.push_str(&levels.join(":"));
        }
        label.push(')');
        label
    }

    /// Evaluate at `bar_index`. Only `bars[bar_index - window..=bar_index]` is read.
    ///
    /// A zero-range window, or a bar without a full window behind it, is no signal.
    pub fn evaluate(&self, bars: &[Bar], bar_index: usize) -> Option<FibHit> {
        if bar_index < self.window || bar_index >= bars.len() {
            return None;
        }
        let window = &bars[bar_index - self.window..bar_index];
        let high = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let range = high - low;
        if !(range > 0.0) {
            return None;
        }

        let close = bars[bar_index].close;
        self.levels.iter().find_map(|&ratio| {
            let level_price = high - range * ratio;
            if level_price <= 0.0 {
                return None;
            }
            ((close - level_price).abs() / level_price < self.tolerance)
                .then_some(FibHit { ratio, level_price })
        })
    }
}
