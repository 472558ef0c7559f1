//! Moving Average Convergence Divergence (MACD).
//!
//! Line = EMA(fast) - EMA(slow) of closes.
//! Signal = EMA(signal) of the line, seeded from the first valid line value.
//! Lookback: line = slow - 1, signal = slow + signal - 2.

use super::ema::ema_of_series;
use super::indicator::Indicator;
use crate::domain::Bar;

/// Which MACD series an instance produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdBand {
    Line,
    Signal,
}

#[derive(Debug, Clone)]
pub struct Macd {
    fast: usize,
    slow: usize,
    signal: usize,
    band: MacdBand,
    name: String,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize, band: MacdBand) -> Self {
        assert!(fast >= 1 && signal >= 1, "MACD periods must be >= 1");
        assert!(fast < slow, "MACD fast period must be shorter than slow");
        Self {
            fast,
            slow,
            signal,
            band,
            name: Self::key(fast, slow, signal, band),
        }
    }

    pub fn key(fast: usize, slow: usize, signal: usize, band: MacdBand) -> String {
        match band {
            MacdBand::Line => format!("macd_{fast}_{slow}"),
            MacdBand::Signal => format!("macd_signal_{fast}_{slow}_{signal}"),
        }
    }
}

impl Indicator for Macd {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        match self.band {
            MacdBand::Line => self.slow - 1,
            MacdBand::Signal => self.slow + self.signal - 2,
        }
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let (line, signal) = macd_series(&closes, self.fast, self.slow, self.signal);
        match self.band {
            MacdBand::Line => line,
            MacdBand::Signal => signal,
        }
    }
}

fn macd_series(closes: &[f64], fast: usize, slow: usize, signal: usize) -> (Vec<f64>, Vec<f64>) {
    let fast_ema = ema_of_series(closes, fast);
    let slow_ema = ema_of_series(closes, slow);
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| f - s)
        .collect();

    let mut signal_line = vec![f64::NAN; closes.len()];
    let start = slow - 1;
    if closes.len() > start {
        let tail = ema_of_series(&line[start..], signal);
        signal_line[start..].copy_from_slice(&tail);
    }
    (line, signal_line)
}
