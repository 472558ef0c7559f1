//! Stateless candle pattern scores.
//!
//! Each scorer looks at the tail of `bars` (the last bar is the evaluated one)
//! and returns a similarity in `0.0..=100.0`. Zero means no match.

use crate::domain::Bar;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandlePattern {
    Doji,
    Hammer,
    BullishEngulfing,
    MorningStar,
}

impl CandlePattern {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Doji => "doji",
            Self::Hammer => "hammer",
            Self::BullishEngulfing => "bullish_engulfing",
            Self::MorningStar => "morning_star",
        }
    }

    /// Bars the scorer reads, the evaluated bar included.
    pub fn bars_needed(&self) -> usize {
        match self {
            Self::Doji => 1,
            Self::Hammer => 4,
            Self::BullishEngulfing => 2,
            Self::MorningStar => 3,
        }
    }

    pub fn score(&self, bars: &[Bar]) -> f64 {
        if bars.len() < self.bars_needed() || bars.iter().rev().take(self.bars_needed()).any(Bar::is_void) {
            return 0.0;
        }
        match self {
            Self::Doji => doji(bars),
            Self::Hammer => hammer(bars),
            Self::BullishEngulfing => bullish_engulfing(bars),
            Self::MorningStar => morning_star(bars),
        }
    }
}

fn last(bars: &[Bar], back: usize) -> &Bar {
    &bars[bars.len() - 1 - back]
}

/// Body under 10% of the range; a zero-range bar is a perfect doji.
fn doji_score(bar: &Bar) -> f64 {
    let range = bar.range();
    if range == 0.0 {
        return 100.0;
    }
    let ratio = bar.body() / range;
    if ratio < 0.1 {
        100.0 - ratio * 100.0
    } else {
        0.0
    }
}

fn doji(bars: &[Bar]) -> f64 {
    doji_score(last(bars, 0))
}

/// Long lower shadow after a short decline, small upper shadow.
fn hammer(bars: &[Bar]) -> f64 {
    let candle = last(bars, 0);
    let prior_mean = (1..=3).map(|k| last(bars, k).close).sum::<f64>() / 3.0;
    if prior_mean <= candle.close {
        return 0.0;
    }

    let body = candle.body();
    let lower_shadow = candle.open.min(candle.close) - candle.low;
    let upper_shadow = candle.high - candle.open.max(candle.close);
    if body > 0.0 && lower_shadow > 2.0 * body && upper_shadow < body {
        (lower_shadow / (2.0 * body) * 50.0).min(100.0)
    } else {
        0.0
    }
}

fn bullish_engulfing(bars: &[Bar]) -> f64 {
    let prev = last(bars, 1);
    let curr = last(bars, 0);
    if !(curr.is_bullish() && prev.close < prev.open) || curr.high <= prev.high {
        return 0.0;
    }
    if curr.low < prev.low {
        100.0
    } else if curr.low > prev.low {
        80.0
    } else {
        0.0
    }
}

/// Bearish bar, doji-like middle bar, bullish bar closing above the first close.
fn morning_star(bars: &[Bar]) -> f64 {
    let first = last(bars, 2);
    let middle = last(bars, 1);
    let third = last(bars, 0);
    let matched = first.close < first.open
        && doji_score(middle) > 50.0
        && third.is_bullish()
        && third.open > middle.close
        && third.close > first.close;
    if matched {
        100.0
    } else {
        0.0
    }
}
