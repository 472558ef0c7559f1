//! PriceSeries — a validated, date-ordered run of bars for one asset.

use chrono::NaiveDate;
use thiserror::Error;

use super::bar::Bar;

/// Minimum number of bars for a series to be eligible for a backtest run.
pub const MIN_RUN_BARS: usize = 100;

/// Validation failures when building a [`PriceSeries`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("series is empty")]
    Empty,

    #[error("bar {index} ({date}) has invalid prices (NaN, negative, or high < low)")]
    InvalidBar { index: usize, date: NaiveDate },

    #[error("bar {index} date {date} is not after the previous date {previous}")]
    OutOfOrder {
        index: usize,
        date: NaiveDate,
        previous: NaiveDate,
    },
}

/// Ordered bars, ascending by date, no duplicate dates, all prices sane.
///
/// Construction is the only place validation happens; every consumer can
/// index freely afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSeries {
    asset: String,
    bars: Vec<Bar>,
}

impl PriceSeries {
    pub fn new(asset: impl Into<String>, bars: Vec<Bar>) -> Result<Self, SeriesError> {
        if bars.is_empty() {
            return Err(SeriesError::Empty);
        }
        for (index, bar) in bars.iter().enumerate() {
            if !bar.is_sane() {
                return Err(SeriesError::InvalidBar {
                    index,
                    date: bar.date,
                });
            }
            if index > 0 {
                let previous = bars[index - 1].date;
                if bar.date <= previous {
                    return Err(SeriesError::OutOfOrder {
                        index,
                        date: bar.date,
                        previous,
                    });
                }
            }
        }
        Ok(Self {
            asset: asset.into(),
            bars,
        })
    }

    /// Build a series of flat bars (open = high = low = close) on consecutive days.
    pub fn from_closes(
        asset: impl Into<String>,
        start: NaiveDate,
        closes: &[f64],
    ) -> Result<Self, SeriesError> {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar::flat(start + chrono::Duration::days(i as i64), close))
            .collect();
        Self::new(asset, bars)
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// True when the series is long enough to run a backtest.
    pub fn is_eligible(&self, min_bars: usize) -> bool {
        self.bars.len() >= min_bars
    }

    pub fn first_date(&self) -> NaiveDate {
        self.bars[0].date
    }

    pub fn last_date(&self) -> NaiveDate {
        self.bars[self.bars.len() - 1].date
    }
}
