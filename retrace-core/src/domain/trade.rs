//! TradeRecord — a realized round trip, entry to exit.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Realized result of a closed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOutcome {
    Win,
    Loss,
}

impl TradeOutcome {
    /// A non-negative profit rate at exit counts as a win.
    pub fn from_profit_rate(profit_rate: f64) -> Self {
        if profit_rate >= 0.0 {
            Self::Win
        } else {
            Self::Loss
        }
    }
}

/// A closed trade. Forced liquidation at series end is not recorded here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub entry_bar: usize,
    pub entry_date: NaiveDate,
    pub exit_bar: usize,
    pub exit_date: NaiveDate,
    /// Average entry after any averaging purchase.
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: u64,
    pub profit_rate: f64,
    pub averaged: bool,
    pub outcome: TradeOutcome,
}

impl TradeRecord {
    pub fn is_winner(&self) -> bool {
        self.outcome == TradeOutcome::Win
    }

    pub fn bars_held(&self) -> usize {
        self.exit_bar.saturating_sub(self.entry_bar)
    }
}
