use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Open long position. Lives only while the state machine is long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Cost-weighted average entry price (fees excluded).
    pub entry_price: f64,
    pub quantity: u64,
    /// Set once the single allowed averaging purchase has happened.
    pub dca_done: bool,
    pub entry_bar: usize,
    pub entry_date: NaiveDate,
}

impl Position {
    pub fn open(entry_price: f64, quantity: u64, entry_bar: usize, entry_date: NaiveDate) -> Self {
        Self {
            entry_price,
            quantity,
            dca_done: false,
            entry_bar,
            entry_date,
        }
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity as f64 * price
    }

    /// Fractional gain of `price` over the average entry.
    pub fn profit_rate(&self, price: f64) -> f64 {
        (price - self.entry_price) / self.entry_price
    }

    /// Fold an averaging purchase into the cost basis.
    pub fn average_down(&mut self, price: f64, added: u64) {
        let total_qty = self.quantity + added;
        let total_cost = self.entry_price * self.quantity as f64 + price * added as f64;
        self.entry_price = total_cost / total_qty as f64;
        self.quantity = total_qty;
        self.dca_done = true;
    }
}
