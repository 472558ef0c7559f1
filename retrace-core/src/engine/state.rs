//! Engine configuration and the per-run position state machine.
//!
//! One `PositionStateMachine` exists per (strategy, asset) run and is owned by
//! that run alone. Capital, the open position and the capital history are
//! threaded through it explicitly; nothing is shared between runs.

use crate::domain::{Bar, Position, StrategyParams, TradeOutcome, TradeRecord};
use serde::{Deserialize, Serialize};

use super::EngineError;

pub const DEFAULT_INITIAL_CAPITAL: f64 = 10_000_000.0;
pub const DEFAULT_FEE_RATE: f64 = 0.00015;

/// Configuration shared by every run of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub initial_capital: f64,
    /// Applied symmetrically on entry, averaging and exit fills.
    pub fee_rate: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            fee_rate: DEFAULT_FEE_RATE,
        }
    }
}

impl EngineConfig {
    pub fn new(initial_capital: f64, fee_rate: f64) -> Self {
        Self {
            initial_capital,
            fee_rate,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "initial_capital must be > 0, got {}",
                self.initial_capital
            )));
        }
        if !(self.fee_rate.is_finite() && (0.0..1.0).contains(&self.fee_rate)) {
            return Err(EngineError::InvalidConfig(format!(
                "fee_rate must lie in [0, 1), got {}",
                self.fee_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MachineState {
    Flat,
    Long(Position),
}

/// What a single bar did to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Nothing changed.
    Hold,
    /// An entry signal fired but not even one share was affordable.
    Unaffordable,
    Entered { price: f64, quantity: u64 },
    Averaged { price: f64, added: u64, entry_price: f64 },
    Exited(TradeRecord),
}

/// FLAT/LONG state machine with fee-inclusive cash accounting.
#[derive(Debug, Clone)]
pub struct PositionStateMachine {
    profit_target: f64,
    stop_loss: f64,
    dca_threshold: Option<f64>,
    allocation_ratio: f64,
    fee_rate: f64,
    capital: f64,
    state: MachineState,
    trades: Vec<TradeRecord>,
    history: Vec<f64>,
}

impl PositionStateMachine {
    pub fn new(params: &StrategyParams, config: &EngineConfig) -> Self {
        Self {
            profit_target: params.profit_target(),
            stop_loss: params.stop_loss(),
            dca_threshold: params.dca_threshold(),
            allocation_ratio: params.allocation_ratio(),
            fee_rate: config.fee_rate,
            capital: config.initial_capital,
            state: MachineState::Flat,
            trades: Vec::new(),
            history: vec![config.initial_capital],
        }
    }

    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn state(&self) -> &MachineState {
        &self.state
    }

    pub fn is_flat(&self) -> bool {
        matches!(self.state, MachineState::Flat)
    }

    pub fn position(&self) -> Option<&Position> {
        match &self.state {
            MachineState::Long(pos) => Some(pos),
            MachineState::Flat => None,
        }
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }

    /// FLAT → LONG on an entry signal at `bar`'s close.
    ///
    /// Lot size is floored so that price plus fee never exceeds the allocated capital.
    pub fn try_enter(&mut self, bar_index: usize, bar: &Bar) -> Transition {
        if !self.is_flat() {
            return Transition::Hold;
        }
        let price = bar.close;
        let unit_cost = price * (1.0 + self.fee_rate);
        let quantity = affordable_quantity(self.capital * self.allocation_ratio, unit_cost);
        if quantity == 0 {
            return Transition::Unaffordable;
        }

        self.capital -= quantity as f64 * unit_cost;
        self.state = MachineState::Long(Position::open(price, quantity, bar_index, bar.date));
        Transition::Entered { price, quantity }
    }

    /// Apply exit, then averaging, rules to an open position. No-op while flat.
    pub fn manage(&mut self, bar_index: usize, bar: &Bar) -> Transition {
        let MachineState::Long(pos) = &mut self.state else {
            return Transition::Hold;
        };
        let price = bar.close;
        let profit_rate = pos.profit_rate(price);

        // Exit has priority over averaging.
        if profit_rate >= self.profit_target || profit_rate <= -self.stop_loss {
            self.capital += pos.quantity as f64 * price * (1.0 - self.fee_rate);
            let trade = TradeRecord {
                entry_bar: pos.entry_bar,
                entry_date: pos.entry_date,
                exit_bar: bar_index,
                exit_date: bar.date,
                entry_price: pos.entry_price,
                exit_price: price,
                quantity: pos.quantity,
                profit_rate,
                averaged: pos.dca_done,
                outcome: TradeOutcome::from_profit_rate(profit_rate),
            };
            self.trades.push(trade.clone());
            self.state = MachineState::Flat;
            return Transition::Exited(trade);
        }

        if let Some(threshold) = self.dca_threshold {
            if !pos.dca_done && profit_rate <= -threshold {
                let unit_cost = price * (1.0 + self.fee_rate);
                let added = affordable_quantity(self.capital, unit_cost);
                if added > 0 {
                    self.capital -= added as f64 * unit_cost;
                    pos.average_down(price, added);
                    return Transition::Averaged {
                        price,
                        added,
                        entry_price: pos.entry_price,
                    };
                }
            }
        }

        Transition::Hold
    }

    /// Append the mark-to-market value at `close` to the capital history.
    pub fn mark(&mut self, close: f64) {
        let held = self.position().map_or(0.0, |pos| pos.market_value(close));
        self.history.push(self.capital + held);
    }

    /// Liquidate any open position at `last_close` without fee and without
    /// recording a trade. Returns the final capital.
    pub fn finish(&mut self, last_close: f64) -> f64 {
        if let MachineState::Long(pos) = &self.state {
            self.capital += pos.market_value(last_close);
            self.state = MachineState::Flat;
        }
        self.capital
    }

    pub fn into_parts(self) -> (f64, Vec<f64>, Vec<TradeRecord>) {
        (self.capital, self.history, self.trades)
    }
}

/// Whole units of `unit_cost` that fit in `budget`, never overshooting after rounding.
fn affordable_quantity(budget: f64, unit_cost: f64) -> u64 {
    if !(budget > 0.0 && unit_cost > 0.0) {
        return 0;
    }
    let mut quantity = (budget / unit_cost).floor();
    if quantity * unit_cost > budget {
        quantity -= 1.0;
    }
    quantity.max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_RULE_LABEL;
    use chrono::NaiveDate;

    fn bar(i: usize, close: f64) -> Bar {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        Bar::flat(start + chrono::Duration::days(i as i64), close)
    }

    fn machine(pt: f64, sl: f64, dca: Option<f64>, capital: f64, fee: f64) -> PositionStateMachine {
        let params = StrategyParams::new(pt, sl, dca, DEFAULT_RULE_LABEL).unwrap();
        PositionStateMachine::new(&params, &EngineConfig::new(capital, fee))
    }

    #[test]
    fn entry_uses_full_capital_without_dca() {
        let mut m = machine(0.1, 0.05, None, 1000.0, 0.0);
        assert_eq!(
            m.try_enter(0, &bar(0, 30.0)),
            Transition::Entered {
                price: 30.0,
                quantity: 33
            }
        );
        assert!((m.capital() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn entry_uses_half_capital_with_dca() {
        let mut m = machine(0.1, 0.2, Some(0.05), 1000.0, 0.0);
        m.try_enter(0, &bar(0, 100.0));
        assert_eq!(m.position().map(|p| p.quantity), Some(5));
        assert!((m.capital() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn fee_is_included_in_lot_size() {
        // 1000 / (100 * 1.01) = 9.9 → 9 shares
        let mut m = machine(0.1, 0.05, None, 1000.0, 0.01);
        m.try_enter(0, &bar(0, 100.0));
        assert_eq!(m.position().map(|p| p.quantity), Some(9));
        assert!((m.capital() - (1000.0 - 9.0 * 101.0)).abs() < 1e-9);
    }

    #[test]
    fn unaffordable_entry_stays_flat() {
        let mut m = machine(0.1, 0.05, None, 50.0, 0.0);
        assert_eq!(m.try_enter(0, &bar(0, 100.0)), Transition::Unaffordable);
        assert!(m.is_flat());
        assert_eq!(m.capital(), 50.0);
    }

    #[test]
    fn take_profit_exit_records_win() {
        let mut m = machine(0.1, 0.05, None, 1000.0, 0.0);
        m.try_enter(0, &bar(0, 100.0));
        assert_eq!(m.manage(1, &bar(1, 105.0)), Transition::Hold);
        let Transition::Exited(trade) = m.manage(2, &bar(2, 110.0)) else {
            panic!("expected exit");
        };
        assert_eq!(trade.outcome, TradeOutcome::Win);
        assert_eq!(trade.bars_held(), 2);
        assert!(m.is_flat());
        assert!((m.capital() - 1100.0).abs() < 1e-9);
    }

    #[test]
    fn stop_loss_exit_records_loss() {
        let mut m = machine(0.1, 0.05, None, 1000.0, 0.0);
        m.try_enter(0, &bar(0, 100.0));
        let Transition::Exited(trade) = m.manage(1, &bar(1, 94.0)) else {
            panic!("expected exit");
        };
        assert_eq!(trade.outcome, TradeOutcome::Loss);
        assert_eq!(m.trades().len(), 1);
    }

    #[test]
    fn exit_takes_priority_over_averaging() {
        // stop loss and dca threshold both hit at -5%
        let mut m = machine(0.1, 0.05, Some(0.05), 1000.0, 0.0);
        m.try_enter(0, &bar(0, 100.0));
        assert!(matches!(m.manage(1, &bar(1, 95.0)), Transition::Exited(_)));
    }

    #[test]
    fn averaging_happens_once() {
        let mut m = machine(0.1, 0.5, Some(0.05), 1000.0, 0.0);
        m.try_enter(0, &bar(0, 100.0));
        let t = m.manage(1, &bar(1, 95.0));
        let Transition::Averaged { entry_price, added, .. } = t else {
            panic!("expected averaging, got {t:?}");
        };
        assert_eq!(added, 5);
        assert!(entry_price > 95.0 && entry_price < 100.0);
        let qty = m.position().map(|p| p.quantity);
        assert_eq!(m.manage(2, &bar(2, 90.0)), Transition::Hold);
        assert_eq!(m.position().map(|p| p.quantity), qty);
    }

    #[test]
    fn history_marks_open_position() {
        let mut m = machine(0.5, 0.5, None, 1000.0, 0.0);
        m.mark(100.0);
        m.try_enter(1, &bar(1, 100.0));
        m.mark(100.0);
        m.manage(2, &bar(2, 120.0));
        m.mark(120.0);
        assert_eq!(m.history(), &[1000.0, 1000.0, 1000.0, 1200.0]);
    }

    #[test]
    fn finish_liquidates_without_fee_or_trade() {
        let mut m = machine(0.5, 0.5, None, 1000.0, 0.01);
        m.try_enter(0, &bar(0, 100.0));
        let cash = m.capital();
        let final_capital = m.finish(110.0);
        assert!((final_capital - (cash + 9.0 * 110.0)).abs() < 1e-9);
        assert!(m.trades().is_empty());
        assert!(m.is_flat());
    }

    #[test]
    fn affordable_quantity_never_overshoots() {
        assert_eq!(affordable_quantity(100.0, 33.3), 3);
        assert_eq!(affordable_quantity(0.0, 10.0), 0);
        assert_eq!(affordable_quantity(10.0, 0.0), 0);
        let q = affordable_quantity(0.3, 0.1);
        assert!(q as f64 * 0.1 <= 0.3);
    }

    #[test]
    fn config_validation() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::new(0.0, 0.0).validate().is_err());
        assert!(EngineConfig::new(1000.0, 1.5).validate().is_err());
    }
}
