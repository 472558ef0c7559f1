//! Property tests for engine invariants.
//!
//! Uses proptest to verify:
//! 1. Capital never goes negative after any transition
//! 2. Capital history length is `len - warmup + 1` for every run
//! 3. At most one averaging purchase per position

use chrono::NaiveDate;
use proptest::prelude::*;
use retrace_core::domain::{Bar, PriceSeries, StrategyParams, DEFAULT_RULE_LABEL};
use retrace_core::engine::{run_backtest, EngineConfig, PositionStateMachine, Transition};
use retrace_core::signals::{EntryRule, FibonacciDetector};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_ratio() -> impl Strategy<Value = f64> {
    (1u32..40).prop_map(|r| r as f64 / 100.0)
}

fn arb_params() -> impl Strategy<Value = StrategyParams> {
    (arb_ratio(), arb_ratio(), prop::option::of(arb_ratio())).prop_map(|(pt, sl, dca)| {
        StrategyParams::new(pt, sl, dca, DEFAULT_RULE_LABEL).unwrap()
    })
}

fn arb_closes(min: usize, max: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1.0..500.0_f64, min..max)
}

fn bars_from(closes: &[f64]) -> Vec<Bar> {
    let base = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar::new(
                base + chrono::Duration::days(i as i64),
                open,
                open.max(close),
                open.min(close),
                close,
            )
        })
        .collect()
}

// ── 1. Non-negative capital ──────────────────────────────────────────

proptest! {
    /// Entries and averaging are floored against the same capital they debit.
    #[test]
    fn capital_never_negative(
        params in arb_params(),
        closes in arb_closes(2, 200),
        signals in prop::collection::vec(any::<bool>(), 200),
        capital in 1.0..1e7_f64,
        fee in 0.0..0.01_f64,
    ) {
        let bars = bars_from(&closes);
        let mut machine = PositionStateMachine::new(&params, &EngineConfig::new(capital, fee));
        for (t, bar) in bars.iter().enumerate() {
            if machine.is_flat() {
                if signals[t] {
                    machine.try_enter(t, bar);
                }
            } else {
                machine.manage(t, bar);
            }
            prop_assert!(machine.capital() >= 0.0, "capital {} at bar {}", machine.capital(), t);
            machine.mark(bar.close);
        }
        let final_capital = machine.finish(bars[bars.len() - 1].close);
        prop_assert!(final_capital >= 0.0);
        prop_assert!(machine.history().iter().all(|&v| v >= 0.0));
    }

    /// A position averages down at most once, however far the price falls.
    #[test]
    fn at_most_one_averaging_per_position(
        closes in arb_closes(2, 150),
        dca in arb_ratio(),
    ) {
        let params = StrategyParams::new(10.0, 0.99, Some(dca), DEFAULT_RULE_LABEL).unwrap();
        let bars = bars_from(&closes);
        let mut machine = PositionStateMachine::new(&params, &EngineConfig::default());
        machine.try_enter(0, &bars[0]);
        let mut averaged = 0;
        for (t, bar) in bars.iter().enumerate().skip(1) {
            match machine.manage(t, bar) {
                Transition::Averaged { .. } => averaged += 1,
                Transition::Exited(_) => break,
                _ => {}
            }
        }
        prop_assert!(averaged <= 1);
    }
}

// ── 2. History length ────────────────────────────────────────────────

proptest! {
    #[test]
    fn history_length_matches_processed_bars(
        closes in arb_closes(100, 220),
        window in 10usize..80,
        params in arb_params(),
    ) {
        let bars = bars_from(&closes);
        let series = PriceSeries::new("P", bars).unwrap();
        let rule = EntryRule::Any {
            rules: vec![
                EntryRule::Fibonacci(FibonacciDetector { window, ..FibonacciDetector::default() }),
                EntryRule::CandleBullish,
            ],
        };
        let out = run_backtest(&series, &params, &rule, &EngineConfig::default()).unwrap();
        prop_assert_eq!(out.warmup, window);
        prop_assert_eq!(out.capital_history.len(), series.len() - window + 1);
        prop_assert_eq!(out.capital_history[0], EngineConfig::default().initial_capital);
        prop_assert_eq!(*out.capital_history.last().unwrap(), out.final_capital);
    }
}
