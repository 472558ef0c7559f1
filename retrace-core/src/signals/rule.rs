//! Entry rule: a tagged predicate tree evaluated per bar.
//!
//! Leaves are validated when the rule is built, so an unknown or malformed
//! condition is a configuration error instead of a silently-false check.

use serde::{Deserialize, Serialize};

use super::candle::CandlePattern;
use super::fibonacci::{FibHit, FibonacciDetector};
use super::RuleError;
use crate::domain::Bar;
use crate::indicators::{Indicator, IndicatorValues, Macd, MacdBand, Rsi};

/// Bar history plus precomputed indicators at one bar index.
///
/// Carries no position or capital state.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub bars: &'a [Bar],
    pub index: usize,
    pub indicators: &'a IndicatorValues,
}

impl<'a> RuleContext<'a> {
    pub fn new(bars: &'a [Bar], index: usize, indicators: &'a IndicatorValues) -> Self {
        Self {
            bars,
            index,
            indicators,
        }
    }

    fn bar(&self) -> &Bar {
        &self.bars[self.index]
    }

    /// History up to and including the evaluated bar.
    fn history(&self) -> &'a [Bar] {
        &self.bars[..=self.index]
    }
}

/// Result of a rule that fired. Carries the fibonacci level when one took part.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EntryMatch {
    pub fib: Option<FibHit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryRule {
    Fibonacci(FibonacciDetector),
    RsiBelow {
        #[serde(default = "default_rsi_period")]
        period: usize,
        threshold: f64,
    },
    MacdBullishCross {
        #[serde(default = "default_macd_fast")]
        fast: usize,
        #[serde(default = "default_macd_slow")]
        slow: usize,
        #[serde(default = "default_macd_signal")]
        signal: usize,
    },
    CandleBullish,
    PatternScore {
        pattern: CandlePattern,
        min_score: f64,
    },
    All {
        rules: Vec<EntryRule>,
    },
    Any {
        rules: Vec<EntryRule>,
    },
}

fn default_rsi_period() -> usize {
    14
}
fn default_macd_fast() -> usize {
    12
}
fn default_macd_slow() -> usize {
    26
}
fn default_macd_signal() -> usize {
    9
}

impl Default for EntryRule {
    fn default() -> Self {
        Self::Fibonacci(FibonacciDetector::default())
    }
}

impl EntryRule {
    /// Check every leaf. Called once before any run.
    pub fn validate(&self) -> Result<(), RuleError> {
        match self {
            Self::Fibonacci(detector) => detector.validate(),
            Self::RsiBelow { period, threshold } => {
                if *period == 0 {
                    return Err(RuleError::ZeroPeriod("rsi_below"));
                }
                if !(threshold.is_finite() && *threshold > 0.0 && *threshold < 100.0) {
                    return Err(RuleError::ThresholdOutOfRange {
                        rule: "rsi_below",
                        value: *threshold,
                    });
                }
                Ok(())
            }
            Self::MacdBullishCross { fast, slow, signal } => {
                if *fast == 0 || *signal == 0 {
                    return Err(RuleError::ZeroPeriod("macd_bullish_cross"));
                }
                if fast >= slow {
                    return Err(RuleError::MacdPeriods {
                        fast: *fast,
                        slow: *slow,
                    });
                }
                Ok(())
            }
            Self::CandleBullish => Ok(()),
            Self::PatternScore { min_score, .. } => {
                if !(min_score.is_finite() && (0.0..=100.0).contains(min_score)) {
                    return Err(RuleError::ThresholdOutOfRange {
                        rule: "pattern_score",
                        value: *min_score,
                    });
                }
                Ok(())
            }
            Self::All { rules } | Self::Any { rules } => {
                if rules.is_empty() {
                    return Err(RuleError::EmptyCombinator);
                }
                rules.iter().try_for_each(EntryRule::validate)
            }
        }
    }

    /// Human-readable label used in strategy names. Never contains `->`.
    pub fn label(&self) -> String {
        match self {
            Self::Fibonacci(detector) => detector.label(),
            Self::RsiBelow { period, threshold } => format!("RSI{period}<{threshold}"),
            Self::MacdBullishCross { fast, slow, signal } => {
                format!("MACD골든크로스({fast}/{slow}/{signal})")
            }
            Self::CandleBullish => "양봉".to_string(),
            Self::PatternScore { pattern, min_score } => {
                format!("{}>={min_score}", pattern.name())
            }
            Self::All { rules } => join_labels(rules, "+"),
            Self::Any { rules } => format!("({})", join_labels(rules, "|")),
        }
    }

    /// First bar index at which every leaf can produce a meaningful answer.
    pub fn warmup_bars(&self) -> usize {
        match self {
            Self::Fibonacci(detector) => detector.window,
            Self::RsiBelow { period, .. } => *period,
            // The cross compares against the previous bar, so one more bar is needed.
            Self::MacdBullishCross { slow, signal, .. } => slow + signal - 1,
            Self::CandleBullish => 0,
            Self::PatternScore { pattern, .. } => pattern.bars_needed() - 1,
            Self::All { rules } | Self::Any { rules } => {
                rules.iter().map(EntryRule::warmup_bars).max().unwrap_or(0)
            }
        }
    }

    /// Indicators the rule reads. Duplicates are removed by `IndicatorValues::precompute`.
    pub fn required_indicators(&self) -> Vec<Box<dyn Indicator>> {
        let mut out: Vec<Box<dyn Indicator>> = Vec::new();
        self.collect_indicators(&mut out);
        out
    }

    fn collect_indicators(&self, out: &mut Vec<Box<dyn Indicator>>) {
        match self {
            Self::RsiBelow { period, .. } => out.push(Box::new(Rsi::new(*period))),
            Self::MacdBullishCross { fast, slow, signal } => {
                out.push(Box::new(Macd::new(*fast, *slow, *signal, MacdBand::Line)));
                out.push(Box::new(Macd::new(*fast, *slow, *signal, MacdBand::Signal)));
            }
            Self::All { rules } | Self::Any { rules } => {
                for rule in rules {
                    rule.collect_indicators(out);
                }
            }
            Self::Fibonacci(_) | Self::CandleBullish | Self::PatternScore { .. } => {}
        }
    }

    /// Evaluate at `ctx.index`. Indicator values still in warm-up read as false.
    pub fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<EntryMatch> {
        match self {
            Self::Fibonacci(detector) => detector
                .evaluate(ctx.bars, ctx.index)
                .map(|hit| EntryMatch { fib: Some(hit) }),
            Self::RsiBelow { period, threshold } => {
                let rsi = ctx.indicators.get(&Rsi::key(*period), ctx.index)?;
                (rsi < *threshold).then(EntryMatch::default)
            }
            Self::MacdBullishCross { fast, slow, signal } => {
                let prev = ctx.index.checked_sub(1)?;
                let line_key = Macd::key(*fast, *slow, *signal, MacdBand::Line);
                let signal_key = Macd::key(*fast, *slow, *signal, MacdBand::Signal);
                let line_now = ctx.indicators.get(&line_key, ctx.index)?;
                let signal_now = ctx.indicators.get(&signal_key, ctx.index)?;
                let line_prev = ctx.indicators.get(&line_key, prev)?;
                let signal_prev = ctx.indicators.get(&signal_key, prev)?;
                (line_prev <= signal_prev && line_now > signal_now).then(EntryMatch::default)
            }
            Self::CandleBullish => ctx.bar().is_bullish().then(EntryMatch::default),
            Self::PatternScore { pattern, min_score } => {
                (pattern.score(ctx.history()) >= *min_score).then(EntryMatch::default)
            }
            Self::All { rules } => {
                let mut combined = EntryMatch::default();
                for rule in rules {
                    let m = rule.evaluate(ctx)?;
                    combined.fib = combined.fib.or(m.fib);
                }
                Some(combined)
            }
            Self::Any { rules } => {
                let mut combined: Option<EntryMatch> = None;
                for m in rules.iter().filter_map(|rule| rule.evaluate(ctx)) {
                    let c = combined.get_or_insert_with(EntryMatch::default);
                    c.fib = c.fib.or(m.fib);
                }
                combined
            }
        }
    }

    /// First fibonacci leaf, depth-first, that detects a level at `ctx.index`.
    ///
    /// Independent of whether the rule as a whole fires; used for level analytics.
    pub fn fib_detection(&self, ctx: &RuleContext<'_>) -> Option<FibHit> {
        match self {
            Self::Fibonacci(detector) => detector.evaluate(ctx.bars, ctx.index),
            Self::All { rules } | Self::Any { rules } => {
                rules.iter().find_map(|rule| rule.fib_detection(ctx))
            }
            _ => None,
        }
    }
}

fn join_labels(rules: &[EntryRule], sep: &str) -> String {
    rules
        .iter()
        .map(EntryRule::label)
        .collect::<Vec<_>>()
        .join(sep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PriceSeries;
    use chrono::NaiveDate;

    fn bars_from(closes: &[f64]) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        PriceSeries::from_closes("T", start, closes)
            .unwrap()
            .bars()
            .to_vec()
    }

    fn fib(window: usize) -> EntryRule {
        EntryRule::Fibonacci(FibonacciDetector {
            window,
            ..FibonacciDetector::default()
        })
    }

    #[test]
    fn parses_tagged_tree_from_toml() {
        let src = r#"
            type = "all"
            rules = [
                { type = "fibonacci" },
                { type = "rsi_below", threshold = 30.0 },
            ]
        "#;
        let rule: EntryRule = toml::from_str(src).unwrap();
        assert_eq!(
            rule,
            EntryRule::All {
                rules: vec![
                    EntryRule::default(),
                    EntryRule::RsiBelow {
                        period: 14,
                        threshold: 30.0
                    },
                ]
            }
        );
        assert!(rule.validate().is_ok());
        assert_eq!(rule.label(), "피보나치+RSI14<30");
    }

    #[test]
    fn detector_settings_give_distinct_strategy_names() {
        use crate::domain::StrategyParams;

        let default = EntryRule::default();
        let tuned = EntryRule::Fibonacci(FibonacciDetector {
            window: 20,
            tolerance: 0.05,
            ..FibonacciDetector::default()
        });
        let a = StrategyParams::new(0.1, 0.05, None, &default.label()).unwrap();
        let b = StrategyParams::new(0.1, 0.05, None, &tuned.label()).unwrap();
        assert_eq!(a.name(), "전략: 피보나치, 수익률 10%, 손절율 5%, 물타기 없음");
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn unknown_rule_type_is_rejected() {
        let err = toml::from_str::<EntryRule>(r#"type = "rsi_maybe""#);
        assert!(err.is_err());
    }

    #[test]
    fn validation_catches_bad_leaves() {
        let empty = EntryRule::Any { rules: vec![] };
        assert!(matches!(empty.validate(), Err(RuleError::EmptyCombinator)));

        let macd = EntryRule::MacdBullishCross {
            fast: 26,
            slow: 12,
            signal: 9,
        };
        assert!(matches!(macd.validate(), Err(RuleError::MacdPeriods { .. })));

        let nested = EntryRule::All {
            rules: vec![EntryRule::default(), EntryRule::RsiBelow { period: 0, threshold: 30.0 }],
        };
        assert!(matches!(nested.validate(), Err(RuleError::ZeroPeriod(_))));
    }

    #[test]
    fn warmup_is_max_of_leaves() {
        let rule = EntryRule::All {
            rules: vec![
                EntryRule::default(),
                EntryRule::MacdBullishCross {
                    fast: 12,
                    slow: 26,
                    signal: 9,
                },
            ],
        };
        assert_eq!(rule.warmup_bars(), 60);
        assert_eq!(EntryRule::RsiBelow { period: 14, threshold: 30.0 }.warmup_bars(), 14);
        assert_eq!(EntryRule::CandleBullish.warmup_bars(), 0);
    }

    #[test]
    fn all_requires_every_leaf_and_keeps_fib_tag() {
        let bars = bars_from(&[150.0, 50.0, 88.2]);
        let iv = IndicatorValues::new();
        let ctx = RuleContext::new(&bars, 2, &iv);

        let fib_only = fib(2).evaluate(&ctx).unwrap();
        assert_eq!(fib_only.fib.map(|h| h.ratio), Some(0.618));

        // Flat bars are never bullish.
        let both = EntryRule::All {
            rules: vec![fib(2), EntryRule::CandleBullish],
        };
        assert_eq!(both.evaluate(&ctx), None);

        let either = EntryRule::Any {
            rules: vec![EntryRule::CandleBullish, fib(2)],
        };
        assert!(either.evaluate(&ctx).and_then(|m| m.fib).is_some());
    }

    #[test]
    fn any_keeps_fib_tag_behind_an_earlier_match() {
        // Rising close onto the 61.8% level: bullish and a fibonacci hit at once.
        let mut bars = bars_from(&[150.0, 50.0, 88.2]);
        bars[2].open = 80.0;
        bars[2].low = 80.0;
        assert!(bars[2].is_bullish());
        let iv = IndicatorValues::new();
        let ctx = RuleContext::new(&bars, 2, &iv);

        let either = EntryRule::Any {
            rules: vec![EntryRule::CandleBullish, fib(2)],
        };
        let hit = either.evaluate(&ctx).and_then(|m| m.fib);
        assert_eq!(hit.map(|h| h.ratio), Some(0.618));
    }

    #[test]
    fn fib_detection_ignores_other_leaves() {
        let bars = bars_from(&[150.0, 50.0, 88.2]);
        let iv = IndicatorValues::new();
        let ctx = RuleContext::new(&bars, 2, &iv);

        let gated = EntryRule::All {
            rules: vec![
                fib(2),
                EntryRule::RsiBelow {
                    period: 14,
                    threshold: 30.0,
                },
            ],
        };
        assert_eq!(gated.evaluate(&ctx), None);
        assert_eq!(gated.fib_detection(&ctx).map(|h| h.ratio), Some(0.618));
        assert_eq!(EntryRule::CandleBullish.fib_detection(&ctx), None);
    }

    #[test]
    fn rsi_leaf_reads_precomputed_values() {
        let bars = bars_from(&[10.0, 9.0, 8.0, 7.0, 6.0]);
        let rule = EntryRule::RsiBelow {
            period: 3,
            threshold: 30.0,
        };
        let iv = IndicatorValues::precompute(&rule.required_indicators(), &bars);
        // Still warming up at bar 2
        assert_eq!(rule.evaluate(&RuleContext::new(&bars, 2, &iv)), None);
        // All losses → RSI 0
        assert!(rule.evaluate(&RuleContext::new(&bars, 4, &iv)).is_some());
    }

    #[test]
    fn macd_cross_fires_on_turn() {
        // Accelerating decline keeps the line strictly under its signal, then a sharp turn.
        let mut closes: Vec<f64> = (0..30).map(|i| 200.0 - 0.2 * (i * i) as f64).collect();
        closes.extend((1..=10).map(|k| 31.8 + 5.0 * k as f64));
        let bars = bars_from(&closes);
        let rule = EntryRule::MacdBullishCross {
            fast: 3,
            slow: 6,
            signal: 3,
        };
        let iv = IndicatorValues::precompute(&rule.required_indicators(), &bars);
        let fired: Vec<usize> = (0..bars.len())
            .filter(|&i| rule.evaluate(&RuleContext::new(&bars, i, &iv)).is_some())
            .collect();
        assert!(!fired.is_empty());
        assert!(fired.iter().all(|&i| i >= 30), "fired at {fired:?}");
    }
}
