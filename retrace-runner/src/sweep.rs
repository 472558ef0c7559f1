//! Strategy sweep — cross-product enumeration, per-asset fan-out, resumable
//! checkpointing through the report ledger.
//!
//! For each strategy in enumeration order:
//! 1. Skip it if the ledger already holds its resume key
//! 2. Run it over every asset of the universe on a bounded rayon pool
//! 3. Reduce the per-asset results (collected in universe order) to a mean
//! 4. Append one record to the ledger and flush
//!
//! Cancellation is cooperative. A strategy interrupted mid-way is dropped
//! without writing, so the ledger only ever holds complete results.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use retrace_core::domain::{ParamsError, StrategyParams, MIN_RUN_BARS};
use retrace_core::engine::EngineConfig;
use retrace_core::fingerprint::StrategyId;
use retrace_core::signals::EntryRule;

use crate::config::ConfigError;
use crate::data_loader::{AssetUniverse, LoadError, SeriesLoader, UniverseError};
use crate::metrics::{aggregate, RunResult, StrategyOutcome};
use crate::report::{ReportError, ReportRecord, ReportSink};
use crate::runner::{run_single, RunError};

/// Assets between two progress log lines within one strategy.
const PROGRESS_EVERY: usize = 200;

/// Fatal sweep errors. Per-asset problems never surface here.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Params(#[from] ParamsError),

    #[error(transparent)]
    Universe(#[from] UniverseError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

// ─── Parameter grid ─────────────────────────────────────────────────

/// Cross-product of profit targets × stop losses × averaging options.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGrid {
    pub profit_targets: Vec<f64>,
    pub stop_losses: Vec<f64>,
    /// `None` disables averaging for that combination.
    pub dca_options: Vec<Option<f64>>,
}

impl ParamGrid {
    pub fn new(
        profit_targets: Vec<f64>,
        stop_losses: Vec<f64>,
        dca_options: Vec<Option<f64>>,
    ) -> Self {
        Self {
            profit_targets,
            stop_losses,
            dca_options,
        }
    }

    pub fn size(&self) -> usize {
        self.profit_targets.len() * self.stop_losses.len() * self.dca_options.len()
    }

    /// Every combination, profit target outermost and averaging innermost.
    pub fn strategies(&self, rule_label: &str) -> Result<Vec<StrategyParams>, ParamsError> {
        let mut out = Vec::with_capacity(self.size());
        for &pt in &self.profit_targets {
            for &sl in &self.stop_losses {
                for &dca in &self.dca_options {
                    out.push(StrategyParams::new(pt, sl, dca, rule_label)?);
                }
            }
        }
        Ok(out)
    }
}

// ─── Results ────────────────────────────────────────────────────────

/// One strategy evaluated across the universe.
#[derive(Debug, Clone)]
pub struct StrategyRun {
    pub outcome: StrategyOutcome,
    /// Results of every simulated asset, traded or not, in universe order.
    pub results: Vec<RunResult>,
    pub assets_skipped: usize,
    pub fib_hits: BTreeMap<String, usize>,
}

/// What a sweep session did.
#[derive(Debug, Clone, Default)]
pub struct SweepSummary {
    pub total_strategies: usize,
    /// Already in the ledger before this session (or duplicated in the grid).
    pub skipped: usize,
    /// Executed and committed this session.
    pub executed: usize,
    pub cancelled: bool,
    pub asset_count: usize,
    /// Fibonacci level label → detections, summed over every run of the session.
    pub fib_hits: BTreeMap<String, usize>,
    pub elapsed: Duration,
}

enum AssetRun {
    Done(RunResult, BTreeMap<String, usize>),
    Skipped,
    Cancelled,
}

// ─── Driver ─────────────────────────────────────────────────────────

pub struct SweepDriver<'a> {
    loader: &'a dyn SeriesLoader,
    universe: &'a dyn AssetUniverse,
    rule: EntryRule,
    engine: EngineConfig,
    min_bars: usize,
    workers: usize,
}

impl<'a> SweepDriver<'a> {
    pub fn new(
        loader: &'a dyn SeriesLoader,
        universe: &'a dyn AssetUniverse,
        rule: EntryRule,
        engine: EngineConfig,
    ) -> Self {
        Self {
            loader,
            universe,
            rule,
            engine,
            min_bars: MIN_RUN_BARS,
            workers: 0,
        }
    }

    pub fn with_min_bars(mut self, min_bars: usize) -> Self {
        self.min_bars = min_bars;
        self
    }

    /// Worker threads for the asset loop; 0 lets rayon pick one per CPU.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Run every strategy of `grid` not yet present in `sink`.
    pub fn run(
        &self,
        grid: &ParamGrid,
        sink: &mut dyn ReportSink,
        cancel: Option<&AtomicBool>,
    ) -> Result<SweepSummary, SweepError> {
        let start = Instant::now();
        self.engine.validate().map_err(ConfigError::from)?;
        self.rule.validate().map_err(ConfigError::from)?;

        let strategies = grid.strategies(&self.rule.label())?;
        let assets = self.universe.assets()?;
        let mut completed = sink.completed()?;
        info!(
            strategies = strategies.len(),
            completed = completed.len(),
            assets = assets.len(),
            "starting sweep"
        );

        let mut summary = SweepSummary {
            total_strategies: strategies.len(),
            asset_count: assets.len(),
            ..SweepSummary::default()
        };

        // Keys are claimed as they are seen, so a value listed twice in the grid runs once.
        let mut pending = Vec::new();
        for (index, params) in strategies.iter().enumerate() {
            let key = sink.resume_key(&StrategyId::of(params, &self.rule), params.name());
            if completed.insert(key) {
                pending.push((index, params));
            } else {
                info!(strategy = params.name(), "already completed, skipping");
                summary.skipped += 1;
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()?;

        let session_start = Instant::now();
        for &(index, params) in &pending {
            if is_cancelled(cancel) {
                summary.cancelled = true;
                break;
            }
            info!(
                "[{}/{}] {}",
                index + 1,
                summary.total_strategies,
                params.name()
            );

            let Some(run) = pool.install(|| self.run_strategy(params, &assets, cancel)) else {
                warn!(strategy = params.name(), "interrupted, result discarded");
                summary.cancelled = true;
                break;
            };

            let record = ReportRecord::new(
                params,
                &self.rule,
                run.outcome,
                run.results.len(),
                run.assets_skipped,
            );
            sink.append(&record)?;
            summary.executed += 1;
            for (level, count) in run.fib_hits {
                *summary.fib_hits.entry(level).or_default() += count;
            }

            let remaining = pending.len() - summary.executed;
            let eta = estimate_eta(session_start.elapsed(), summary.executed, remaining);
            info!(
                remaining,
                eta = %format_duration(eta),
                "{}",
                record.line
            );
        }

        summary.elapsed = start.elapsed();
        if summary.cancelled {
            warn!(executed = summary.executed, "sweep cancelled");
        } else {
            info!(
                executed = summary.executed,
                skipped = summary.skipped,
                elapsed = %format_duration(summary.elapsed),
                "sweep complete"
            );
        }
        Ok(summary)
    }

    /// Run one strategy over `assets`. `None` when cancelled part-way.
    pub fn run_strategy(
        &self,
        params: &StrategyParams,
        assets: &[String],
        cancel: Option<&AtomicBool>,
    ) -> Option<StrategyRun> {
        let done = AtomicUsize::new(0);
        let runs: Vec<AssetRun> = assets
            .par_iter()
            .map(|asset| {
                if is_cancelled(cancel) {
                    return AssetRun::Cancelled;
                }
                let run = self.run_asset(params, asset);
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                if n % PROGRESS_EVERY == 0 {
                    info!(strategy = params.name(), "{n}/{} assets", assets.len());
                }
                run
            })
            .collect();

        let mut results = Vec::with_capacity(runs.len());
        let mut fib_hits = BTreeMap::new();
        let mut assets_skipped = 0;
        for run in runs {
            match run {
                AssetRun::Done(result, hits) => {
                    results.push(result);
                    for (level, count) in hits {
                        *fib_hits.entry(level).or_default() += count;
                    }
                }
                AssetRun::Skipped => assets_skipped += 1,
                AssetRun::Cancelled => return None,
            }
        }
        if is_cancelled(cancel) {
            return None;
        }

        Some(StrategyRun {
            outcome: aggregate(&results),
            results,
            assets_skipped,
            fib_hits,
        })
    }

    fn run_asset(&self, params: &StrategyParams, asset: &str) -> AssetRun {
        match run_single(
            self.loader,
            asset,
            params,
            &self.rule,
            &self.engine,
            self.min_bars,
        ) {
            Ok(run) => AssetRun::Done(run.result, run.output.fib_hits),
            Err(RunError::Load(e @ LoadError::TooShort { .. })) => {
                debug!(asset, error = %e, "skipping asset");
                AssetRun::Skipped
            }
            Err(RunError::Load(e)) => {
                warn!(asset, error = %e, "failed to load series, skipping asset");
                AssetRun::Skipped
            }
            Err(e @ RunError::Engine(_)) => {
                warn!(asset, strategy = params.name(), error = %e, "skipping asset");
                AssetRun::Skipped
            }
        }
    }
}

fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
}

// ─── Progress ───────────────────────────────────────────────────────

/// Linear extrapolation: `elapsed / done * remaining`. Zero before anything is done.
pub fn estimate_eta(elapsed: Duration, done: usize, remaining: usize) -> Duration {
    if done == 0 {
        return Duration::ZERO;
    }
    elapsed.mul_f64(remaining as f64 / done as f64)
}

/// `H:MM:SS`, hours unbounded.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrace_core::domain::DEFAULT_RULE_LABEL;

    #[test]
    fn grid_order_is_pt_sl_dca() {
        let grid = ParamGrid::new(vec![0.1, 0.2], vec![0.05], vec![None, Some(0.03)]);
        let names: Vec<String> = grid
            .strategies(DEFAULT_RULE_LABEL)
            .unwrap()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(grid.size(), 4);
        assert_eq!(
            names,
            vec![
                "전략: 피보나치, 수익률 10%, 손절율 5%, 물타기 없음",
                "전략: 피보나치, 수익률 10%, 손절율 5%, 물타기 3%",
                "전략: 피보나치, 수익률 20%, 손절율 5%, 물타기 없음",
                "전략: 피보나치, 수익률 20%, 손절율 5%, 물타기 3%",
            ]
        );
    }

    #[test]
    fn grid_rejects_bad_ratio() {
        let grid = ParamGrid::new(vec![0.1], vec![0.0], vec![None]);
        assert!(grid.strategies(DEFAULT_RULE_LABEL).is_err());
    }

    #[test]
    fn eta_is_linear() {
        let eta = estimate_eta(Duration::from_secs(100), 4, 6);
        assert_eq!(eta, Duration::from_secs(150));
        assert_eq!(estimate_eta(Duration::from_secs(100), 0, 6), Duration::ZERO);
        assert_eq!(estimate_eta(Duration::from_secs(100), 5, 0), Duration::ZERO);
    }

    #[test]
    fn duration_formats_as_clock() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00:00");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "1:02:05");
        assert_eq!(format_duration(Duration::from_secs(90_061)), "25:01:01");
    }
}
