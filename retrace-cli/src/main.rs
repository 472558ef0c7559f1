//! Retrace CLI — sweep, single-run and ranking commands.
//!
//! Commands:
//! - `sweep` — run every strategy of a TOML config over the asset universe,
//!   resuming from the report ledger
//! - `run` — one strategy on one asset, with the per-trade log
//! - `rank` — order the strategies of a ledger by total return
//!
//! Logs go to stderr (`RUST_LOG` overrides the `info` default); results go to stdout.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use retrace_core::domain::{StrategyParams, MIN_RUN_BARS};
use retrace_core::engine::EngineConfig;
use retrace_core::signals::EntryRule;
use retrace_runner::{
    open_ledger, rank_ledger, run_single, write_fib_analysis, AssetUniverse, CsvSeriesLoader,
    DirectoryUniverse, FileUniverse, SingleRun, SweepConfig, SweepDriver, SweepSummary,
};

/// Set by the Ctrl-C handler; the sweep stops before the next strategy or asset.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(
    name = "retrace",
    about = "Retrace — fibonacci retracement strategy sweep engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every strategy of the config's parameter grid over the universe.
    Sweep {
        /// Path to the sweep TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Worker threads for the asset loop (0 = one per CPU). Overrides the config.
        #[arg(long)]
        workers: Option<usize>,

        /// Report ledger path. Overrides the config.
        #[arg(long)]
        report: Option<PathBuf>,

        /// Report format: jsonl or text. Overrides the config.
        #[arg(long)]
        format: Option<String>,
    },
    /// Run one strategy on one asset and print the result and trades.
    Run {
        /// Asset identifier (the CSV file stem).
        #[arg(long)]
        asset: String,

        /// Sweep config supplying data directory, entry rule and engine settings.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory when no config is given.
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Profit target as a ratio (0.1 = 10%).
        #[arg(long)]
        profit_target: f64,

        /// Stop loss as a ratio (0.05 = 5%).
        #[arg(long)]
        stop_loss: f64,

        /// Averaging threshold as a ratio. Omit to disable averaging.
        #[arg(long)]
        dca: Option<f64>,

        /// Print the raw run output as JSON instead of the summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Rank the strategies of a report ledger by total return.
    Rank {
        /// Ledger file (jsonl or text).
        ledger: PathBuf,

        /// Show only the best N strategies.
        #[arg(long)]
        top: Option<usize>,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Sweep {
            config,
            workers,
            report,
            format,
        } => run_sweep(&config, workers, report, format),
        Commands::Run {
            asset,
            config,
            data_dir,
            profit_target,
            stop_loss,
            dca,
            json,
        } => run_one(&asset, config, data_dir, profit_target, stop_loss, dca, json),
        Commands::Rank { ledger, top } => run_rank(&ledger, top),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<SweepConfig> {
    SweepConfig::from_file(path).with_context(|| format!("loading config {}", path.display()))
}

fn run_sweep(
    config_path: &Path,
    workers: Option<usize>,
    report: Option<PathBuf>,
    format: Option<String>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(workers) = workers {
        config.execution.workers = workers;
    }
    if let Some(report) = report {
        config.paths.report_file = report;
    }
    if let Some(format) = format {
        config.report.format = format.parse()?;
    }
    config.validate().context("invalid sweep config")?;
    let grid = config.param_grid()?;

    let loader = CsvSeriesLoader::new(&config.paths.data_dir);
    let universe: Box<dyn AssetUniverse> = match &config.paths.universe_file {
        Some(path) => Box::new(FileUniverse::new(path)),
        None => Box::new(DirectoryUniverse::new(&config.paths.data_dir)),
    };
    let mut ledger = open_ledger(&config.paths.report_file, config.report.format)
        .with_context(|| format!("opening report {}", config.paths.report_file.display()))?;

    ctrlc::set_handler(|| {
        INTERRUPTED.store(true, Ordering::Relaxed);
    })
    .context("installing Ctrl-C handler")?;

    let driver = SweepDriver::new(
        &loader,
        universe.as_ref(),
        config.entry_rule(),
        config.engine_config(),
    )
    .with_min_bars(config.backtest.min_bars)
    .with_workers(config.execution.workers);

    let summary = driver.run(&grid, ledger.as_mut(), Some(&INTERRUPTED))?;

    if let Some(path) = &config.paths.fib_analysis_file {
        write_fib_analysis(path, &summary.fib_hits)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    print_sweep_summary(&summary, ledger.path());
    if summary.cancelled {
        warn!("interrupted; rerun the same command to resume");
    }
    Ok(())
}

fn run_one(
    asset: &str,
    config_path: Option<PathBuf>,
    data_dir: PathBuf,
    profit_target: f64,
    stop_loss: f64,
    dca: Option<f64>,
    json: bool,
) -> Result<()> {
    let (data_dir, rule, engine, min_bars) = match config_path {
        Some(path) => {
            let config = load_config(&path)?;
            config.validate().context("invalid sweep config")?;
            (
                config.paths.data_dir.clone(),
                config.entry_rule(),
                config.engine_config(),
                config.backtest.min_bars,
            )
        }
        None => (data_dir, EntryRule::default(), EngineConfig::default(), MIN_RUN_BARS),
    };
    rule.validate()?;
    let params = StrategyParams::new(profit_target, stop_loss, dca, &rule.label())?;

    let loader = CsvSeriesLoader::new(&data_dir);
    let run = run_single(&loader, asset, &params, &rule, &engine, min_bars)?;
    info!(asset, strategy = params.name(), "run complete");

    if json {
        println!("{}", serde_json::to_string_pretty(&run.output)?);
    } else {
        print_run(&params, &run);
    }
    Ok(())
}

fn run_rank(ledger: &Path, top: Option<usize>) -> Result<()> {
    if !ledger.exists() {
        bail!("ledger not found: {}", ledger.display());
    }
    let ranking = rank_ledger(ledger, top)?;
    if ranking.ranked.is_empty() {
        println!("No strategies with results in {}", ledger.display());
    } else {
        println!();
        println!("--- 백테스팅 전략 순위 (총 수익률 기준) ---");
        println!("{:>4}  {:>9}  {:>8}  {:>8}  전략", "#", "총 수익률", "승률", "MDD");
        for (i, r) in ranking.ranked.iter().enumerate() {
            println!(
                "{:>4}  {:>8.2}%  {:>7.2}%  {:>7.2}%  {}",
                i + 1,
                r.total_return_pct,
                r.win_rate_pct,
                r.max_drawdown_pct,
                r.name
            );
        }
    }
    println!("No-trade strategies: {}", ranking.no_trades);
    println!();
    Ok(())
}

fn print_sweep_summary(summary: &SweepSummary, report: &Path) {
    println!();
    println!("=== Sweep Summary ===");
    println!("Strategies:     {}", summary.total_strategies);
    println!("Executed:       {}", summary.executed);
    println!("Skipped:        {} (already in ledger)", summary.skipped);
    println!("Assets:         {}", summary.asset_count);
    println!("Elapsed:        {:.1}s", summary.elapsed.as_secs_f64());
    println!("Report:         {}", report.display());
    if !summary.fib_hits.is_empty() {
        println!();
        println!("--- Fibonacci Detections ---");
        for (level, count) in retrace_runner::analysis::sorted_fib_counts(&summary.fib_hits) {
            println!("{level:<15} {count}");
        }
    }
    if summary.cancelled {
        println!();
        println!("INTERRUPTED: partial sweep, committed results are intact");
    }
    println!();
}

fn print_run(params: &StrategyParams, run: &SingleRun) {
    let result = &run.result;
    let output = &run.output;
    println!();
    println!("=== Backtest Result ===");
    println!("Strategy:       {}", params.name());
    println!("Asset:          {}", result.asset);
    println!(
        "Bars:           {} ({} warmup)",
        output.warmup + output.capital_history.len() - 1,
        output.warmup
    );
    println!("Trades:         {}", result.trade_count);
    println!();
    println!("--- Performance ---");
    if result.has_trades() {
        println!("Total Return:   {:.2}%", result.total_return_pct);
        println!("Win Rate:       {:.2}%", result.win_rate_pct);
    } else {
        println!("Total Return:   {:.2}% (no closed trades)", result.total_return_pct);
        println!("Win Rate:       n/a");
    }
    println!("Max Drawdown:   {:.2}%", result.max_drawdown_pct);
    println!("Final Capital:  {:.0}", result.final_capital);

    if !output.trades.is_empty() {
        println!();
        println!("--- Trades ---");
        for t in &output.trades {
            println!(
                "{} -> {}  {:>10.2} -> {:>10.2}  qty {:>8}  {:>+7.2}%  {:?}{}",
                t.entry_date,
                t.exit_date,
                t.entry_price,
                t.exit_price,
                t.quantity,
                t.profit_rate * 100.0,
                t.outcome,
                if t.averaged { "  (averaged)" } else { "" }
            );
        }
    }
    println!();
}
