//! Retrace Runner — strategy sweeps, metrics, report ledgers and data loading.
//!
//! This crate builds on `retrace-core` to provide:
//! - CSV series loading and asset universe resolution
//! - Single-backtest runner with metrics
//! - Performance aggregation (return, win rate, drawdown)
//! - Append-only report ledgers (JSONL and text) used as resume checkpoints
//! - The resumable, parallel strategy sweep driver
//! - Fibonacci level analysis and ledger ranking

pub mod analysis;
pub mod config;
pub mod data_loader;
pub mod metrics;
pub mod report;
pub mod runner;
pub mod sweep;

pub use analysis::{rank_ledger, write_fib_analysis, LedgerRanking, RankedStrategy};
pub use config::{ConfigError, ReportFormat, SweepConfig};
pub use data_loader::{
    AssetUniverse, CsvSeriesLoader, DirectoryUniverse, FileUniverse, LoadError, SeriesLoader,
    StaticUniverse, UniverseError,
};
pub use metrics::{aggregate, AggregateMetrics, RunResult, StrategyOutcome};
pub use report::{open_ledger, JsonlLedger, ReportError, ReportRecord, ReportSink, TextLedger};
pub use runner::{run_single, RunError, SingleRun};
pub use sweep::{ParamGrid, SweepDriver, SweepError, SweepSummary};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn run_result_is_send_sync() {
        assert_send::<RunResult>();
        assert_sync::<RunResult>();
    }

    #[test]
    fn loaders_are_send_sync() {
        assert_send::<CsvSeriesLoader>();
        assert_sync::<CsvSeriesLoader>();
        assert_send::<DirectoryUniverse>();
        assert_sync::<DirectoryUniverse>();
    }

    #[test]
    fn ledgers_are_send() {
        assert_send::<JsonlLedger>();
        assert_send::<TextLedger>();
        assert_send::<ReportRecord>();
    }

    #[test]
    fn sweep_config_is_send_sync() {
        assert_send::<SweepConfig>();
        assert_sync::<SweepConfig>();
    }

    #[test]
    fn sweep_driver_is_sync() {
        assert_sync::<SweepDriver<'static>>();
    }
}
