//! Sweep configuration — TOML file parsed with serde and validated up front.
//!
//! Every malformed or out-of-range value becomes a [`ConfigError`] before any
//! backtest runs. Parameter lists are comma-separated strings, with `none`
//! allowed in `dca_options` to disable averaging for that combination.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use retrace_core::domain::{ParamsError, MIN_RUN_BARS};
use retrace_core::engine::{EngineConfig, EngineError, DEFAULT_FEE_RATE, DEFAULT_INITIAL_CAPITAL};
use retrace_core::signals::{EntryRule, FibonacciDetector, RuleError};

use crate::sweep::ParamGrid;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{field}: cannot parse {token:?} as a ratio")]
    BadRatio { field: &'static str, token: String },

    #[error("{0} must list at least one value")]
    EmptyList(&'static str),

    #[error("backtest.min_bars must be >= 1")]
    ZeroMinBars,

    #[error("unknown report format {0:?} (expected \"jsonl\" or \"text\")")]
    UnknownFormat(String),

    #[error(transparent)]
    Params(#[from] ParamsError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Top-level sweep configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub paths: PathsConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    pub strategy_params: StrategyParamsConfig,
    /// Explicit entry rule. When absent the fibonacci detector alone is used,
    /// with the settings of the `[fibonacci]` section.
    #[serde(default)]
    pub entry_rule: Option<EntryRule>,
    #[serde(default)]
    pub fibonacci: FibonacciDetector,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding one `<asset>.csv` per asset.
    pub data_dir: PathBuf,
    pub report_file: PathBuf,
    #[serde(default)]
    pub fib_analysis_file: Option<PathBuf>,
    /// TOML asset list; when absent every CSV in `data_dir` is used.
    #[serde(default)]
    pub universe_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub fee_rate: f64,
    /// Series shorter than this are skipped.
    pub min_bars: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            fee_rate: DEFAULT_FEE_RATE,
            min_bars: MIN_RUN_BARS,
        }
    }
}

impl BacktestConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(self.initial_capital, self.fee_rate)
    }
}

/// Comma-separated ratio lists, e.g. `profit_targets = "0.05, 0.10"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParamsConfig {
    pub profit_targets: String,
    pub stop_losses: String,
    pub dca_options: String,
}

impl StrategyParamsConfig {
    pub fn param_grid(&self) -> Result<ParamGrid, ConfigError> {
        Ok(ParamGrid::new(
            parse_ratio_list("profit_targets", &self.profit_targets)?,
            parse_ratio_list("stop_losses", &self.stop_losses)?,
            parse_dca_list(&self.dca_options)?,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Jsonl,
    Text,
}

impl FromStr for ReportFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jsonl" => Ok(Self::Jsonl),
            "text" | "txt" => Ok(Self::Text),
            _ => Err(ConfigError::UnknownFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jsonl => f.write_str("jsonl"),
            Self::Text => f.write_str("text"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub format: ReportFormat,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Worker threads for the per-asset loop; 0 means one per CPU.
    pub workers: usize,
}

impl SweepConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// The rule every strategy of the sweep enters with.
    pub fn entry_rule(&self) -> EntryRule {
        self.entry_rule
            .clone()
            .unwrap_or_else(|| EntryRule::Fibonacci(self.fibonacci.clone()))
    }

    pub fn engine_config(&self) -> EngineConfig {
        self.backtest.engine_config()
    }

    pub fn param_grid(&self) -> Result<ParamGrid, ConfigError> {
        self.strategy_params.param_grid()
    }

    /// Check everything a sweep needs before the first run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine_config().validate()?;
        if self.backtest.min_bars == 0 {
            return Err(ConfigError::ZeroMinBars);
        }
        let rule = self.entry_rule();
        rule.validate()?;
        // Building every strategy checks each ratio and the rule label.
        self.param_grid()?.strategies(&rule.label())?;
        Ok(())
    }
}

// ─── List parsing ───────────────────────────────────────────────────

/// Parse `"0.05, 0.1"` into ratios. Empty tokens are rejected.
pub fn parse_ratio_list(field: &'static str, raw: &str) -> Result<Vec<f64>, ConfigError> {
    let values = raw
        .split(',')
        .map(|token| parse_ratio(field, token))
        .collect::<Result<Vec<_>, _>>()?;
    if values.is_empty() {
        return Err(ConfigError::EmptyList(field));
    }
    Ok(values)
}

/// Like [`parse_ratio_list`], with `none` (any case) mapping to no averaging.
pub fn parse_dca_list(raw: &str) -> Result<Vec<Option<f64>>, ConfigError> {
    raw.split(',')
        .map(|token| {
            if token.trim().eq_ignore_ascii_case("none") {
                Ok(None)
            } else {
                parse_ratio("dca_options", token).map(Some)
            }
        })
        .collect()
}

fn parse_ratio(field: &'static str, token: &str) -> Result<f64, ConfigError> {
    let token = token.trim();
    token.parse::<f64>().map_err(|_| ConfigError::BadRatio {
        field,
        token: token.to_string(),
    })
}
