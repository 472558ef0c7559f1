//! Report ledgers — append-only output that doubles as the resume checkpoint.
//!
//! Two formats implement [`ReportSink`]:
//! - [`JsonlLedger`]: one self-describing [`ReportRecord`] per line, keyed by
//!   the stable [`StrategyId`].
//! - [`TextLedger`]: the human-readable `<name> -> ...` line, keyed by the
//!   strategy name before the first `->`.
//!
//! Lines are only ever appended and flushed one at a time. Previously
//! committed lines are never rewritten or truncated.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use retrace_core::domain::StrategyParams;
use retrace_core::fingerprint::StrategyId;
use retrace_core::signals::EntryRule;

use crate::config::ReportFormat;
use crate::metrics::StrategyOutcome;

/// Header written at the top of a new text ledger. Contains no delimiter.
pub const REPORT_HEADER: &str = "--- 자동 생성 백테스팅 최종 보고서 ---";
/// Separates the strategy name from its result on every ledger line.
pub const NAME_DELIMITER: &str = "->";
pub const NO_TRADES_TEXT: &str = "거래 없음 (No Trades Found)";

/// Ledger failures. Fatal: resumability cannot be guaranteed past one.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("encode report record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// `<name> -> 총 수익률: x%, 승률: y%, MDD: z%` or the no-trades sentinel.
pub fn format_report_line(name: &str, outcome: &StrategyOutcome) -> String {
    match outcome {
        StrategyOutcome::Metrics(m) => format!(
            "{name} {NAME_DELIMITER} 총 수익률: {:.2}%, 승률: {:.2}%, MDD: {:.2}%",
            m.total_return_pct, m.win_rate_pct, m.max_drawdown_pct
        ),
        StrategyOutcome::NoTrades => format!("{name} {NAME_DELIMITER} {NO_TRADES_TEXT}"),
    }
}

/// The strategy name of a ledger line: the trimmed text before the first `->`.
pub fn line_resume_key(line: &str) -> Option<&str> {
    line.split_once(NAME_DELIMITER)
        .map(|(name, _)| name.trim())
        .filter(|name| !name.is_empty())
}

/// One committed strategy result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub strategy_id: StrategyId,
    pub name: String,
    pub params: StrategyParams,
    pub rule: EntryRule,
    pub outcome: StrategyOutcome,
    /// Assets that were loaded and simulated without error.
    pub assets_run: usize,
    /// Assets skipped for missing data, short history or simulation errors.
    pub assets_skipped: usize,
    /// The human-readable ledger line for this result.
    pub line: String,
    pub recorded_at: DateTime<Utc>,
}

impl ReportRecord {
    pub fn new(
        params: &StrategyParams,
        rule: &EntryRule,
        outcome: StrategyOutcome,
        assets_run: usize,
        assets_skipped: usize,
    ) -> Self {
        Self {
            strategy_id: StrategyId::of(params, rule),
            name: params.name().to_string(),
            params: params.clone(),
            rule: rule.clone(),
            line: format_report_line(params.name(), &outcome),
            outcome,
            assets_run,
            assets_skipped,
            recorded_at: Utc::now(),
        }
    }
}

/// Append-only sink for strategy results, readable back as a completed set.
pub trait ReportSink: Send {
    /// Resume keys of every strategy already committed.
    fn completed(&self) -> Result<HashSet<String>, ReportError>;

    /// The key a strategy is matched under in [`ReportSink::completed`].
    fn resume_key(&self, id: &StrategyId, name: &str) -> String;

    /// Append one record and flush it to disk.
    fn append(&mut self, record: &ReportRecord) -> Result<(), ReportError>;

    fn path(&self) -> &Path;
}

/// Open the ledger for `format`, creating parent directories as needed.
pub fn open_ledger(path: &Path, format: ReportFormat) -> Result<Box<dyn ReportSink>, ReportError> {
    Ok(match format {
        ReportFormat::Jsonl => Box::new(JsonlLedger::open(path)?),
        ReportFormat::Text => Box::new(TextLedger::open(path)?),
    })
}

// ─── JSONL ──────────────────────────────────────────────────────────

pub struct JsonlLedger {
    path: PathBuf,
}

impl JsonlLedger {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ReportError> {
        let path = path.into();
        ensure_parent(&path)?;
        Ok(Self { path })
    }

    /// Every parseable record, in file order. Malformed lines are skipped.
    pub fn read_all(&self) -> Result<Vec<ReportRecord>, ReportError> {
        Ok(read_lines(&self.path)?
            .iter()
            .filter_map(|line| parse_record(line))
            .collect())
    }
}

impl ReportSink for JsonlLedger {
    fn completed(&self) -> Result<HashSet<String>, ReportError> {
        Ok(self
            .read_all()?
            .into_iter()
            .map(|record| record.strategy_id.0)
            .collect())
    }

    fn resume_key(&self, id: &StrategyId, _name: &str) -> String {
        id.0.clone()
    }

    fn append(&mut self, record: &ReportRecord) -> Result<(), ReportError> {
        let json = serde_json::to_string(record)?;
        append_line(&self.path, &json)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse one JSONL line, or `None` for blank and malformed lines.
pub fn parse_record(line: &str) -> Option<ReportRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(record) => Some(record),
        Err(e) => {
            debug!(error = %e, "skipping malformed ledger line");
            None
        }
    }
}

// ─── Text ───────────────────────────────────────────────────────────

pub struct TextLedger {
    path: PathBuf,
}

impl TextLedger {
    /// Open the ledger, writing the header if the file is new or empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ReportError> {
        let path = path.into();
        ensure_parent(&path)?;
        let is_empty = match fs::metadata(&path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(source) => return Err(ReportError::Io { path, source }),
        };
        if is_empty {
            append_line(&path, REPORT_HEADER)?;
        }
        Ok(Self { path })
    }
}

impl ReportSink for TextLedger {
    fn completed(&self) -> Result<HashSet<String>, ReportError> {
        Ok(read_lines(&self.path)?
            .iter()
            .filter_map(|line| line_resume_key(line))
            .map(str::to_string)
            .collect())
    }

    fn resume_key(&self, _id: &StrategyId, name: &str) -> String {
        name.trim().to_string()
    }

    fn append(&mut self, record: &ReportRecord) -> Result<(), ReportError> {
        append_line(&self.path, &record.line)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ReportError + '_ {
    move |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn ensure_parent(path: &Path) -> Result<(), ReportError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(io_error(path))
        }
        _ => Ok(()),
    }
}

/// Append one line with a single write.
///
/// A torn final line left by an interrupted write is terminated first, so the
/// new line never merges into the fragment.
fn append_line(path: &Path, line: &str) -> Result<(), ReportError> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(io_error(path))?;
    let mut buf = String::with_capacity(line.len() + 2);
    if !ends_with_newline(&mut file).map_err(io_error(path))? {
        debug!(path = %path.display(), "terminating torn final ledger line");
        buf.push('\n');
    }
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes()).map_err(io_error(path))?;
    file.flush().map_err(io_error(path))
}

/// True for an empty file or one whose last byte is `\n`.
fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// All lines of a ledger; a missing file has none.
pub(crate) fn read_lines(path: &Path) -> Result<Vec<String>, ReportError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ReportError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    BufReader::new(file)
        .lines()
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error(path))
}
