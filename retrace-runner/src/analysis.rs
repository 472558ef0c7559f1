//! Post-sweep analysis: fibonacci level counts and ledger ranking.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::metrics::StrategyOutcome;
use crate::report::{parse_record, read_lines, ReportError, NAME_DELIMITER, NO_TRADES_TEXT};

pub const FIB_ANALYSIS_HEADER: &str = "--- 피보나치 되돌림 레벨 탐지 횟수 분석 ---";

/// Level counts, most frequent first (ties by label).
pub fn sorted_fib_counts(counts: &BTreeMap<String, usize>) -> Vec<(&str, usize)> {
    let mut sorted: Vec<(&str, usize)> = counts.iter().map(|(k, &v)| (k.as_str(), v)).collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    sorted
}

/// Write the level analysis, replacing any previous file.
///
/// Returns `false` without touching the file when nothing was detected.
pub fn write_fib_analysis(path: &Path, counts: &BTreeMap<String, usize>) -> Result<bool, ReportError> {
    if counts.values().all(|&c| c == 0) {
        info!("no fibonacci detections recorded, skipping analysis file");
        return Ok(false);
    }
    let io_err = |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut out = String::new();
    out.push_str(FIB_ANALYSIS_HEADER);
    out.push('\n');
    for (level, count) in sorted_fib_counts(counts) {
        out.push_str(&format!("• {level}: {count}회 탐지\n"));
    }
    out.push('\n');

    let mut file = fs::File::create(path).map_err(io_err)?;
    file.write_all(out.as_bytes()).map_err(io_err)?;
    file.flush().map_err(io_err)?;
    info!(path = %path.display(), "fibonacci analysis written");
    Ok(true)
}

// ─── Ledger ranking ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedStrategy {
    pub name: String,
    pub total_return_pct: f64,
    pub win_rate_pct: f64,
    pub max_drawdown_pct: f64,
}

/// Parsed content of a ledger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerRanking {
    /// Strategies with metrics, best total return first.
    pub ranked: Vec<RankedStrategy>,
    pub no_trades: usize,
}

/// A ledger line of either format, reduced to name and optional metrics.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerLine {
    Metrics(RankedStrategy),
    NoTrades(String),
}

impl LedgerLine {
    pub fn name(&self) -> &str {
        match self {
            Self::Metrics(r) => &r.name,
            Self::NoTrades(name) => name,
        }
    }
}

/// Parse a text ledger line. Headers and unrecognised lines give `None`.
pub fn parse_text_line(line: &str) -> Option<LedgerLine> {
    let (name, rest) = line.split_once(NAME_DELIMITER)?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let rest = rest.trim();
    if rest == NO_TRADES_TEXT {
        return Some(LedgerLine::NoTrades(name.to_string()));
    }

    let mut fields = BTreeMap::new();
    for part in rest.split(',') {
        let (key, value) = part.split_once(':')?;
        let value = value.trim().strip_suffix('%')?.trim().parse::<f64>().ok()?;
        fields.insert(key.trim(), value);
    }
    Some(LedgerLine::Metrics(RankedStrategy {
        name: name.to_string(),
        total_return_pct: *fields.get("총 수익률")?,
        win_rate_pct: *fields.get("승률")?,
        max_drawdown_pct: *fields.get("MDD")?,
    }))
}

/// Parse a line of either ledger format.
pub fn parse_ledger_line(line: &str) -> Option<LedgerLine> {
    let trimmed = line.trim();
    if trimmed.starts_with('{') {
        let record = parse_record(trimmed)?;
        return Some(match record.outcome {
            StrategyOutcome::Metrics(m) => LedgerLine::Metrics(RankedStrategy {
                name: record.name,
                total_return_pct: m.total_return_pct,
                win_rate_pct: m.win_rate_pct,
                max_drawdown_pct: m.max_drawdown_pct,
            }),
            StrategyOutcome::NoTrades => LedgerLine::NoTrades(record.name),
        });
    }
    parse_text_line(trimmed)
}

/// Rank every strategy of a ledger by total return (descending, ties by name).
///
/// A strategy appearing more than once counts at its first occurrence.
pub fn rank_ledger(path: &Path, top: Option<usize>) -> Result<LedgerRanking, ReportError> {
    let mut seen = HashSet::new();
    let mut ranking = LedgerRanking::default();
    for line in read_lines(path)? {
        let Some(entry) = parse_ledger_line(&line) else {
            continue;
        };
        if !seen.insert(entry.name().to_string()) {
            continue;
        }
        match entry {
            LedgerLine::Metrics(r) => ranking.ranked.push(r),
            LedgerLine::NoTrades(_) => ranking.no_trades += 1,
        }
    }
    ranking.ranked.sort_by(|a, b| {
        b.total_return_pct
            .total_cmp(&a.total_return_pct)
            .then_with(|| a.name.cmp(&b.name))
    });
    if let Some(n) = top {
        ranking.ranked.truncate(n);
    }
    Ok(ranking)
}
