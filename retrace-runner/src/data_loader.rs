//! Price series loading and asset universe resolution.
//!
//! Both are collaborator traits so the sweep never depends on where data
//! lives. The shipped implementations read one `<asset>.csv` per asset from
//! a data directory, and the universe either from a TOML file or from the
//! CSV files present in that directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use retrace_core::domain::{AssetId, Bar, PriceSeries, SeriesError};

/// Per-asset data problems. Always recoverable: the asset is skipped.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{asset}: no series file at {}", path.display())]
    NotFound { asset: String, path: PathBuf },

    #[error("{asset}: failed to read series: {source}")]
    Csv {
        asset: String,
        #[source]
        source: csv::Error,
    },

    #[error("{asset}: invalid series: {source}")]
    Invalid {
        asset: String,
        #[source]
        source: SeriesError,
    },

    #[error("{asset}: {len} bars, at least {min} required")]
    TooShort { asset: String, len: usize, min: usize },
}

/// Errors resolving the asset universe. Fatal for a sweep.
#[derive(Debug, Error)]
pub enum UniverseError {
    #[error("read universe {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse universe TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("asset universe is empty")]
    Empty,
}

/// Loads one asset's price series.
pub trait SeriesLoader: Send + Sync {
    fn load(&self, asset: &str) -> Result<PriceSeries, LoadError>;
}

/// Provides the ordered list of assets a sweep iterates.
pub trait AssetUniverse: Send + Sync {
    fn assets(&self) -> Result<Vec<AssetId>, UniverseError>;
}

// ─── CSV series ─────────────────────────────────────────────────────

/// Reads `<dir>/<asset>.csv` with a header containing at least
/// `date, open, high, low, close` (case-insensitive aliases accepted; extra
/// columns such as volume are ignored).
#[derive(Debug, Clone)]
pub struct CsvSeriesLoader {
    dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(alias = "Date", alias = "DATE")]
    date: String,
    #[serde(alias = "Open", alias = "OPEN")]
    open: f64,
    #[serde(alias = "High", alias = "HIGH")]
    high: f64,
    #[serde(alias = "Low", alias = "LOW")]
    low: f64,
    #[serde(alias = "Close", alias = "CLOSE")]
    close: f64,
}

impl CsvSeriesLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, asset: &str) -> PathBuf {
        self.dir.join(format!("{asset}.csv"))
    }
}

impl SeriesLoader for CsvSeriesLoader {
    fn load(&self, asset: &str) -> Result<PriceSeries, LoadError> {
        let path = self.path_for(asset);
        if !path.is_file() {
            return Err(LoadError::NotFound {
                asset: asset.to_string(),
                path,
            });
        }
        let csv_err = |source| LoadError::Csv {
            asset: asset.to_string(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&path)
            .map_err(csv_err)?;

        let mut bars = Vec::new();
        for (row, record) in reader.deserialize::<CsvRow>().enumerate() {
            let record = record.map_err(csv_err)?;
            // Rows whose date cannot be parsed are dropped, like blank trailer lines.
            let Some(date) = parse_date(&record.date) else {
                debug!(asset, row, date = %record.date, "skipping row with unparsable date");
                continue;
            };
            bars.push(Bar::new(date, record.open, record.high, record.low, record.close));
        }
        bars.sort_by_key(|b| b.date);

        PriceSeries::new(asset, bars).map_err(|source| LoadError::Invalid {
            asset: asset.to_string(),
            source,
        })
    }
}

/// Accepts `YYYY-MM-DD`, `YYYYMMDD` and `YYYY/MM/DD`, with an optional time suffix.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.split([' ', 'T']).next().unwrap_or(raw).trim();
    ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(day, fmt).ok())
}

// ─── Universes ──────────────────────────────────────────────────────

/// Every `*.csv` file in a directory, sorted by asset identifier.
#[derive(Debug, Clone)]
pub struct DirectoryUniverse {
    dir: PathBuf,
}

impl DirectoryUniverse {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl AssetUniverse for DirectoryUniverse {
    fn assets(&self) -> Result<Vec<AssetId>, UniverseError> {
        let io_err = |source| UniverseError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut assets = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_csv = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            if !is_csv {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                assets.push(stem.to_string());
            }
        }
        assets.sort();
        if assets.is_empty() {
            return Err(UniverseError::Empty);
        }
        Ok(assets)
    }
}

/// Asset list from TOML:
///
/// ```toml
/// assets = ["005930", "000660"]
///
/// [groups]
/// kosdaq = ["035720", "091990"]
/// ```
///
/// Top-level `assets` come first, then groups in name order. Duplicates keep
/// their first position.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UniverseFile {
    #[serde(default)]
    pub assets: Vec<String>,
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
}

impl UniverseFile {
    pub fn from_file(path: &Path) -> Result<Self, UniverseError> {
        let content = fs::read_to_string(path).map_err(|source| UniverseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, UniverseError> {
        Ok(toml::from_str(content)?)
    }

    pub fn all_assets(&self) -> Vec<AssetId> {
        let mut seen = std::collections::HashSet::new();
        self.assets
            .iter()
            .chain(self.groups.values().flatten())
            .filter(|a| seen.insert(a.as_str()))
            .cloned()
            .collect()
    }
}

/// Universe read from a TOML file on every call.
#[derive(Debug, Clone)]
pub struct FileUniverse {
    path: PathBuf,
}

impl FileUniverse {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AssetUniverse for FileUniverse {
    fn assets(&self) -> Result<Vec<AssetId>, UniverseError> {
        let assets = UniverseFile::from_file(&self.path)?.all_assets();
        if assets.is_empty() {
            return Err(UniverseError::Empty);
        }
        Ok(assets)
    }
}

/// A fixed asset list, e.g. a single asset named on the command line.
#[derive(Debug, Clone)]
pub struct StaticUniverse(pub Vec<AssetId>);

impl AssetUniverse for StaticUniverse {
    fn assets(&self) -> Result<Vec<AssetId>, UniverseError> {
        if self.0.is_empty() {
            return Err(UniverseError::Empty);
        }
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn loads_and_sorts_csv() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "005930.csv",
            "date,open,high,low,close,volume\n\
             2024-01-03,11,12,10,11.5,100\n\
             2024-01-02,10,11,9,10.5,100\n",
        );
        let series = CsvSeriesLoader::new(dir.path()).load("005930").unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.bars()[0].close, 10.5);
        assert_eq!(series.asset(), "005930");
    }

    #[test]
    fn accepts_capitalized_headers_and_compact_dates() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "A.csv",
            "Date,Open,High,Low,Close\n20240102,10,11,9,10.5\nnot-a-date,1,1,1,1\n",
        );
        let series = CsvSeriesLoader::new(dir.path()).load("A").unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.first_date(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = CsvSeriesLoader::new(dir.path()).load("nope").unwrap_err();
        assert!(matches!(err, LoadError::NotFound { .. }));
    }

    #[test]
    fn duplicate_dates_are_invalid() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "D.csv",
            "date,open,high,low,close\n2024-01-02,1,1,1,1\n2024-01-02,1,1,1,1\n",
        );
        let err = CsvSeriesLoader::new(dir.path()).load("D").unwrap_err();
        assert!(matches!(err, LoadError::Invalid { .. }));
    }

    #[test]
    fn malformed_number_is_csv_error() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "M.csv", "date,open,high,low,close\n2024-01-02,x,1,1,1\n");
        let err = CsvSeriesLoader::new(dir.path()).load("M").unwrap_err();
        assert!(matches!(err, LoadError::Csv { .. }));
    }

    #[test]
    fn parse_date_formats() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(parse_date("2024-03-05"), Some(d));
        assert_eq!(parse_date("20240305"), Some(d));
        assert_eq!(parse_date("2024/03/05"), Some(d));
        assert_eq!(parse_date("2024-03-05 00:00:00"), Some(d));
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn directory_universe_lists_sorted_csv_stems() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "B.csv", "");
        write(dir.path(), "A.csv", "");
        write(dir.path(), "notes.txt", "");
        let assets = DirectoryUniverse::new(dir.path()).assets().unwrap();
        assert_eq!(assets, vec!["A", "B"]);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            DirectoryUniverse::new(dir.path()).assets(),
            Err(UniverseError::Empty)
        ));
    }

    #[test]
    fn universe_file_orders_and_dedupes() {
        let file = UniverseFile::from_toml(
            r#"
            assets = ["X", "A"]
            [groups]
            tech = ["A", "T"]
            banks = ["B"]
            "#,
        )
        .unwrap();
        assert_eq!(file.all_assets(), vec!["X", "A", "B", "T"]);
    }
}
