//! CSV persistence of feature tables.

use crate::core::features::FeatureVector;
use crate::core::postprocess::{NormalizedRow, NUMERIC_FEATURES};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Column order of every feature table.
pub const FEATURE_COLUMNS: [&str; 17] = [
    "window_id",
    "t_start",
    "t_end",
    "keys_total",
    "backspace",
    "correction_rate",
    "avg_iki",
    "iki_std",
    "move_events",
    "mouse_speed_mean",
    "mouse_speed_std",
    "mouse_jerk_mean",
    "idle_ratio",
    "clicks",
    "scrolls",
    "tod_sin",
    "tod_cos",
];

/// Errors reading or writing CSV tables.
#[derive(Debug)]
pub enum TableError {
    Io(std::io::Error),
    Csv(csv::Error),
    /// Required columns are missing from an input table
    Validation {
        table: String,
        missing: Vec<String>,
    },
    /// No files of the expected kind in a directory
    NotFound(PathBuf),
}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableError::Io(e) => write!(f, "IO error: {e}"),
            TableError::Csv(e) => write!(f, "CSV error: {e}"),
            TableError::Validation { table, missing } => write!(
                f,
                "{table} is missing required columns: {}",
                missing.join(", ")
            ),
            TableError::NotFound(dir) => write!(f, "No matching tables found in {}", dir.display()),
        }
    }
}

impl std::error::Error for TableError {}

impl From<std::io::Error> for TableError {
    fn from(e: std::io::Error) -> Self {
        TableError::Io(e)
    }
}

impl From<csv::Error> for TableError {
    fn from(e: csv::Error) -> Self {
        TableError::Csv(e)
    }
}

/// Fail with [`TableError::Validation`] unless every required column is present.
pub fn require_columns(
    table: &str,
    headers: &csv::StringRecord,
    required: &[&str],
) -> Result<(), TableError> {
    let missing: Vec<String> = required
        .iter()
        .filter(|column| !headers.iter().any(|h| h.trim() == **column))
        .map(|column| column.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(TableError::Validation {
            table: table.to_string(),
            missing,
        })
    }
}

/// CSV writer for rows whose header is written explicitly.
pub(crate) fn headerless_writer<W: Write>(writer: W) -> csv::Writer<W> {
    csv::WriterBuilder::new().has_headers(false).from_writer(writer)
}

/// Write a feature table with header to any writer.
///
/// Field order of [`FeatureVector`] is the column order.
pub fn write_features<W: Write>(writer: W, table: &[FeatureVector]) -> Result<(), TableError> {
    let mut csv = headerless_writer(writer);
    csv.write_record(FEATURE_COLUMNS)?;
    for row in table {
        // Undefined values serialize as empty cells
        csv.serialize(row)?;
    }
    csv.flush()?;
    Ok(())
}

/// Write a feature table file, creating parent directories.
pub fn write_feature_table(path: &Path, table: &[FeatureVector]) -> Result<(), TableError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_features(std::fs::File::create(path)?, table)
}

/// Write z-scored rows: window bounds followed by [`NUMERIC_FEATURES`].
pub fn write_normalized_table(path: &Path, rows: &[NormalizedRow]) -> Result<(), TableError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut csv = headerless_writer(std::fs::File::create(path)?);
    csv.write_record(["window_id", "t_start", "t_end"].iter().chain(NUMERIC_FEATURES.iter()))?;
    for row in rows {
        csv.serialize((row.window_id, row.t_start, row.t_end, row.values))?;
    }
    csv.flush()?;
    Ok(())
}

/// Read a feature table, validating its columns first.
pub fn read_features<R: Read>(name: &str, reader: R) -> Result<Vec<FeatureVector>, TableError> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    require_columns(name, csv.headers()?, &FEATURE_COLUMNS)?;

    let mut table = Vec::new();
    for row in csv.deserialize() {
        table.push(row?);
    }
    Ok(table)
}

pub fn read_feature_table(path: &Path) -> Result<Vec<FeatureVector>, TableError> {
    read_features(&path.display().to_string(), std::fs::File::open(path)?)
}

/// Most recent `features_*.csv` in `dir`.
pub fn latest_feature_table(dir: &Path) -> Result<PathBuf, TableError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TableError::NotFound(dir.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("features_") && n.ends_with(".csv"))
                .unwrap_or(false)
        })
        .max()
        .ok_or_else(|| TableError::NotFound(dir.to_path_buf()))
}
