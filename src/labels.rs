//! Ground-truth fatigue labels and the supervised dataset join.
//!
//! A label range `[applies_from, applies_to]` (closed, in ms) covers a window
//! `[t_start, t_end]` when the two intervals overlap. When several ranges
//! cover one window the one with the latest `applies_to` wins.

use crate::core::features::FeatureVector;
use crate::core::table::{headerless_writer, require_columns, TableError, FEATURE_COLUMNS};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

pub const LABEL_COLUMNS: [&str; 3] = ["applies_from", "applies_to", "fatigue_score"];

/// Label span recorded by `fatigue-sensor label` when none is given.
pub const DEFAULT_LABEL_SPAN_MIN: i64 = 15;

/// An interval of time annotated with one fatigue score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelRange {
    pub applies_from: i64,
    pub applies_to: i64,
    pub fatigue_score: f64,
}

impl LabelRange {
    /// Closed-interval overlap with `[t_start, t_end]`.
    pub fn overlaps(&self, t_start: i64, t_end: i64) -> bool {
        !(self.applies_to < t_start || self.applies_from > t_end)
    }

    /// Range of `span_min` minutes ending at `end_ms`.
    pub fn ending_at(end_ms: i64, span_min: i64, fatigue_score: f64) -> Self {
        Self {
            applies_from: end_ms.saturating_sub(span_min.saturating_mul(60_000)),
            applies_to: end_ms,
            fatigue_score,
        }
    }

    /// Range from the end of the previous label up to `end_ms`.
    ///
    /// Without a previous label this is the default span ending at `end_ms`.
    pub fn since_last(
        last_end_ms: Option<i64>,
        end_ms: i64,
        span_min: i64,
        fatigue_score: f64,
    ) -> Self {
        match last_end_ms {
            Some(from) => Self {
                applies_from: from.min(end_ms),
                applies_to: end_ms,
                fatigue_score,
            },
            None => Self::ending_at(end_ms, span_min, fatigue_score),
        }
    }
}

/// Errors building the dataset.
#[derive(Debug)]
pub enum DatasetError {
    Table(TableError),
    /// No feature window overlapped any label range
    NoOverlap,
}

impl std::fmt::Display for DatasetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetError::Table(e) => write!(f, "{e}"),
            DatasetError::NoOverlap => write!(
                f,
                "No windows overlapped any label ranges. Collect more labels or re-run features."
            ),
        }
    }
}

impl std::error::Error for DatasetError {}

impl From<TableError> for DatasetError {
    fn from(e: TableError) -> Self {
        DatasetError::Table(e)
    }
}

/// Parse a labels table; extra columns are ignored.
pub fn read_labels<R: Read>(name: &str, reader: R) -> Result<Vec<LabelRange>, TableError> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    require_columns(name, csv.headers()?, &LABEL_COLUMNS)?;

    let mut labels = Vec::new();
    for row in csv.deserialize() {
        labels.push(row?);
    }
    Ok(labels)
}

pub fn load_labels(path: &Path) -> Result<Vec<LabelRange>, TableError> {
    read_labels(&path.display().to_string(), std::fs::File::open(path)?)
}

/// Append one label, writing the header first if the file is new or empty.
pub fn append_label(path: &Path, label: &LabelRange) -> Result<(), TableError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let needs_header = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let mut csv = csv::WriterBuilder::new()
        .has_headers(needs_header)
        .from_writer(file);
    csv.serialize(label)?;
    csv.flush()?;
    Ok(())
}

/// `applies_to` of the last row, or `None` when nothing is labeled yet.
pub fn last_label_end(path: &Path) -> Result<Option<i64>, TableError> {
    match std::fs::metadata(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
        Ok(meta) if meta.len() == 0 => return Ok(None),
        Ok(_) => {}
    }
    Ok(load_labels(path)?.last().map(|label| label.applies_to))
}

/// Close gaps between labels: each row starts where the previous one ended.
///
/// Rows are sorted by `applies_from` first. Columns other than
/// `applies_from` are kept as they are. Returns the number of rows.
pub fn fill_label_gaps(path: &Path) -> Result<usize, TableError> {
    let name = path.display().to_string();
    let (headers, rows) = {
        let mut csv = csv::Reader::from_path(path)?;
        let headers = csv.headers()?.clone();
        require_columns(&name, &headers, &LABEL_COLUMNS)?;
        let rows = csv.records().collect::<Result<Vec<_>, _>>()?;
        (headers, rows)
    };

    let column = |wanted: &str| {
        headers
            .iter()
            .position(|h| h.trim() == wanted)
            .ok_or_else(|| TableError::Validation {
                table: name.clone(),
                missing: vec![wanted.to_string()],
            })
    };
    let from_idx = column("applies_from")?;
    let to_idx = column("applies_to")?;

    let parse = |record: &csv::StringRecord, idx: usize| -> Result<i64, TableError> {
        let cell = record.get(idx).unwrap_or_default().trim();
        cell.parse::<i64>()
            .or_else(|_| cell.parse::<f64>().map(|v| v as i64))
            .map_err(|_| TableError::Validation {
                table: name.clone(),
                missing: vec![format!("{} (unparsable value {cell:?})", headers[idx].trim())],
            })
    };

    let mut keyed = Vec::with_capacity(rows.len());
    for record in rows {
        keyed.push((parse(&record, from_idx)?, record));
    }
    keyed.sort_by_key(|(from, _)| *from);

    let mut previous_to: Option<String> = None;
    let mut output = Vec::with_capacity(keyed.len());
    for (_, record) in keyed {
        parse(&record, to_idx)?;
        let cells: Vec<String> = record
            .iter()
            .enumerate()
            .map(|(idx, cell)| match (&previous_to, idx == from_idx) {
                (Some(prev), true) => prev.clone(),
                _ => cell.to_string(),
            })
            .collect();
        previous_to = record.get(to_idx).map(|s| s.trim().to_string());
        output.push(cells);
    }

    let mut csv = csv::Writer::from_path(path)?;
    csv.write_record(&headers)?;
    for cells in &output {
        csv.write_record(cells)?;
    }
    csv.flush()?;
    Ok(output.len())
}

/// The label for a window: latest `applies_to` among overlapping ranges,
/// later rows winning ties.
pub fn select_label(labels: &[LabelRange], t_start: i64, t_end: i64) -> Option<&LabelRange> {
    labels
        .iter()
        .filter(|label| label.overlaps(t_start, t_end))
        .fold(None, |best: Option<&LabelRange>, label| match best {
            Some(current) if current.applies_to > label.applies_to => Some(current),
            _ => Some(label),
        })
}

/// A feature window joined with its fatigue score.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledWindow {
    pub features: FeatureVector,
    pub fatigue_score: f64,
}

/// Inner join of windows onto label ranges.
pub fn build_dataset(
    features: &[FeatureVector],
    labels: &[LabelRange],
) -> Result<Vec<LabeledWindow>, DatasetError> {
    let rows: Vec<LabeledWindow> = features
        .iter()
        .filter_map(|window| {
            select_label(labels, window.t_start, window.t_end).map(|label| LabeledWindow {
                features: window.clone(),
                fatigue_score: label.fatigue_score,
            })
        })
        .collect();

    if rows.is_empty() {
        return Err(DatasetError::NoOverlap);
    }
    Ok(rows)
}

/// Write the dataset: feature columns followed by `fatigue_score`.
pub fn write_dataset<W: Write>(writer: W, rows: &[LabeledWindow]) -> Result<(), TableError> {
    let mut csv = headerless_writer(writer);
    csv.write_record(FEATURE_COLUMNS.iter().chain(std::iter::once(&"fatigue_score")))?;
    for row in rows {
        csv.serialize((&row.features, row.fatigue_score))?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_dataset_file(path: &Path, rows: &[LabeledWindow]) -> Result<(), TableError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_dataset(std::fs::File::create(path)?, rows)
}
