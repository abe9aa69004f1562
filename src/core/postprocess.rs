//! Post-processing of feature vectors before they are written out.
//!
//! Undefined statistics become `0.0`, non-finite values become `0.0` and the
//! bounded ratios are clipped into `[0, 1]`. The transform is idempotent.
//!
//! Z-score normalization is a separate, optional step: statistics are fitted
//! on one table and can be applied to others.

use crate::core::features::FeatureVector;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::path::Path;

/// Columns that are normalized, in table order.
pub const NUMERIC_FEATURES: [&str; 14] = [
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

/// Standard deviations at or below this are replaced by 1.0.
const MIN_STD: f64 = 1e-8;

/// Resolve one vector.
pub fn post_process(features: &FeatureVector) -> FeatureVector {
    FeatureVector {
        correction_rate: clip_unit(features.correction_rate),
        avg_iki: fill(features.avg_iki),
        iki_std: fill(features.iki_std),
        mouse_speed_mean: fill(features.mouse_speed_mean),
        mouse_speed_std: fill(features.mouse_speed_std),
        mouse_jerk_mean: fill(features.mouse_jerk_mean),
        idle_ratio: clip_unit(features.idle_ratio),
        tod_sin: finite_or_zero(features.tod_sin),
        tod_cos: finite_or_zero(features.tod_cos),
        ..features.clone()
    }
}

/// Resolve a whole feature table, keeping row order.
pub fn fill_and_clip(table: &[FeatureVector]) -> Vec<FeatureVector> {
    table.iter().map(post_process).collect()
}

impl FeatureVector {
    /// Values of [`NUMERIC_FEATURES`]; undefined values read as 0.0.
    pub fn numeric_values(&self) -> [f64; 14] {
        [
            self.keys_total as f64,
            self.backspace as f64,
            self.correction_rate,
            self.avg_iki.unwrap_or(0.0),
            self.iki_std.unwrap_or(0.0),
            self.move_events as f64,
            self.mouse_speed_mean.unwrap_or(0.0),
            self.mouse_speed_std.unwrap_or(0.0),
            self.mouse_jerk_mean.unwrap_or(0.0),
            self.idle_ratio,
            self.clicks as f64,
            self.scrolls as f64,
            self.tod_sin,
            self.tod_cos,
        ]
    }
}

/// Per-column mean and population standard deviation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZScoreStats {
    pub mean: [f64; 14],
    pub std: [f64; 14],
}

/// A window with its numeric features normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub window_id: i64,
    pub t_start: i64,
    pub t_end: i64,
    pub values: [f64; 14],
}

impl ZScoreStats {
    /// Fit on a post-processed table. `None` when the table is empty.
    pub fn fit(table: &[FeatureVector]) -> Option<Self> {
        if table.is_empty() {
            return None;
        }
        let rows: Vec<[f64; 14]> = table.iter().map(FeatureVector::numeric_values).collect();

        let mut mean = [0.0; 14];
        let mut std = [1.0; 14];
        for column in 0..NUMERIC_FEATURES.len() {
            let values: Vec<f64> = rows.iter().map(|row| row[column]).collect();
            mean[column] = values.iter().mean();
            let sd = values.iter().population_std_dev();
            std[column] = if sd > MIN_STD { sd } else { 1.0 };
        }
        Some(Self { mean, std })
    }

    pub fn apply(&self, features: &FeatureVector) -> NormalizedRow {
        let mut values = features.numeric_values();
        for (column, value) in values.iter_mut().enumerate() {
            *value = (*value - self.mean[column]) / self.std[column];
        }
        NormalizedRow {
            window_id: features.window_id,
            t_start: features.t_start,
            t_end: features.t_end,
            values,
        }
    }

    pub fn apply_all(&self, table: &[FeatureVector]) -> Vec<NormalizedRow> {
        table.iter().map(|row| self.apply(row)).collect()
    }

    /// Write the statistics as JSON.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(std::io::Error::other)
    }
}

fn fill(value: Option<f64>) -> Option<f64> {
    Some(value.map(finite_or_zero).unwrap_or(0.0))
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn clip_unit(value: f64) -> f64 {
    finite_or_zero(value).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::RawEvent;
    use crate::core::features::FeatureAggregator;
    use crate::core::windowing::EventWindow;

    fn undefined_vector() -> FeatureVector {
        FeatureVector {
            window_id: 2,
            t_start: 10,
            t_end: 20,
            keys_total: 1,
            backspace: 0,
            correction_rate: f64::NAN,
            avg_iki: None,
            iki_std: Some(f64::NAN),
            move_events: 0,
            mouse_speed_mean: None,
            mouse_speed_std: None,
            mouse_jerk_mean: Some(f64::INFINITY),
            idle_ratio: 1.7,
            clicks: 3,
            scrolls: 4,
            tod_sin: 0.5,
            tod_cos: f64::NAN,
        }
    }

    #[test]
    fn test_undefined_values_are_zeroed() {
        let post = post_process(&undefined_vector());
        assert_eq!(post.correction_rate, 0.0);
        assert_eq!(post.avg_iki, Some(0.0));
        assert_eq!(post.iki_std, Some(0.0));
        assert_eq!(post.mouse_speed_mean, Some(0.0));
        assert_eq!(post.mouse_jerk_mean, Some(0.0));
        assert_eq!(post.idle_ratio, 1.0);
        assert_eq!(post.tod_sin, 0.5);
        assert_eq!(post.tod_cos, 0.0);
        assert_eq!(post.clicks, 3);
        assert_eq!(post.window_id, 2);
    }

    #[test]
    fn test_post_process_is_idempotent() {
        let defined = FeatureAggregator::default().compute(&EventWindow {
            window_id: 0,
            events: vec![
                RawEvent::key_down(0),
                RawEvent::backspace(120),
                RawEvent::movement(200, 0, 0),
                RawEvent::movement(300, 30, 40),
            ],
        });
        let table = vec![undefined_vector(), defined];

        let once = fill_and_clip(&table);
        let twice = fill_and_clip(&once);
        assert_eq!(once, twice);
    }

    fn keys(window_id: i64, keys_total: u64, tod_sin: f64) -> FeatureVector {
        FeatureVector {
            window_id,
            keys_total,
            tod_sin,
            ..post_process(&undefined_vector())
        }
    }

    #[test]
    fn test_zscore_fit_and_apply() {
        let table = vec![keys(0, 2, 0.5), keys(1, 4, 0.5), keys(2, 6, 0.5)];
        let stats = ZScoreStats::fit(&table).unwrap();

        assert!((stats.mean[0] - 4.0).abs() < 1e-12);
        assert!((stats.std[0] - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
        // Constant column keeps a unit std
        assert_eq!(stats.std[12], 1.0);

        let rows = stats.apply_all(&table);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].window_id, 2);
        assert!((rows[0].values[0] + rows[2].values[0]).abs() < 1e-12);
        assert!(rows[2].values[0] > 1.0);
        assert!(rows.iter().all(|r| r.values[12] == 0.0));

        let column: Vec<f64> = rows.iter().map(|r| r.values[0]).collect();
        assert!(column.iter().mean().abs() < 1e-12);
        assert!((column.iter().population_std_dev() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zscore_is_kept_out_of_fill_and_clip() {
        assert!(ZScoreStats::fit(&[]).is_none());

        let table = vec![keys(0, 2, 0.5), keys(1, 4, 0.5)];
        let cleaned = fill_and_clip(&table);
        assert_eq!(cleaned[1].keys_total, 4);

        let stats = ZScoreStats::fit(&cleaned).unwrap();
        let once = stats.apply(&cleaned[1]);
        assert!((once.values[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zscore_stats_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zscore.json");
        let stats = ZScoreStats::fit(&[keys(0, 1, 0.0), keys(1, 3, 1.0)]).unwrap();
        stats.save(&path).unwrap();
        assert_eq!(ZScoreStats::load(&path).unwrap(), stats);
    }

    #[test]
    fn test_no_mouse_moves_become_zero() {
        let features = FeatureAggregator::default().compute(&EventWindow {
            window_id: 0,
            events: vec![RawEvent::key_down(0), RawEvent::key_down(50)],
        });
        let post = post_process(&features);
        assert_eq!(post.mouse_speed_mean, Some(0.0));
        assert_eq!(post.mouse_speed_std, Some(0.0));
        assert_eq!(post.mouse_jerk_mean, Some(0.0));
    }
}
