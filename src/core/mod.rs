//! Core functionality for the Fatigue Sensor Agent.
//!
//! This module contains:
//! - Reading run logs and assigning events to fixed-width windows
//! - Feature computation from event windows
//! - Post-processing and CSV persistence of feature tables

pub mod features;
pub mod postprocess;
pub mod table;
pub mod windowing;

// Re-export commonly used types
pub use features::{extract_features, FeatureAggregator, FeatureVector, IDLE_GAP_THRESHOLD_MS};
pub use postprocess::{fill_and_clip, post_process, NormalizedRow, ZScoreStats, NUMERIC_FEATURES};
pub use table::{
    latest_feature_table, read_feature_table, write_feature_table, write_normalized_table, TableError,
    FEATURE_COLUMNS,
};
pub use windowing::{
    latest_raw_file, read_event_log, EventLog, EventWindow, LogReadError, WindowAssigner,
    WindowError, DEFAULT_WINDOW_MS,
};
