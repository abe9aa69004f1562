//! Transparency module for the Fatigue Sensor Agent.
//!
//! Tracks and exposes what a capture run collected, so users can audit it.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_stats, stats_path, CaptureStats, CaptureStatsSnapshot, SharedCaptureStats,
};
