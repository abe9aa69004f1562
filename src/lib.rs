//! Fatigue Sensor Agent - contentless interaction logging for fatigue research.
//!
//! This library captures keyboard and mouse interaction timing, persists it as
//! an append-only log and turns the log into per-window behavioral features
//! for supervised labeling.
//!
//! # Privacy Guarantees
//!
//! - **No typed content**: a key press is recorded as "a key went down", plus
//!   a backspace flag or the name of a non-printable key
//! - **Local only**: logs, features and labels stay in the local data directory
//! - **Transparency**: every run reports what it captured, dropped and wrote
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Fatigue Sensor Agent                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌─────────────┐   ┌───────────┐   ┌──────────┐  │
//! │  │ Collector │──▶│ EventBuffer │──▶│ Persister │──▶│  NDJSON  │  │
//! │  │  (macOS)  │   │  (bounded)  │   │ (5s tick) │   │   log    │  │
//! │  └───────────┘   └─────────────┘   └───────────┘   └──────────┘  │
//! │                                                          │        │
//! │        ┌─────────────────────────────────────────────────┘        │
//! │        ▼                                                          │
//! │  ┌───────────┐   ┌─────────────┐   ┌─────────────┐   ┌─────────┐ │
//! │  │ Windowing │──▶│  Features   │──▶│ Postprocess │──▶│   CSV   │ │
//! │  │ (60s bins)│   │ (17 fields) │   │ (fill/clip) │   │  table  │ │
//! │  └───────────┘   └─────────────┘   └─────────────┘   └─────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use fatigue_sensor_agent::{
//!     capture::{raw_log_path, CaptureLogger, CaptureSettings},
//!     collector::{Collector, CollectorConfig},
//!     transparency::create_shared_stats,
//! };
//! use std::path::Path;
//!
//! let path = raw_log_path(Path::new("data/raw"));
//! let logger = CaptureLogger::with_log_file(CaptureSettings::default(), path, create_shared_stats())
//!     .expect("Failed to open run log");
//!
//! // Blocks until the source disconnects or a stop is requested
//! let mut collector = Collector::new(CollectorConfig::default());
//! logger.run(&mut collector).expect("Capture failed");
//! ```

pub mod capture;
pub mod collector;
pub mod config;
pub mod core;
pub mod labels;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use capture::{CaptureError, CaptureLogger, CaptureSettings, EventBuffer, StopHandle};
pub use collector::{CaptureSource, Collector, CollectorConfig, CollectorError, RawEvent};
pub use config::{Config, SourceConfig};
pub use core::{
    extract_features, fill_and_clip, FeatureAggregator, FeatureVector, WindowAssigner,
};
pub use labels::{build_dataset, select_label, LabelRange};
pub use transparency::{CaptureStats, SharedCaptureStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Privacy declaration that can be displayed to users.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║           FATIGUE SENSOR AGENT - PRIVACY DECLARATION             ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This agent logs interaction timing for fatigue research.        ║
║                                                                  ║
║  ✓ WHAT WE CAPTURE:                                              ║
║    • When keys are pressed, and whether it was backspace         ║
║    • Names of non-printable keys (enter, tab, shift, ...)        ║
║    • Pointer position, clicks and scroll amounts                 ║
║                                                                  ║
║  ✗ WHAT WE NEVER CAPTURE:                                        ║
║    • Which characters you type (no passwords, messages, etc.)    ║
║    • What applications you use                                   ║
║    • Any screen content                                          ║
║                                                                  ║
║  All data stays in the local data directory. Raw logs are        ║
║  summarized into one feature row per minute of activity.         ║
║                                                                  ║
║  You can view collection statistics anytime with:                ║
║    fatigue-sensor status                                         ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privacy_declaration_contents() {
        assert!(PRIVACY_DECLARATION.contains("PRIVACY"));
        assert!(PRIVACY_DECLARATION.contains("NEVER CAPTURE"));
        assert!(PRIVACY_DECLARATION.contains("characters you type"));
    }
}
