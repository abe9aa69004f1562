//! Capture run statistics.
//!
//! Counts what a capture run observed, dropped and persisted, without
//! storing any of the events themselves.

use crate::collector::types::EventKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live counters for one capture run.
#[derive(Debug)]
pub struct CaptureStats {
    key_downs: AtomicU64,
    clicks: AtomicU64,
    moves: AtomicU64,
    scrolls: AtomicU64,
    /// Events dropped from a full buffer
    events_evicted: AtomicU64,
    /// Events written to the run log
    events_flushed: AtomicU64,
    /// Successful non-empty flushes
    flush_batches: AtomicU64,
    /// Failed appends (batch re-enqueued)
    persist_failures: AtomicU64,
    session_start: DateTime<Utc>,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self {
            key_downs: AtomicU64::new(0),
            clicks: AtomicU64::new(0),
            moves: AtomicU64::new(0),
            scrolls: AtomicU64::new(0),
            events_evicted: AtomicU64::new(0),
            events_flushed: AtomicU64::new(0),
            flush_batches: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            session_start: Utc::now(),
        }
    }

    /// Record an event admitted to the buffer.
    pub fn record_event(&self, kind: EventKind) {
        let counter = match kind {
            EventKind::KeyDown => &self.key_downs,
            EventKind::MouseClick => &self.clicks,
            EventKind::MouseMove => &self.moves,
            EventKind::MouseScroll => &self.scrolls,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, count: u64) {
        self.events_evicted.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a batch that reached disk.
    pub fn record_flushed(&self, count: u64) {
        self.events_flushed.fetch_add(count, Ordering::Relaxed);
        self.flush_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            key_downs: self.key_downs.load(Ordering::Relaxed),
            clicks: self.clicks.load(Ordering::Relaxed),
            moves: self.moves.load(Ordering::Relaxed),
            scrolls: self.scrolls.load(Ordering::Relaxed),
            events_evicted: self.events_evicted.load(Ordering::Relaxed),
            events_flushed: self.events_flushed.load(Ordering::Relaxed),
            flush_batches: self.flush_batches.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Capture Statistics:\n\
             - Key-downs: {}\n\
             - Clicks: {}\n\
             - Moves: {}\n\
             - Scrolls: {}\n\
             - Events written: {} in {} batches\n\
             - Events evicted (buffer full): {}\n\
             - Failed flushes (retried): {}\n\
             - Session duration: {} seconds\n\
             \n\
             Privacy Guarantee:\n\
             - No typed characters captured",
            stats.key_downs,
            stats.clicks,
            stats.moves,
            stats.scrolls,
            stats.events_flushed,
            stats.flush_batches,
            stats.events_evicted,
            stats.persist_failures,
            stats.session_duration_secs
        )
    }

    /// Write the current statistics as JSON.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.snapshot()).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

impl Default for CaptureStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of capture statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureStatsSnapshot {
    pub key_downs: u64,
    pub clicks: u64,
    pub moves: u64,
    pub scrolls: u64,
    pub events_evicted: u64,
    pub events_flushed: u64,
    pub flush_batches: u64,
    pub persist_failures: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

impl CaptureStatsSnapshot {
    /// Load a snapshot saved by [`CaptureStats::save`].
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(std::io::Error::other)
    }

    pub fn events_captured(&self) -> u64 {
        self.key_downs + self.clicks + self.moves + self.scrolls
    }
}

/// Thread-safe shared capture statistics.
pub type SharedCaptureStats = Arc<CaptureStats>;

pub fn create_shared_stats() -> SharedCaptureStats {
    Arc::new(CaptureStats::new())
}

/// Default location of the saved statistics under a data directory.
pub fn stats_path(data_path: &Path) -> PathBuf {
    data_path.join("capture_stats.json")
}
