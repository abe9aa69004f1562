//! Event collection module for the Fatigue Sensor Agent.
//!
//! This module provides platform-specific implementations for capturing
//! keyboard and mouse events without recording typed content.

pub mod types;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(not(target_os = "macos"))]
pub mod noop;

use crossbeam_channel::Receiver;

// Re-export commonly used types
pub use types::{now_ms, EventKind, EventPayload, RawEvent};

#[cfg(target_os = "macos")]
pub use macos::{check_permission, CollectorConfig, CollectorError, MacOSCollector};

/// Platform-agnostic collector type alias
#[cfg(target_os = "macos")]
pub type Collector = MacOSCollector;

#[cfg(not(target_os = "macos"))]
pub use noop::{check_permission, CollectorConfig, CollectorError, NoopCollector};

/// Platform-agnostic collector type alias
#[cfg(not(target_os = "macos"))]
pub type Collector = NoopCollector;

/// A source of timestamped raw events delivered over a bounded channel.
pub trait CaptureSource {
    /// Begin delivering events.
    fn start(&mut self) -> Result<(), CollectorError>;

    /// Stop delivering events.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Channel the captured events arrive on.
    fn receiver(&self) -> &Receiver<RawEvent>;
}
