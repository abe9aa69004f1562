//! Non-macOS (noop) implementation of event collection.
//!
//! This exists so the crate (and binary) can compile on non-Apple targets
//! without pulling in CoreGraphics/CoreFoundation dependencies. The sender
//! side is exposed so tests and replays can inject events.

use crate::collector::types::RawEvent;
use crate::collector::CaptureSource;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Configuration for which event sources to capture.
///
/// On non-macOS platforms this is accepted but no system events are captured.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub capture_keyboard: bool,
    pub capture_mouse: bool,
    /// Bound of the delivery channel
    pub channel_capacity: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            capture_keyboard: true,
            capture_mouse: true,
            channel_capacity: 10_000,
        }
    }
}

/// Errors that can occur during event collection.
#[derive(Debug)]
pub enum CollectorError {
    AlreadyRunning,
}

impl std::fmt::Display for CollectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorError::AlreadyRunning => write!(f, "Collector is already running"),
        }
    }
}

impl std::error::Error for CollectorError {}

/// A noop collector that never emits events by itself.
pub struct NoopCollector {
    _config: CollectorConfig,
    sender: Sender<RawEvent>,
    receiver: Receiver<RawEvent>,
    running: Arc<AtomicBool>,
}

impl NoopCollector {
    /// Create a new noop collector.
    pub fn new(config: CollectorConfig) -> Self {
        let (sender, receiver) = bounded(config.channel_capacity.max(1));
        Self {
            _config: config,
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sender feeding this collector's channel.
    pub fn sender(&self) -> Sender<RawEvent> {
        self.sender.clone()
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&self) -> Option<RawEvent> {
        self.receiver.try_recv().ok()
    }
}

impl CaptureSource for NoopCollector {
    /// On non-macOS platforms, this simply marks the collector as running.
    fn start(&mut self) -> Result<(), CollectorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn receiver(&self) -> &Receiver<RawEvent> {
        &self.receiver
    }
}

/// On non-macOS platforms there is no Input Monitoring permission gate.
pub fn check_permission() -> bool {
    true
}
