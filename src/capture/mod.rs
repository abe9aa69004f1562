//! Capture pipeline: bounded buffer, durable persister and orchestrator.
//!
//! Events flow from a [`CaptureSource`](crate::collector::CaptureSource) into
//! an [`EventBuffer`], and a background thread periodically drains the buffer
//! into the run's NDJSON log.

pub mod buffer;
pub mod logger;
pub mod persister;

pub use buffer::{EventBuffer, DEFAULT_CAPACITY};
pub use logger::{
    raw_log_path, CaptureError, CaptureLogger, CaptureSettings, ControlMessage, StopHandle,
    DEFAULT_FLUSH_INTERVAL,
};
pub use persister::{EventSink, NdjsonLog, PersistError, Persister};
