//! Capture orchestrator: owns the buffer, the persister and the flusher thread.

use crate::capture::buffer::EventBuffer;
use crate::capture::persister::{EventSink, NdjsonLog, PersistError, Persister};
use crate::collector::types::RawEvent;
use crate::collector::CaptureSource;
use crate::transparency::SharedCaptureStats;
use chrono::Local;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

/// Default period of the background flush.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Buffer and flush parameters for one logger.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub buffer_capacity: usize,
    pub flush_interval: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: crate::capture::buffer::DEFAULT_CAPACITY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

/// Messages delivered to a running logger's event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Stop,
}

/// Cloneable handle that asks a running logger to shut down.
///
/// Safe to use from a signal handler thread: it only sends a message.
#[derive(Debug, Clone)]
pub struct StopHandle {
    sender: Sender<ControlMessage>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        let _ = self.sender.send(ControlMessage::Stop);
    }
}

/// Errors raised by the capture orchestrator.
#[derive(Debug)]
pub enum CaptureError {
    /// The capture source could not be started
    CaptureUnavailable(String),
    /// The final flush failed; events remain buffered
    Persist(PersistError),
    /// The logger was already stopped
    AlreadyStopped,
    Io(std::io::Error),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::CaptureUnavailable(e) => write!(f, "Capture unavailable: {e}"),
            CaptureError::Persist(e) => write!(f, "Persist failure: {e}"),
            CaptureError::AlreadyStopped => write!(f, "Logger has already been stopped"),
            CaptureError::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<PersistError> for CaptureError {
    fn from(e: PersistError) -> Self {
        CaptureError::Persist(e)
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(e: std::io::Error) -> Self {
        CaptureError::Io(e)
    }
}

/// Background flusher: the shutdown sender is dropped to end the thread.
struct Flusher {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// Captures events into a bounded buffer and flushes them periodically.
pub struct CaptureLogger {
    buffer: Arc<EventBuffer>,
    persister: Arc<Persister>,
    flush_interval: Duration,
    control_tx: Sender<ControlMessage>,
    control_rx: Receiver<ControlMessage>,
    flusher: Mutex<Option<Flusher>>,
    stopped: AtomicBool,
    log_path: Option<PathBuf>,
}

impl CaptureLogger {
    /// Create a logger writing to an arbitrary sink.
    pub fn new(
        settings: CaptureSettings,
        sink: Box<dyn EventSink>,
        stats: SharedCaptureStats,
    ) -> Self {
        let buffer = Arc::new(EventBuffer::new(settings.buffer_capacity, stats));
        let persister = Arc::new(Persister::new(buffer.clone(), sink));
        let (control_tx, control_rx) = unbounded();

        Self {
            buffer,
            persister,
            flush_interval: settings.flush_interval,
            control_tx,
            control_rx,
            flusher: Mutex::new(None),
            stopped: AtomicBool::new(false),
            log_path: None,
        }
    }

    /// Create a logger appending to an NDJSON file at `path`.
    pub fn with_log_file(
        settings: CaptureSettings,
        path: impl Into<PathBuf>,
        stats: SharedCaptureStats,
    ) -> Result<Self, CaptureError> {
        let log = NdjsonLog::create(path)?;
        let path = log.path().to_path_buf();
        let mut logger = Self::new(settings, Box::new(log), stats);
        logger.log_path = Some(path);
        Ok(logger)
    }

    /// Path of the run log, when writing to a file.
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    pub fn stats(&self) -> &SharedCaptureStats {
        self.buffer.stats()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            sender: self.control_tx.clone(),
        }
    }

    /// Buffer one event. Never performs I/O.
    pub fn append(&self, event: RawEvent) {
        self.buffer.append(event);
    }

    /// Flush immediately on the calling thread.
    pub fn flush(&self) -> Result<usize, PersistError> {
        self.persister.flush()
    }

    /// Spawn the periodic flusher. Calling it again while running is a no-op.
    pub fn start(&self) -> Result<(), CaptureError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(CaptureError::AlreadyStopped);
        }

        let mut flusher = self.flusher.lock().unwrap_or_else(|e| e.into_inner());
        if flusher.is_some() {
            return Ok(());
        }

        let (shutdown, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let persister = self.persister.clone();
        let interval = self.flush_interval;

        let handle = thread::Builder::new()
            .name("event-flusher".to_string())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            // Failures are logged and re-enqueued by the persister
                            let _ = persister.flush();
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
            })?;

        *flusher = Some(Flusher { shutdown, handle });
        info!(interval_secs = interval.as_secs_f64(), "flusher started");
        Ok(())
    }

    /// Run the capture loop until the source disconnects or a stop is requested.
    ///
    /// Blocks the calling thread. Events already queued in the source channel
    /// when the stop arrives are still buffered and flushed.
    pub fn run(&self, source: &mut dyn CaptureSource) -> Result<(), CaptureError> {
        source
            .start()
            .map_err(|e| CaptureError::CaptureUnavailable(e.to_string()))?;

        if let Err(e) = self.start() {
            source.stop();
            return Err(e);
        }

        if let Some(path) = &self.log_path {
            info!(path = %path.display(), "capturing events");
        }

        let events = source.receiver().clone();
        loop {
            select! {
                recv(events) -> event => match event {
                    Ok(event) => self.append(event),
                    Err(_) => {
                        warn!("capture source disconnected");
                        break;
                    }
                },
                recv(self.control_rx) -> _ => break,
            }
        }

        source.stop();
        for event in events.try_iter() {
            self.append(event);
        }

        self.stop()
    }

    /// Stop the flusher and synchronously flush whatever is still buffered.
    ///
    /// Idempotent. Later calls only retry the final flush.
    pub fn stop(&self) -> Result<(), CaptureError> {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let flusher = self
                .flusher
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            if let Some(Flusher { shutdown, handle }) = flusher {
                drop(shutdown);
                if handle.join().is_err() {
                    warn!("flusher thread panicked");
                }
            }
        }

        let flushed = self.persister.flush()?;
        info!(flushed, "logger stopped and flushed remaining events");
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for CaptureLogger {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "final flush failed on drop");
        }
    }
}

/// Fresh per-run log path: `<raw_dir>/events_<YYYY-MM-DDTHH-MM-SS>.ndjson`.
pub fn raw_log_path(raw_dir: &Path) -> PathBuf {
    raw_dir.join(format!(
        "events_{}.ndjson",
        Local::now().format("%Y-%m-%dT%H-%M-%S")
    ))
}
