//! Durable persistence of buffered events to an append-only NDJSON log.

use crate::capture::buffer::EventBuffer;
use crate::collector::types::RawEvent;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Destination for drained event batches.
pub trait EventSink: Send {
    /// Append a batch in order. On error nothing may be assumed written.
    fn append_batch(&mut self, batch: &VecDeque<RawEvent>) -> std::io::Result<()>;
}

/// Append-only newline-delimited JSON log file.
#[derive(Debug)]
pub struct NdjsonLog {
    path: PathBuf,
}

impl NdjsonLog {
    /// Use `path` as the run log; parent directories are created.
    pub fn create(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> std::io::Result<File> {
        OpenOptions::new().create(true).append(true).open(&self.path)
    }
}

impl EventSink for NdjsonLog {
    fn append_batch(&mut self, batch: &VecDeque<RawEvent>) -> std::io::Result<()> {
        let lines = encode_batch(batch)?;
        append_or_rollback(&mut self.open()?, &lines)
    }
}

/// Storage a batch is appended to, able to cut itself back to a length.
pub(crate) trait AppendTarget: Write {
    fn end_offset(&mut self) -> std::io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> std::io::Result<()>;
    fn sync(&mut self) -> std::io::Result<()>;
}

impl AppendTarget for File {
    fn end_offset(&mut self) -> std::io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_data()
    }
}

/// One JSON line per event, in batch order.
pub(crate) fn encode_batch(batch: &VecDeque<RawEvent>) -> std::io::Result<Vec<u8>> {
    let mut lines = Vec::with_capacity(batch.len() * 48);
    for event in batch {
        serde_json::to_writer(&mut lines, event).map_err(std::io::Error::other)?;
        lines.push(b'\n');
    }
    Ok(lines)
}

/// Append `bytes` durably, or leave the target at its previous length.
///
/// A partial write or a failed sync is cut back off so a retried batch
/// never lands twice.
pub(crate) fn append_or_rollback<T: AppendTarget>(
    target: &mut T,
    bytes: &[u8],
) -> std::io::Result<()> {
    let start = target.end_offset()?;
    let written = target
        .write_all(bytes)
        .and_then(|()| target.flush())
        .and_then(|()| target.sync());

    if let Err(e) = written {
        if let Err(rollback) = target.truncate_to(start).and_then(|()| target.sync()) {
            tracing::error!(error = %rollback, offset = start, "could not roll back partial append");
        }
        return Err(e);
    }
    Ok(())
}

/// Error raised when a drained batch could not be appended.
#[derive(Debug)]
pub struct PersistError {
    /// Events put back into the buffer for the next cycle
    pub requeued: usize,
    pub source: std::io::Error,
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "failed to persist {} events (re-enqueued): {}",
            self.requeued, self.source
        )
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Drains the buffer into the sink.
pub struct Persister {
    buffer: Arc<EventBuffer>,
    sink: Mutex<Box<dyn EventSink>>,
}

impl Persister {
    pub fn new(buffer: Arc<EventBuffer>, sink: Box<dyn EventSink>) -> Self {
        Self {
            buffer,
            sink: Mutex::new(sink),
        }
    }

    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    /// Move everything currently buffered to the sink.
    ///
    /// The sink lock is taken before draining so concurrent flushes reach the
    /// log in drain order. The buffer lock is only held for the swap. On
    /// failure the batch is re-enqueued ahead of newer events.
    pub fn flush(&self) -> Result<usize, PersistError> {
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());

        let batch = self.buffer.drain();
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        match sink.append_batch(&batch) {
            Ok(()) => {
                self.buffer.stats().record_flushed(count as u64);
                tracing::debug!(count, "flushed events");
                Ok(count)
            }
            Err(source) => {
                self.buffer.stats().record_persist_failure();
                tracing::warn!(count, error = %source, "persist failed, re-enqueueing batch");
                self.buffer.requeue(batch);
                Err(PersistError {
                    requeued: count,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Sink recording batches, optionally failing.
    struct ScriptedSink {
        fail: Arc<AtomicBool>,
        written: Arc<Mutex<Vec<i64>>>,
    }

    impl EventSink for ScriptedSink {
        fn append_batch(&mut self, batch: &VecDeque<RawEvent>) -> std::io::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("disk full"));
            }
            let mut written = self.written.lock().unwrap();
            written.extend(batch.iter().map(|e| e.timestamp_ms));
            Ok(())
        }
    }

    #[test]
    fn test_flush_empty_buffer_is_noop() {
        let buffer = Arc::new(EventBuffer::with_capacity(10));
        let fail = Arc::new(AtomicBool::new(false));
        let written = Arc::new(Mutex::new(Vec::new()));
        let persister = Persister::new(
            buffer.clone(),
            Box::new(ScriptedSink {
                fail,
                written: written.clone(),
            }),
        );

        assert_eq!(persister.flush().unwrap(), 0);
        assert_eq!(buffer.stats().snapshot().flush_batches, 0);
    }

    #[test]
    fn test_failed_flush_requeues_then_retries_once() {
        let buffer = Arc::new(EventBuffer::with_capacity(10));
        let fail = Arc::new(AtomicBool::new(true));
        let written = Arc::new(Mutex::new(Vec::new()));
        let persister = Persister::new(
            buffer.clone(),
            Box::new(ScriptedSink {
                fail: fail.clone(),
                written: written.clone(),
            }),
        );

        buffer.append(RawEvent::key_down(1));
        buffer.append(RawEvent::key_down(2));
        let err = persister.flush().unwrap_err();
        assert_eq!(err.requeued, 2);
        assert_eq!(buffer.len(), 2);

        buffer.append(RawEvent::key_down(3));
        fail.store(false, Ordering::SeqCst);
        assert_eq!(persister.flush().unwrap(), 3);

        assert_eq!(*written.lock().unwrap(), vec![1, 2, 3]);
        let stats = buffer.stats().snapshot();
        assert_eq!(stats.persist_failures, 1);
        assert_eq!(stats.events_flushed, 3);
    }

    /// In-memory device that runs out of space or fails to sync.
    #[derive(Clone, Default)]
    struct LimitedDevice {
        data: Arc<Mutex<Vec<u8>>>,
        space: Arc<Mutex<usize>>,
        fail_sync: Arc<AtomicBool>,
    }

    impl LimitedDevice {
        fn with_space(space: usize) -> Self {
            let device = Self::default();
            *device.space.lock().unwrap() = space;
            device
        }

        fn contents(&self) -> String {
            String::from_utf8(self.data.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for LimitedDevice {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut data = self.data.lock().unwrap();
            let space = *self.space.lock().unwrap();
            let room = space.saturating_sub(data.len());
            if room == 0 {
                return Err(std::io::Error::other("no space left on device"));
            }
            let n = room.min(buf.len());
            data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl AppendTarget for LimitedDevice {
        fn end_offset(&mut self) -> std::io::Result<u64> {
            Ok(self.data.lock().unwrap().len() as u64)
        }

        fn truncate_to(&mut self, len: u64) -> std::io::Result<()> {
            self.data.lock().unwrap().truncate(len as usize);
            Ok(())
        }

        fn sync(&mut self) -> std::io::Result<()> {
            if self.fail_sync.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("sync failed"));
            }
            Ok(())
        }
    }

    struct DeviceSink(LimitedDevice);

    impl EventSink for DeviceSink {
        fn append_batch(&mut self, batch: &VecDeque<RawEvent>) -> std::io::Result<()> {
            append_or_rollback(&mut self.0, &encode_batch(batch)?)
        }
    }

    fn logged_timestamps(device: &LimitedDevice) -> Vec<i64> {
        device
            .contents()
            .lines()
            .map(|line| RawEvent::from_json_line(line).unwrap().timestamp_ms)
            .collect()
    }

    #[test]
    fn test_partial_write_is_rolled_back_and_retried_once() {
        let buffer = Arc::new(EventBuffer::with_capacity(1_000));
        let device = LimitedDevice::with_space(2_000);
        let persister = Persister::new(buffer.clone(), Box::new(DeviceSink(device.clone())));

        for t in 0..100 {
            buffer.append(RawEvent::key_down(t));
        }
        let err = persister.flush().unwrap_err();
        assert_eq!(err.requeued, 100);
        assert_eq!(device.contents(), "");
        assert_eq!(buffer.len(), 100);

        *device.space.lock().unwrap() = usize::MAX;
        assert_eq!(persister.flush().unwrap(), 100);
        assert_eq!(logged_timestamps(&device), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_failed_sync_leaves_no_lines_behind() {
        let buffer = Arc::new(EventBuffer::with_capacity(10));
        let device = LimitedDevice::with_space(usize::MAX);
        let persister = Persister::new(buffer.clone(), Box::new(DeviceSink(device.clone())));

        buffer.append(RawEvent::key_down(1));
        assert_eq!(persister.flush().unwrap(), 1);

        buffer.append(RawEvent::key_down(2));
        device.fail_sync.store(true, Ordering::SeqCst);
        assert!(persister.flush().is_err());
        assert_eq!(logged_timestamps(&device), vec![1]);

        device.fail_sync.store(false, Ordering::SeqCst);
        assert_eq!(persister.flush().unwrap(), 1);
        assert_eq!(logged_timestamps(&device), vec![1, 2]);
    }

    #[test]
    fn test_ndjson_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw").join("events_test.ndjson");
        let mut log = NdjsonLog::create(&path).unwrap();

        let batch: VecDeque<RawEvent> = vec![RawEvent::key_down(1), RawEvent::movement(2, 5, 6)]
            .into_iter()
            .collect();
        log.append_batch(&batch).unwrap();
        log.append_batch(&VecDeque::from(vec![RawEvent::backspace(3)]))
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], r#"{"t":2,"type":"mouse_move","x":5,"y":6}"#);
    }
}
