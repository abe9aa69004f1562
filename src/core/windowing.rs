//! Reading persisted event logs and assigning events to fixed-width windows.
//!
//! Window ids are `(t - base) div width`, with `base` defaulting to the first
//! event of the batch. Ids are only comparable within one windowing pass and
//! are not gapless: intervals without events produce no window.

use crate::collector::types::RawEvent;
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// Default window width in milliseconds.
pub const DEFAULT_WINDOW_MS: i64 = 60_000;

/// Errors raised while assigning windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    /// Window width must be positive
    InvalidWidth(i64),
    /// Events must be sorted ascending by timestamp
    Unsorted { index: usize },
    /// An event precedes the explicit base timestamp
    BeforeBase { index: usize, timestamp_ms: i64 },
    /// An event lies too far from the base for its id to fit in an i64
    OutOfRange { index: usize, timestamp_ms: i64 },
}

impl std::fmt::Display for WindowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowError::InvalidWidth(w) => write!(f, "window width must be positive, got {w} ms"),
            WindowError::Unsorted { index } => {
                write!(f, "events are not sorted by timestamp at index {index}")
            }
            WindowError::BeforeBase {
                index,
                timestamp_ms,
            } => write!(
                f,
                "event {index} at {timestamp_ms} ms precedes the window base"
            ),
            WindowError::OutOfRange {
                index,
                timestamp_ms,
            } => write!(
                f,
                "event {index} at {timestamp_ms} ms is too far from the window base"
            ),
        }
    }
}

impl std::error::Error for WindowError {}

/// Errors raised while reading an event log.
#[derive(Debug)]
pub enum LogReadError {
    Io(std::io::Error),
    /// No log files in the directory
    NoLogs(PathBuf),
}

impl std::fmt::Display for LogReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogReadError::Io(e) => write!(f, "IO error: {e}"),
            LogReadError::NoLogs(dir) => write!(
                f,
                "No events_*.ndjson files found in {}. Run `fatigue-sensor capture` first.",
                dir.display()
            ),
        }
    }
}

impl std::error::Error for LogReadError {}

impl From<std::io::Error> for LogReadError {
    fn from(e: std::io::Error) -> Self {
        LogReadError::Io(e)
    }
}

/// Events read back from a run log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    /// Events sorted ascending by timestamp (stable)
    pub events: Vec<RawEvent>,
    /// Non-blank lines that could not be parsed
    pub skipped_lines: usize,
}

/// Parse NDJSON from a reader, skipping blank and malformed lines.
///
/// Lines that are not valid UTF-8 count as malformed.
pub fn parse_event_log<R: BufRead>(mut reader: R) -> Result<EventLog, std::io::Error> {
    let mut log = EventLog::default();
    let mut buf = Vec::new();
    let mut number = 0usize;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        number += 1;

        let parsed = std::str::from_utf8(&buf)
            .map_err(|e| e.to_string())
            .map(str::trim)
            .and_then(|line| {
                if line.is_empty() {
                    Ok(None)
                } else {
                    RawEvent::from_json_line(line)
                        .map(Some)
                        .map_err(|e| e.to_string())
                }
            });

        match parsed {
            Ok(Some(event)) => log.events.push(event),
            Ok(None) => {}
            Err(error) => {
                tracing::debug!(line = number, %error, "skipping malformed record");
                log.skipped_lines += 1;
            }
        }
    }

    log.events.sort_by_key(|e| e.timestamp_ms);
    Ok(log)
}

/// Read a run log from disk.
pub fn read_event_log(path: &Path) -> Result<EventLog, LogReadError> {
    let file = std::fs::File::open(path)?;
    let log = parse_event_log(std::io::BufReader::new(file))?;
    if log.skipped_lines > 0 {
        tracing::warn!(
            path = %path.display(),
            skipped = log.skipped_lines,
            "skipped malformed records"
        );
    }
    Ok(log)
}

/// Most recent `events_*.ndjson` in `raw_dir` (names sort chronologically).
pub fn latest_raw_file(raw_dir: &Path) -> Result<PathBuf, LogReadError> {
    let entries = match std::fs::read_dir(raw_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LogReadError::NoLogs(raw_dir.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("events_") && n.ends_with(".ndjson"))
                .unwrap_or(false)
        })
        .max()
        .ok_or_else(|| LogReadError::NoLogs(raw_dir.to_path_buf()))
}

/// Maps timestamps onto integer window ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAssigner {
    width_ms: i64,
    base_ms: Option<i64>,
}

impl WindowAssigner {
    pub fn new(width_ms: i64) -> Result<Self, WindowError> {
        if width_ms <= 0 {
            return Err(WindowError::InvalidWidth(width_ms));
        }
        Ok(Self {
            width_ms,
            base_ms: None,
        })
    }

    /// Use a fixed base instead of the batch minimum.
    pub fn with_base(mut self, base_ms: i64) -> Self {
        self.base_ms = Some(base_ms);
        self
    }

    pub fn width_ms(&self) -> i64 {
        self.width_ms
    }

    /// Window id of a single timestamp relative to `base_ms`, or `None` when
    /// the id does not fit in an i64.
    pub fn window_id(&self, timestamp_ms: i64, base_ms: i64) -> Option<i64> {
        let offset = i128::from(timestamp_ms) - i128::from(base_ms);
        i64::try_from(offset.div_euclid(i128::from(self.width_ms))).ok()
    }

    /// Return one window id per event.
    ///
    /// The events must be sorted ascending by timestamp.
    pub fn assign(&self, events: &[RawEvent]) -> Result<Vec<i64>, WindowError> {
        if let Some(index) = events
            .windows(2)
            .position(|pair| pair[1].timestamp_ms < pair[0].timestamp_ms)
        {
            return Err(WindowError::Unsorted { index: index + 1 });
        }

        let Some(first) = events.first() else {
            return Ok(Vec::new());
        };
        let base = self.base_ms.unwrap_or(first.timestamp_ms);
        if first.timestamp_ms < base {
            return Err(WindowError::BeforeBase {
                index: 0,
                timestamp_ms: first.timestamp_ms,
            });
        }

        events
            .iter()
            .enumerate()
            .map(|(index, e)| {
                self.window_id(e.timestamp_ms, base)
                    .ok_or(WindowError::OutOfRange {
                        index,
                        timestamp_ms: e.timestamp_ms,
                    })
            })
            .collect()
    }

    /// Group sorted events into populated windows, ascending by id.
    pub fn group(&self, events: &[RawEvent]) -> Result<Vec<EventWindow>, WindowError> {
        let ids = self.assign(events)?;
        let mut windows: Vec<EventWindow> = Vec::new();

        for (event, id) in events.iter().zip(ids) {
            match windows.last_mut() {
                Some(window) if window.window_id == id => window.events.push(event.clone()),
                _ => windows.push(EventWindow {
                    window_id: id,
                    events: vec![event.clone()],
                }),
            }
        }

        Ok(windows)
    }
}

impl Default for WindowAssigner {
    fn default() -> Self {
        Self {
            width_ms: DEFAULT_WINDOW_MS,
            base_ms: None,
        }
    }
}

/// A populated window and its events in time order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventWindow {
    pub window_id: i64,
    pub events: Vec<RawEvent>,
}

impl EventWindow {
    /// Earliest event timestamp.
    pub fn t_start(&self) -> i64 {
        self.events.first().map(|e| e.timestamp_ms).unwrap_or_default()
    }

    /// Latest event timestamp.
    pub fn t_end(&self) -> i64 {
        self.events.last().map(|e| e.timestamp_ms).unwrap_or_default()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn keys(timestamps: &[i64]) -> Vec<RawEvent> {
        timestamps.iter().map(|&t| RawEvent::key_down(t)).collect()
    }

    #[test]
    fn test_base_defaults_to_first_event() {
        let assigner = WindowAssigner::new(1_000).unwrap();
        let ids = assigner.assign(&keys(&[5_000, 5_999, 6_000, 9_500])).unwrap();
        assert_eq!(ids, vec![0, 0, 1, 4]);
    }

    #[test]
    fn test_explicit_base() {
        let assigner = WindowAssigner::new(60_000).unwrap().with_base(0);
        let ids = assigner.assign(&keys(&[0, 100, 260, 60_000])).unwrap();
        assert_eq!(ids, vec![0, 0, 0, 1]);

        let late_base = WindowAssigner::new(60_000).unwrap().with_base(500);
        assert!(matches!(
            late_base.assign(&keys(&[100])),
            Err(WindowError::BeforeBase { .. })
        ));
    }

    #[test]
    fn test_rejects_unsorted_and_bad_width() {
        let assigner = WindowAssigner::new(1_000).unwrap();
        assert_eq!(
            assigner.assign(&keys(&[10, 5])),
            Err(WindowError::Unsorted { index: 1 })
        );
        assert_eq!(WindowAssigner::new(0), Err(WindowError::InvalidWidth(0)));
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let wide = WindowAssigner::new(DEFAULT_WINDOW_MS).unwrap();
        let ids = wide.assign(&keys(&[i64::MIN + 1, i64::MAX])).unwrap();
        assert_eq!(ids[0], 0);
        assert_eq!(ids[1], ((i64::MAX as i128 - (i64::MIN as i128 + 1)) / 60_000) as i64);

        let unit = WindowAssigner::new(1).unwrap();
        assert_eq!(
            unit.assign(&keys(&[i64::MIN + 1, i64::MAX])),
            Err(WindowError::OutOfRange {
                index: 1,
                timestamp_ms: i64::MAX
            })
        );
    }

    #[test]
    fn test_gaps_produce_no_window() {
        let assigner = WindowAssigner::new(1_000).unwrap();
        let windows = assigner.group(&keys(&[0, 10, 5_000])).unwrap();
        let ids: Vec<i64> = windows.iter().map(|w| w.window_id).collect();
        assert_eq!(ids, vec![0, 5]);
        assert_eq!(windows[0].event_count(), 2);
        assert_eq!(windows[0].t_start(), 0);
        assert_eq!(windows[0].t_end(), 10);
    }

    #[test]
    fn test_assignment_is_monotonic_and_widening_never_adds_windows() {
        let timestamps: Vec<i64> = (0..500).map(|i| i * i * 37 % 1_000_003).collect();
        let mut sorted = timestamps.clone();
        sorted.sort_unstable();
        let events = keys(&sorted);

        let mut previous_count = usize::MAX;
        for width in [1, 10, 1_000, 60_000, 600_000] {
            let ids = WindowAssigner::new(width).unwrap().assign(&events).unwrap();
            assert!(ids.windows(2).all(|pair| pair[0] <= pair[1]));

            let distinct = ids.iter().collect::<HashSet<_>>().len();
            assert!(distinct <= previous_count);
            previous_count = distinct;
        }
    }

    #[test]
    fn test_parse_skips_malformed_lines_and_sorts() {
        let input = concat!(
            "{\"t\":300,\"type\":\"key_down\"}\n",
            "\n",
            "{\"t\":100,\"type\":\"mouse_move\",\"x\":1,\"y\":2}\n",
            "not json\n",
            "{\"t\":200,\"type\":\"key_d"
        );
        let log = parse_event_log(input.as_bytes()).unwrap();
        let timestamps: Vec<i64> = log.events.iter().map(|e| e.timestamp_ms).collect();
        assert_eq!(timestamps, vec![100, 300]);
        assert_eq!(log.skipped_lines, 2);
    }

    #[test]
    fn test_parse_skips_invalid_utf8_line() {
        let mut input = b"{\"t\":1,\"type\":\"key_down\"}\n".to_vec();
        input.extend_from_slice(b"{\"t\":2,\"type\":\"key_\xff\xfe\"}\n");
        input.extend_from_slice(b"{\"t\":3,\"type\":\"key_down\",\"is_backspace\":true}\n");

        let log = parse_event_log(input.as_slice()).unwrap();
        let timestamps: Vec<i64> = log.events.iter().map(|e| e.timestamp_ms).collect();
        assert_eq!(timestamps, vec![1, 3]);
        assert_eq!(log.skipped_lines, 1);
        assert!(log.events[1].is_backspace());
    }

    #[test]
    fn test_latest_raw_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            latest_raw_file(dir.path()),
            Err(LogReadError::NoLogs(_))
        ));

        for name in [
            "events_2025-09-10T13-22-45.ndjson",
            "events_2025-09-11T08-00-00.ndjson",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let latest = latest_raw_file(dir.path()).unwrap();
        assert!(latest.ends_with("events_2025-09-11T08-00-00.ndjson"));
    }
}
