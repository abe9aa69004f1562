//! Contentless raw event records.
//!
//! A key press is recorded only as "a key went down", optionally flagged as
//! backspace or named when it is a non-printable key. The character typed is
//! never part of the record.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Coarse classification of a raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    KeyDown,
    MouseClick,
    MouseMove,
    MouseScroll,
}

/// Kind-specific fields of a raw event.
///
/// Serialized internally tagged so each log line reads
/// `{"t":..,"type":"key_down",..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    KeyDown {
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_backspace: bool,
        /// Symbolic name of a non-printable key, e.g. `Key.enter`
        #[serde(default, rename = "special", skip_serializing_if = "Option::is_none")]
        special_key: Option<String>,
    },
    MouseClick {
        x: i32,
        y: i32,
        #[serde(rename = "btn")]
        button: String,
    },
    MouseMove {
        x: i32,
        y: i32,
    },
    MouseScroll {
        dx: i32,
        dy: i32,
        x: i32,
        y: i32,
    },
}

/// A single captured input event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Wall-clock timestamp in milliseconds
    #[serde(rename = "t")]
    pub timestamp_ms: i64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl RawEvent {
    /// A printable key went down. Which key is deliberately not recorded.
    pub fn key_down(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            payload: EventPayload::KeyDown {
                is_backspace: false,
                special_key: None,
            },
        }
    }

    pub fn backspace(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            payload: EventPayload::KeyDown {
                is_backspace: true,
                special_key: None,
            },
        }
    }

    /// A non-printable key went down, e.g. `Key.enter` or `Key.shift`.
    pub fn special_key(timestamp_ms: i64, name: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            payload: EventPayload::KeyDown {
                is_backspace: false,
                special_key: Some(name.into()),
            },
        }
    }

    pub fn click(timestamp_ms: i64, x: i32, y: i32, button: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            payload: EventPayload::MouseClick {
                x,
                y,
                button: button.into(),
            },
        }
    }

    pub fn movement(timestamp_ms: i64, x: i32, y: i32) -> Self {
        Self {
            timestamp_ms,
            payload: EventPayload::MouseMove { x, y },
        }
    }

    pub fn scroll(timestamp_ms: i64, dx: i32, dy: i32, x: i32, y: i32) -> Self {
        Self {
            timestamp_ms,
            payload: EventPayload::MouseScroll { dx, dy, x, y },
        }
    }

    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::KeyDown { .. } => EventKind::KeyDown,
            EventPayload::MouseClick { .. } => EventKind::MouseClick,
            EventPayload::MouseMove { .. } => EventKind::MouseMove,
            EventPayload::MouseScroll { .. } => EventKind::MouseScroll,
        }
    }

    /// Whether this is a backspace key-down.
    pub fn is_backspace(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::KeyDown {
                is_backspace: true,
                ..
            }
        )
    }

    /// Pointer position for move events.
    pub fn move_position(&self) -> Option<(i32, i32)> {
        match self.payload {
            EventPayload::MouseMove { x, y } => Some((x, y)),
            _ => None,
        }
    }

    /// Serialize to a single NDJSON line (without the trailing newline).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a single NDJSON line.
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_down_wire_format() {
        let line = RawEvent::key_down(1_000).to_json_line().unwrap();
        assert_eq!(line, r#"{"t":1000,"type":"key_down"}"#);

        let line = RawEvent::backspace(1_001).to_json_line().unwrap();
        assert_eq!(line, r#"{"t":1001,"type":"key_down","is_backspace":true}"#);
    }

    #[test]
    fn test_mouse_wire_format() {
        let line = RawEvent::click(5, 10, 20, "Button.left").to_json_line().unwrap();
        assert_eq!(
            line,
            r#"{"t":5,"type":"mouse_click","x":10,"y":20,"btn":"Button.left"}"#
        );

        let line = RawEvent::scroll(6, 0, -1, 3, 4).to_json_line().unwrap();
        assert_eq!(
            line,
            r#"{"t":6,"type":"mouse_scroll","dx":0,"dy":-1,"x":3,"y":4}"#
        );
    }

    #[test]
    fn test_parse_special_key_line() {
        let event = RawEvent::from_json_line(r#"{"t":42,"type":"key_down","special":"Key.enter"}"#)
            .unwrap();
        assert_eq!(event, RawEvent::special_key(42, "Key.enter"));
        assert_eq!(event.kind(), EventKind::KeyDown);
        assert!(!event.is_backspace());
    }

    #[test]
    fn test_parse_rejects_truncated_line() {
        assert!(RawEvent::from_json_line(r#"{"t":42,"type":"mouse_mo"#).is_err());
        assert!(RawEvent::from_json_line(r#"{"t":42,"type":"teleport"}"#).is_err());
    }

    #[test]
    fn test_move_position() {
        assert_eq!(RawEvent::movement(0, 3, 4).move_position(), Some((3, 4)));
        assert_eq!(RawEvent::key_down(0).move_position(), None);
    }
}
