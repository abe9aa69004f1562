//! Feature computation from event windows.
//!
//! Each populated window is summarized as a fixed 17-field vector of
//! keyboard, mouse, idle and time-of-day features. Statistics that need more
//! samples than the window holds are left as `None` for the post-processor.

use crate::collector::types::{EventKind, RawEvent};
use crate::core::windowing::{EventWindow, WindowAssigner, WindowError, DEFAULT_WINDOW_MS};
use chrono::{TimeZone, Timelike};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::f64::consts::PI;

/// Gaps longer than this between any two events count as idle time.
pub const IDLE_GAP_THRESHOLD_MS: i64 = 2_000;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Behavioral features of one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub window_id: i64,
    /// First event timestamp (ms)
    pub t_start: i64,
    /// Last event timestamp (ms)
    pub t_end: i64,
    pub keys_total: u64,
    pub backspace: u64,
    /// backspace / keys_total, 0.0 without keys
    pub correction_rate: f64,
    /// Mean inter-key interval (ms)
    pub avg_iki: Option<f64>,
    /// Population std of inter-key intervals (ms)
    pub iki_std: Option<f64>,
    pub move_events: u64,
    /// Mean pointer speed (px/s)
    pub mouse_speed_mean: Option<f64>,
    pub mouse_speed_std: Option<f64>,
    /// Mean absolute jerk of the speed sequence
    pub mouse_jerk_mean: Option<f64>,
    /// Fraction of the nominal window span spent in long gaps
    pub idle_ratio: f64,
    pub clicks: u64,
    pub scrolls: u64,
    pub tod_sin: f64,
    pub tod_cos: f64,
}

/// Computes feature vectors for windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureAggregator {
    /// Denominator of the idle ratio
    pub nominal_span_ms: i64,
    pub idle_gap_threshold_ms: i64,
    /// Zone the time-of-day encoding is taken in
    pub timezone: Tz,
}

impl Default for FeatureAggregator {
    fn default() -> Self {
        Self {
            nominal_span_ms: DEFAULT_WINDOW_MS,
            idle_gap_threshold_ms: IDLE_GAP_THRESHOLD_MS,
            timezone: Tz::UTC,
        }
    }
}

impl FeatureAggregator {
    /// Aggregator whose idle ratio is relative to `window_ms`.
    pub fn for_window(window_ms: i64) -> Self {
        Self {
            nominal_span_ms: window_ms,
            ..Self::default()
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Compute the feature vector of a single window.
    pub fn compute(&self, window: &EventWindow) -> FeatureVector {
        let events = &window.events;
        let t_start = window.t_start();
        let t_end = window.t_end();

        let keyboard = keyboard_features(events);
        let mouse = mouse_features(events);
        let (tod_sin, tod_cos) = self.time_of_day(midpoint(t_start, t_end));

        FeatureVector {
            window_id: window.window_id,
            t_start,
            t_end,
            keys_total: keyboard.keys_total,
            backspace: keyboard.backspace,
            correction_rate: keyboard.correction_rate,
            avg_iki: keyboard.avg_iki,
            iki_std: keyboard.iki_std,
            move_events: mouse.move_events,
            mouse_speed_mean: mouse.speed_mean,
            mouse_speed_std: mouse.speed_std,
            mouse_jerk_mean: mouse.jerk_mean,
            idle_ratio: self.idle_ratio(events),
            clicks: count_kind(events, EventKind::MouseClick),
            scrolls: count_kind(events, EventKind::MouseScroll),
            tod_sin,
            tod_cos,
        }
    }

    /// Compute one vector per window, keeping window order.
    pub fn compute_all(&self, windows: &[EventWindow]) -> Vec<FeatureVector> {
        windows.iter().map(|w| self.compute(w)).collect()
    }

    /// Sum of long inter-event gaps over the nominal span, clamped to [0, 1].
    fn idle_ratio(&self, events: &[RawEvent]) -> f64 {
        if self.nominal_span_ms <= 0 {
            return 0.0;
        }
        let threshold = i128::from(self.idle_gap_threshold_ms);
        let idle_ms: i128 = events
            .windows(2)
            .map(|pair| elapsed_ms(&pair[0], &pair[1]))
            .filter(|&gap| gap > threshold)
            .sum();
        (idle_ms as f64 / self.nominal_span_ms as f64).clamp(0.0, 1.0)
    }

    /// Cyclical (sin, cos) encoding of the second of day.
    fn time_of_day(&self, timestamp_ms: i64) -> (f64, f64) {
        let seconds = match self.timezone.timestamp_millis_opt(timestamp_ms).single() {
            Some(local) => local.num_seconds_from_midnight() as i64,
            None => timestamp_ms.div_euclid(1_000).rem_euclid(86_400),
        };
        let theta = 2.0 * PI * (seconds as f64 / SECONDS_PER_DAY);
        (theta.sin(), theta.cos())
    }
}

/// Window, aggregate and return feature vectors for sorted events.
pub fn extract_features(
    events: &[RawEvent],
    assigner: &WindowAssigner,
    aggregator: &FeatureAggregator,
) -> Result<Vec<FeatureVector>, WindowError> {
    let windows = assigner.group(events)?;
    Ok(aggregator.compute_all(&windows))
}

struct KeyboardStats {
    keys_total: u64,
    backspace: u64,
    correction_rate: f64,
    avg_iki: Option<f64>,
    iki_std: Option<f64>,
}

fn keyboard_features(events: &[RawEvent]) -> KeyboardStats {
    let keys: Vec<&RawEvent> = events
        .iter()
        .filter(|e| e.kind() == EventKind::KeyDown)
        .collect();
    let keys_total = keys.len() as u64;
    let backspace = keys.iter().filter(|e| e.is_backspace()).count() as u64;
    let correction_rate = if keys_total > 0 {
        backspace as f64 / keys_total as f64
    } else {
        0.0
    };

    let (avg_iki, iki_std) = if keys.len() >= 2 {
        let intervals: Vec<f64> = keys
            .windows(2)
            .map(|pair| elapsed_ms(pair[0], pair[1]) as f64)
            .collect();
        (
            Some(intervals.iter().mean()),
            Some(intervals.iter().population_std_dev()),
        )
    } else {
        (None, None)
    };

    KeyboardStats {
        keys_total,
        backspace,
        correction_rate,
        avg_iki,
        iki_std,
    }
}

struct MouseStats {
    move_events: u64,
    speed_mean: Option<f64>,
    speed_std: Option<f64>,
    jerk_mean: Option<f64>,
}

/// Pointer kinematics over consecutive move events.
///
/// Steps with non-positive elapsed time yield no speed, and every derivative
/// depending on them is dropped too.
fn mouse_features(events: &[RawEvent]) -> MouseStats {
    let moves: Vec<(i64, i32, i32)> = events
        .iter()
        .filter_map(|e| e.move_position().map(|(x, y)| (e.timestamp_ms, x, y)))
        .collect();
    let move_events = moves.len() as u64;

    if moves.len() < 2 {
        return MouseStats {
            move_events,
            speed_mean: None,
            speed_std: None,
            jerk_mean: None,
        };
    }

    // Per step: elapsed seconds and speed (None when dt <= 0)
    let steps: Vec<(f64, Option<f64>)> = moves
        .windows(2)
        .map(|pair| {
            let (t0, x0, y0) = pair[0];
            let (t1, x1, y1) = pair[1];
            let dx = f64::from(x1) - f64::from(x0);
            let dy = f64::from(y1) - f64::from(y0);
            let dt = (i128::from(t1) - i128::from(t0)) as f64 / 1_000.0;
            let speed = (dt > 0.0).then(|| dx.hypot(dy) / dt);
            (dt, speed)
        })
        .collect();

    let speeds: Vec<f64> = steps.iter().filter_map(|&(_, s)| s).collect();
    let (speed_mean, speed_std) = if speeds.is_empty() {
        (None, None)
    } else {
        (
            Some(speeds.iter().mean()),
            Some(speeds.iter().population_std_dev()),
        )
    };

    let accelerations: Vec<Option<f64>> = steps
        .windows(2)
        .map(|pair| match (pair[0].1, pair[1]) {
            (Some(s0), (dt, Some(s1))) if dt > 0.0 => Some((s1 - s0) / dt),
            _ => None,
        })
        .collect();

    let jerks: Vec<f64> = accelerations
        .windows(2)
        .filter_map(|pair| match (pair[0], pair[1]) {
            (Some(a0), Some(a1)) => Some((a1 - a0).abs()),
            _ => None,
        })
        .collect();
    let jerk_mean = (!jerks.is_empty()).then(|| jerks.iter().mean());

    MouseStats {
        move_events,
        speed_mean,
        speed_std,
        jerk_mean,
    }
}

/// Signed time between two events, wide enough for any pair of timestamps.
fn elapsed_ms(from: &RawEvent, to: &RawEvent) -> i128 {
    i128::from(to.timestamp_ms) - i128::from(from.timestamp_ms)
}

/// `(a + b) div 2` without overflow.
fn midpoint(a: i64, b: i64) -> i64 {
    // Always lies between a and b, so it fits
    ((i128::from(a) + i128::from(b)).div_euclid(2)) as i64
}

fn count_kind(events: &[RawEvent], kind: EventKind) -> u64 {
    events.iter().filter(|e| e.kind() == kind).count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn window(events: Vec<RawEvent>) -> EventWindow {
        EventWindow {
            window_id: 0,
            events,
        }
    }

    #[test]
    fn test_keyboard_scenario() {
        let events = vec![
            RawEvent::key_down(0),
            RawEvent::key_down(100),
            RawEvent::key_down(260),
        ];
        let assigner = WindowAssigner::new(60_000).unwrap().with_base(0);
        let features =
            extract_features(&events, &assigner, &FeatureAggregator::default()).unwrap();

        assert_eq!(features.len(), 1);
        let f = &features[0];
        assert_eq!(f.window_id, 0);
        assert_eq!(f.keys_total, 3);
        assert_eq!(f.backspace, 0);
        assert_eq!(f.correction_rate, 0.0);
        assert!((f.avg_iki.unwrap() - 130.0).abs() < EPS);
        assert!((f.iki_std.unwrap() - 30.0).abs() < EPS);
    }

    #[test]
    fn test_correction_rate() {
        let events = vec![
            RawEvent::key_down(0),
            RawEvent::backspace(10),
            RawEvent::backspace(20),
            RawEvent::special_key(30, "Key.enter"),
        ];
        let f = FeatureAggregator::default().compute(&window(events));
        assert_eq!(f.keys_total, 4);
        assert_eq!(f.backspace, 2);
        assert!((f.correction_rate - 0.5).abs() < EPS);

        let f = FeatureAggregator::default().compute(&window(vec![RawEvent::movement(0, 1, 1)]));
        assert_eq!(f.keys_total, 0);
        assert_eq!(f.correction_rate, 0.0);
    }

    #[test]
    fn test_single_key_leaves_iki_undefined() {
        let f = FeatureAggregator::default().compute(&window(vec![RawEvent::key_down(5)]));
        assert_eq!(f.avg_iki, None);
        assert_eq!(f.iki_std, None);
    }

    #[test]
    fn test_mouse_kinematics() {
        // Speeds: 5/0.1 = 50, 10/0.1 = 100, 5/0.1 = 50 (px/s)
        let events = vec![
            RawEvent::movement(0, 0, 0),
            RawEvent::movement(100, 3, 4),
            RawEvent::movement(200, 9, 12),
            RawEvent::movement(300, 12, 16),
        ];
        let f = FeatureAggregator::default().compute(&window(events));
        assert_eq!(f.move_events, 4);
        let mean = f.mouse_speed_mean.unwrap();
        assert!((mean - 200.0 / 3.0).abs() < 1e-6);
        let expected_std = ((50.0f64 - mean).powi(2) * 2.0 + (100.0 - mean).powi(2)) / 3.0;
        assert!((f.mouse_speed_std.unwrap() - expected_std.sqrt()).abs() < 1e-6);
        // accel: 500, -500 -> jerk |-1000|
        assert!((f.mouse_jerk_mean.unwrap() - 1_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_mouse_zero_dt_steps_are_discarded() {
        let events = vec![
            RawEvent::movement(0, 0, 0),
            RawEvent::movement(0, 5, 0),
            RawEvent::movement(1_000, 15, 0),
        ];
        let f = FeatureAggregator::default().compute(&window(events));
        assert!((f.mouse_speed_mean.unwrap() - 10.0).abs() < EPS);
        assert_eq!(f.mouse_speed_std, Some(0.0));
        assert_eq!(f.mouse_jerk_mean, None);
    }

    #[test]
    fn test_no_moves_leaves_kinematics_undefined() {
        let f = FeatureAggregator::default().compute(&window(vec![
            RawEvent::key_down(0),
            RawEvent::movement(10, 1, 1),
        ]));
        assert_eq!(f.move_events, 1);
        assert_eq!(f.mouse_speed_mean, None);
        assert_eq!(f.mouse_speed_std, None);
        assert_eq!(f.mouse_jerk_mean, None);
    }

    #[test]
    fn test_idle_ratio_counts_long_gaps_of_any_kind() {
        let events = vec![
            RawEvent::key_down(0),
            RawEvent::click(2_000, 0, 0, "Button.left"), // exactly 2 s: not idle
            RawEvent::scroll(17_000, 0, 1, 0, 0),        // 15 s gap
            RawEvent::movement(32_000, 0, 0),            // 15 s gap
        ];
        let f = FeatureAggregator::default().compute(&window(events));
        assert!((f.idle_ratio - 0.5).abs() < EPS);
        assert_eq!(f.clicks, 1);
        assert_eq!(f.scrolls, 1);
    }

    #[test]
    fn test_idle_ratio_is_clamped() {
        let aggregator = FeatureAggregator::for_window(1_000);
        let f = aggregator.compute(&window(vec![RawEvent::key_down(0), RawEvent::key_down(5_000)]));
        assert_eq!(f.idle_ratio, 1.0);
    }

    #[test]
    fn test_time_of_day_encoding() {
        let aggregator = FeatureAggregator::default();
        let (s, c) = aggregator.time_of_day(0);
        assert!(s.abs() < EPS && (c - 1.0).abs() < EPS);

        let (s, c) = aggregator.time_of_day(6 * 3_600 * 1_000);
        assert!((s - 1.0).abs() < EPS && c.abs() < EPS);

        // Just before and after midnight are close on the circle
        let (s1, c1) = aggregator.time_of_day(86_399_000);
        let (s2, c2) = aggregator.time_of_day(86_401_000);
        assert!(((s1 - s2).powi(2) + (c1 - c2).powi(2)).sqrt() < 1e-3);
    }

    #[test]
    fn test_time_of_day_uses_timezone() {
        let tokyo: Tz = "Asia/Tokyo".parse().unwrap();
        let aggregator = FeatureAggregator::default().with_timezone(tokyo);
        // 00:00 UTC is 09:00 in Tokyo
        let (s, c) = aggregator.time_of_day(0);
        let theta = 2.0 * PI * 9.0 / 24.0;
        assert!((s - theta.sin()).abs() < EPS);
        assert!((c - theta.cos()).abs() < EPS);
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let events = vec![
            RawEvent::key_down(i64::MAX - 10),
            RawEvent::key_down(i64::MAX - 5),
        ];
        let assigner = WindowAssigner::new(60_000).unwrap();
        let features =
            extract_features(&events, &assigner, &FeatureAggregator::default()).unwrap();
        assert_eq!(features.len(), 1);
        assert!((features[0].avg_iki.unwrap() - 5.0).abs() < EPS);
        assert!(features[0].tod_sin.is_finite());

        let spread = FeatureAggregator::for_window(i64::MAX).compute(&window(vec![
            RawEvent::movement(i64::MIN + 1, 0, 0),
            RawEvent::movement(i64::MAX, 10, 0),
        ]));
        assert_eq!(spread.idle_ratio, 1.0);
        assert!(spread.mouse_speed_mean.unwrap() >= 0.0);
        assert_eq!(midpoint(i64::MIN + 1, i64::MAX), 0);
        assert_eq!(midpoint(-3, 0), -2);
    }

    #[test]
    fn test_windows_are_ordered_and_sparse() {
        let events = vec![
            RawEvent::key_down(0),
            RawEvent::key_down(10),
            RawEvent::movement(180_000, 1, 1),
        ];
        let assigner = WindowAssigner::new(60_000).unwrap();
        let features =
            extract_features(&events, &assigner, &FeatureAggregator::default()).unwrap();
        let ids: Vec<i64> = features.iter().map(|f| f.window_id).collect();
        assert_eq!(ids, vec![0, 3]);
        assert_eq!(features[1].t_start, 180_000);
        assert_eq!(features[1].t_end, 180_000);
    }
}
