//! macOS implementation of event collection using CGEvent tap.
//!
//! This module captures keyboard and mouse events at the system level using
//! macOS's Core Graphics event tap API. It requires Input Monitoring permission.

use crate::collector::types::{now_ms, RawEvent};
use crate::collector::CaptureSource;
use core_foundation::runloop::{kCFRunLoopCommonModes, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventType, CallbackResult, EventField,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Virtual keycode of the Delete (backspace) key.
const KEYCODE_BACKSPACE: i64 = 51;

/// Configuration for which event sources to capture.
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

/// The macOS event collector using CGEvent tap.
pub struct MacOSCollector {
    config: CollectorConfig,
    sender: Sender<RawEvent>,
    receiver: Receiver<RawEvent>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl MacOSCollector {
    /// Create a new macOS collector with the given configuration.
    pub fn new(config: CollectorConfig) -> Self {
        // Use a bounded channel to prevent unbounded memory growth
        let (sender, receiver) = bounded(config.channel_capacity.max(1));

        Self {
            config,
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&self) -> Option<RawEvent> {
        self.receiver.try_recv().ok()
    }
}

impl CaptureSource for MacOSCollector {
    /// Start capturing events in a background thread.
    ///
    /// Returns an error if:
    /// - The collector is already running
    /// - Input Monitoring permission is not granted
    fn start(&mut self) -> Result<(), CollectorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }
        if !check_permission() {
            return Err(CollectorError::PermissionDenied);
        }

        self.running.store(true, Ordering::SeqCst);

        let sender = self.sender.clone();
        let running = self.running.clone();
        let config = self.config.clone();

        let handle = thread::spawn(move || {
            if let Err(e) = run_event_loop(sender, running.clone(), config) {
                tracing::error!(error = %e, "event tap loop exited");
            }
            running.store(false, Ordering::SeqCst);
        });

        self.thread_handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            // The thread exits once its run loop slice sees running == false
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn receiver(&self) -> &Receiver<RawEvent> {
        &self.receiver
    }
}

impl Drop for MacOSCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Errors that can occur during event collection.
#[derive(Debug)]
pub enum CollectorError {
    AlreadyRunning,
    PermissionDenied,
    TapCreationFailed,
    RunLoopSourceFailed,
}

impl std::fmt::Display for CollectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorError::AlreadyRunning => write!(f, "Collector is already running"),
            CollectorError::PermissionDenied => write!(
                f,
                "Input Monitoring permission not granted (System Settings > Privacy & Security > Input Monitoring)"
            ),
            CollectorError::TapCreationFailed => write!(f, "Failed to create CGEvent tap"),
            CollectorError::RunLoopSourceFailed => {
                write!(f, "Failed to create run loop source")
            }
        }
    }
}

impl std::error::Error for CollectorError {}

/// Build a list of event types to capture based on configuration.
fn build_event_types(config: &CollectorConfig) -> Vec<CGEventType> {
    let mut types = Vec::new();

    if config.capture_keyboard {
        types.push(CGEventType::KeyDown);
        types.push(CGEventType::FlagsChanged);
    }

    if config.capture_mouse {
        types.push(CGEventType::MouseMoved);
        types.push(CGEventType::LeftMouseDown);
        types.push(CGEventType::RightMouseDown);
        types.push(CGEventType::LeftMouseDragged);
        types.push(CGEventType::RightMouseDragged);
        types.push(CGEventType::ScrollWheel);
    }

    types
}

/// Run the Core Graphics event loop.
fn run_event_loop(
    sender: Sender<RawEvent>,
    running: Arc<AtomicBool>,
    config: CollectorConfig,
) -> Result<(), CollectorError> {
    let event_types = build_event_types(&config);

    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        event_types,
        move |_proxy, event_type, event| {
            if let Some(raw) = process_cg_event(event_type, event) {
                // Don't block the tap if the channel is full - just drop the event
                let _ = sender.try_send(raw);
            }
            // Return the event unchanged (we're passive observers)
            CallbackResult::Keep
        },
    )
    .map_err(|_| CollectorError::TapCreationFailed)?;

    let source = tap
        .mach_port()
        .create_runloop_source(0)
        .map_err(|_| CollectorError::RunLoopSourceFailed)?;

    let run_loop = CFRunLoop::get_current();
    unsafe {
        run_loop.add_source(&source, kCFRunLoopCommonModes);
    }

    tap.enable();

    while running.load(Ordering::SeqCst) {
        // Run the loop for a short interval, then check if we should stop
        CFRunLoop::run_in_mode(
            unsafe { kCFRunLoopCommonModes },
            std::time::Duration::from_millis(100),
            false,
        );
    }

    // The tap is automatically disabled when dropped
    Ok(())
}

/// Symbolic name for a non-printable virtual keycode.
fn special_key_name(keycode: i64) -> Option<&'static str> {
    let name = match keycode {
        36 | 76 => "Key.enter",
        48 => "Key.tab",
        49 => "Key.space",
        53 => "Key.esc",
        117 => "Key.delete",
        115 => "Key.home",
        119 => "Key.end",
        116 => "Key.page_up",
        121 => "Key.page_down",
        123 => "Key.left",
        124 => "Key.right",
        125 => "Key.down",
        126 => "Key.up",
        122 => "Key.f1",
        120 => "Key.f2",
        99 => "Key.f3",
        118 => "Key.f4",
        96 => "Key.f5",
        97 => "Key.f6",
        98 => "Key.f7",
        100 => "Key.f8",
        101 => "Key.f9",
        109 => "Key.f10",
        103 => "Key.f11",
        111 => "Key.f12",
        _ => return None,
    };
    Some(name)
}

/// Modifier name and the flag that is set while it is held.
fn modifier_key(keycode: i64) -> Option<(&'static str, CGEventFlags)> {
    match keycode {
        56 | 60 => Some(("Key.shift", CGEventFlags::CGEventFlagShift)),
        59 | 62 => Some(("Key.ctrl", CGEventFlags::CGEventFlagControl)),
        58 | 61 => Some(("Key.alt", CGEventFlags::CGEventFlagAlternate)),
        55 | 54 => Some(("Key.cmd", CGEventFlags::CGEventFlagCommand)),
        57 => Some(("Key.caps_lock", CGEventFlags::CGEventFlagAlphaShift)),
        _ => None,
    }
}

/// Process a CGEvent and convert it to a RawEvent.
///
/// Privacy: printable keycodes are reduced to a bare key-down.
fn process_cg_event(event_type: CGEventType, event: &CGEvent) -> Option<RawEvent> {
    use core_graphics::event::CGEventType::*;

    let t = now_ms();
    match event_type {
        KeyDown => {
            let keycode = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE);
            if keycode == KEYCODE_BACKSPACE {
                Some(RawEvent::backspace(t))
            } else if let Some(name) = special_key_name(keycode) {
                Some(RawEvent::special_key(t, name))
            } else {
                Some(RawEvent::key_down(t))
            }
        }

        // Modifier change: only the press counts as a key-down
        FlagsChanged => {
            let keycode = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE);
            let (name, flag) = modifier_key(keycode)?;
            if event.get_flags().contains(flag) {
                Some(RawEvent::special_key(t, name))
            } else {
                None
            }
        }

        MouseMoved | LeftMouseDragged | RightMouseDragged => {
            let location = event.location();
            Some(RawEvent::movement(t, location.x as i32, location.y as i32))
        }

        LeftMouseDown => {
            let location = event.location();
            Some(RawEvent::click(
                t,
                location.x as i32,
                location.y as i32,
                "Button.left",
            ))
        }

        RightMouseDown => {
            let location = event.location();
            Some(RawEvent::click(
                t,
                location.x as i32,
                location.y as i32,
                "Button.right",
            ))
        }

        ScrollWheel => {
            let location = event.location();
            let dy = event.get_integer_value_field(EventField::SCROLL_WHEEL_EVENT_DELTA_AXIS_1);
            let dx = event.get_integer_value_field(EventField::SCROLL_WHEEL_EVENT_DELTA_AXIS_2);
            Some(RawEvent::scroll(
                t,
                dx as i32,
                dy as i32,
                location.x as i32,
                location.y as i32,
            ))
        }

        _ => None,
    }
}

/// Check if the application has Input Monitoring permission.
///
/// macOS doesn't provide a direct API for this, so a passive tap is created
/// and dropped; creation fails when permission is missing.
pub fn check_permission() -> bool {
    let result = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::KeyDown],
        |_proxy, _type, _event| CallbackResult::Keep,
    );

    result.is_ok()
}
