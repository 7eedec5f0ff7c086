//! HotClick - hotkey-driven auto-clicker
//!
//! This library provides components for:
//! - Click scheduling (drift-free timing loop with jitter and bounded catch-up)
//! - Hotkey arbitration (press / toggle / separate-stop modes)
//! - Settings validation and persistence
//! - Global key listening, input simulation and focus detection on X11

pub mod arbiter;
pub mod capture;
pub mod config;
pub mod constants;
pub mod focus_detector;
pub mod input_listener;
pub mod input_simulator;
pub mod keycode;
pub mod scheduler;
pub mod settings;
pub mod status;

pub use arbiter::{HotkeyArbiter, RawKeyEvent, SchedulerControl, Transition};
pub use capture::{BindCapture, CaptureFailure, CaptureSession};
pub use config::{validate, Bind, RuntimeConfig, Settings, ValidationError};
pub use focus_detector::{FocusProbe, OwnWindow, TextInputFocus, X11PointerProbe};
pub use input_listener::KeyListener;
pub use input_simulator::{create_injector, Backend, InputInjector};
pub use scheduler::ClickScheduler;
pub use settings::SettingsStore;
pub use status::{StatusBoard, StatusEvent};

use thiserror::Error;

/// Main error type for HotClick
#[derive(Error, Debug)]
pub enum ClickerError {
    #[error("Failed to access input backend: {0}")]
    InputAccess(String),

    #[error("Failed to send input event: {0}")]
    SendEvent(String),

    #[error("Failed to detect window focus: {0}")]
    FocusDetection(String),

    #[error("Key listener error: {0}")]
    KeyListener(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Invalid value '{value}' for {field}")]
    InvalidSetting { field: String, value: String },

    #[error("Key capture failed: {0}")]
    Capture(#[from] CaptureFailure),

    #[error("Failed to start thread: {0}")]
    Thread(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
