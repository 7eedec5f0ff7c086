//! Tuning constants for the click scheduler and the hotkey dispatch path.

use std::time::Duration;

// ============================================================================
// SCHEDULER TIMING
// ============================================================================

/// How often an inactive scheduler wakes up to look for activation.
pub const INACTIVE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sleep between focus checks while the pointer is over the owning window.
pub const BLOCKED_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How often the static-mode rate is re-drawn from `base ± variance`.
pub const RATE_RECOMPUTE_INTERVAL: Duration = Duration::from_millis(250);

/// A deadline that has fallen this many periods behind is snapped to now.
pub const MAX_CATCH_UP_PERIODS: u32 = 4;

/// Lower bound for any effective clicks-per-second value.
pub const MIN_RATE: f64 = 0.001;

/// Longest accepted interval-mode period (one year).
pub const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 3600);

/// Final stretch of a wait spent yielding instead of sleeping.
pub const FINE_WAIT_WINDOW: Duration = Duration::from_micros(1500);

/// Upper bound on how long `shutdown()` waits for the loop to exit.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// HOTKEY DISPATCH
// ============================================================================

/// Depth of the queue between the key listener and the arbiter.
pub const KEY_EVENT_QUEUE_DEPTH: usize = 256;

/// How long the dispatch loop blocks on the key queue before doing housekeeping.
pub const DISPATCH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often a running instance checks the settings file for edits.
pub const SETTINGS_RELOAD_INTERVAL: Duration = Duration::from_millis(500);

/// How long `capture` waits for a key press.
pub const CAPTURE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// FOCUS DETECTION
// ============================================================================

/// Cache lifetime for pointer-in-window answers.
pub const FOCUS_CACHE_DURATION: Duration = Duration::from_millis(10);
