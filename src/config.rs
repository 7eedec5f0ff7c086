//! Settings and runtime configuration
//!
//! [`Settings`] is what the user edits and what gets persisted; numeric
//! fields hold the raw text so a half-typed value survives a save.
//! [`validate`] turns a settings snapshot into an immutable
//! [`RuntimeConfig`] or the first [`ValidationError`] it finds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::constants::{MAX_INTERVAL, MIN_RATE};
use crate::keycode::pretty_name;

/// A user-assigned key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bind {
    /// Name reported by the OS when the key was captured
    pub display_name: String,
    /// Layout-independent key code (evdev)
    pub physical_code: Option<u32>,
    /// Layout-aware key code (X11 keysym)
    pub logical_code: Option<u32>,
}

impl Bind {
    pub fn new(display_name: impl Into<String>, physical_code: u32) -> Self {
        Self {
            display_name: display_name.into(),
            physical_code: Some(physical_code),
            logical_code: None,
        }
    }

    /// Attach the layout-aware code
    pub fn with_logical_code(mut self, logical_code: u32) -> Self {
        self.logical_code = Some(logical_code);
        self
    }

    pub fn is_set(&self) -> bool {
        self.physical_code.is_some()
    }

    /// Two binds are the same key only if both are set and share a code.
    pub fn same_key(&self, other: &Bind) -> bool {
        matches!((self.physical_code, other.physical_code), (Some(a), Some(b)) if a == b)
    }

    /// Render for display, e.g. `F6 (0x40)`.
    pub fn format(&self, display: CodeDisplay) -> String {
        match self.physical_code {
            None => "Not Set".to_string(),
            Some(code) => {
                let name = pretty_name(&self.display_name);
                match display {
                    CodeDisplay::Hex => format!("{} (0x{:X})", name, code),
                    CodeDisplay::Decimal => format!("{} ({})", name, code),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeDisplay {
    #[default]
    Hex,
    Decimal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateMode {
    /// Clicks per second with jitter
    #[default]
    Static,
    /// Fixed time between clicks
    Interval,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    #[default]
    Mouse,
    Keyboard,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    Left,
    Middle,
    Right,
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MouseButton::Left => write!(f, "left"),
            MouseButton::Middle => write!(f, "middle"),
            MouseButton::Right => write!(f, "right"),
        }
    }
}

/// How the start bind drives the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleMode {
    /// Run while the start bind is held
    #[default]
    Press,
    /// Each press of the start bind flips running/stopped
    Toggle,
    /// Start bind only starts, stop bind only stops
    #[serde(alias = "separate_toggle")]
    SeparateStop,
}

/// Raw, user-editable settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub code_display: CodeDisplay,
    pub rate_mode: RateMode,
    pub static_cps: String,
    pub static_variance: String,
    pub interval_hours: String,
    pub interval_minutes: String,
    pub interval_seconds: String,
    pub interval_milliseconds: String,
    pub output_mode: OutputMode,
    pub mouse_button: MouseButton,
    pub output_key: Bind,
    pub toggle_mode: ToggleMode,
    pub start_bind: Bind,
    pub stop_bind: Bind,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            code_display: CodeDisplay::Hex,
            rate_mode: RateMode::Static,
            static_cps: "12".to_string(),
            static_variance: "1".to_string(),
            interval_hours: "0".to_string(),
            interval_minutes: "0".to_string(),
            interval_seconds: "0".to_string(),
            interval_milliseconds: "100".to_string(),
            output_mode: OutputMode::Mouse,
            mouse_button: MouseButton::Left,
            output_key: Bind::default(),
            toggle_mode: ToggleMode::Press,
            start_bind: Bind::default(),
            stop_bind: Bind::default(),
        }
    }
}

impl Settings {
    pub fn bind_mut(&mut self, target: BindTarget) -> &mut Bind {
        match target {
            BindTarget::Start => &mut self.start_bind,
            BindTarget::Stop => &mut self.stop_bind,
            BindTarget::Output => &mut self.output_key,
        }
    }

    /// The subset of settings the hotkey arbiter reads on every key event.
    pub fn hotkeys(&self) -> HotkeyBindings {
        HotkeyBindings {
            start: self.start_bind.physical_code,
            stop: self.stop_bind.physical_code,
            mode: self.toggle_mode,
        }
    }
}

/// Which bind slot a capture or clear operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindTarget {
    Start,
    Stop,
    Output,
}

impl fmt::Display for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindTarget::Start => write!(f, "start bind"),
            BindTarget::Stop => write!(f, "stop bind"),
            BindTarget::Output => write!(f, "output key"),
        }
    }
}

impl FromStr for BindTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "start" => Ok(BindTarget::Start),
            "stop" => Ok(BindTarget::Stop),
            "output" | "output-key" => Ok(BindTarget::Output),
            other => Err(format!("unknown bind '{}' (start, stop, output)", other)),
        }
    }
}

/// Live hotkey assignment, copied out of settings per key event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HotkeyBindings {
    pub start: Option<u32>,
    pub stop: Option<u32>,
    pub mode: ToggleMode,
}

/// Firing cadence of a validated configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rate {
    Static { base_rate: f64, variance: f64 },
    Interval { period: Duration },
}

/// What a single firing injects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Mouse(MouseButton),
    Keyboard { physical_code: u32 },
}

/// Immutable, validated snapshot consumed by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub rate: Rate,
    pub output: Output,
    pub toggle_mode: ToggleMode,
    pub start_bind: Bind,
    pub stop_bind: Bind,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Start bind is required")]
    StartBindRequired,

    #[error("Start bind and stop bind cannot be the same")]
    StartEqualsStop,

    #[error("Separate stop mode requires a stop bind")]
    StopBindRequired,

    #[error("Output key is required in keyboard mode")]
    OutputKeyRequired,

    #[error("Start bind cannot match output key")]
    OutputMatchesStart,

    #[error("Stop bind cannot match output key")]
    OutputMatchesStop,

    #[error("{field} must be a number")]
    NotANumber { field: &'static str },

    #[error("{field} must be an integer")]
    NotAnInteger { field: &'static str },

    #[error("{field} must be >= {minimum}")]
    BelowMinimum { field: &'static str, minimum: f64 },

    #[error("Interval must be greater than 0")]
    IntervalNotPositive,

    #[error("Interval is too long")]
    IntervalTooLong,
}

/// Validate a settings snapshot.
///
/// Rules are checked in a fixed order and the first failure wins. The
/// function is pure: the same settings always give the same answer.
pub fn validate(settings: &Settings) -> Result<RuntimeConfig, ValidationError> {
    let start = &settings.start_bind;
    let stop = &settings.stop_bind;

    if !start.is_set() {
        return Err(ValidationError::StartBindRequired);
    }
    if start.same_key(stop) {
        return Err(ValidationError::StartEqualsStop);
    }
    if settings.toggle_mode == ToggleMode::SeparateStop && !stop.is_set() {
        return Err(ValidationError::StopBindRequired);
    }

    let output = match settings.output_mode {
        OutputMode::Mouse => Output::Mouse(settings.mouse_button),
        OutputMode::Keyboard => {
            let key = &settings.output_key;
            let physical_code = key
                .physical_code
                .ok_or(ValidationError::OutputKeyRequired)?;
            if start.same_key(key) {
                return Err(ValidationError::OutputMatchesStart);
            }
            if stop.same_key(key) {
                return Err(ValidationError::OutputMatchesStop);
            }
            Output::Keyboard { physical_code }
        }
    };

    let rate = match settings.rate_mode {
        RateMode::Static => Rate::Static {
            base_rate: parse_number(&settings.static_cps, "Static CPS", MIN_RATE)?,
            variance: parse_number(&settings.static_variance, "Variance", 0.0)?,
        },
        RateMode::Interval => Rate::Interval {
            period: interval_period(settings)?,
        },
    };

    Ok(RuntimeConfig {
        rate,
        output,
        toggle_mode: settings.toggle_mode,
        start_bind: start.clone(),
        stop_bind: stop.clone(),
    })
}

fn parse_number(text: &str, field: &'static str, minimum: f64) -> Result<f64, ValidationError> {
    let value: f64 = text
        .trim()
        .parse()
        .map_err(|_| ValidationError::NotANumber { field })?;
    if !value.is_finite() {
        return Err(ValidationError::NotANumber { field });
    }
    if value < minimum {
        return Err(ValidationError::BelowMinimum { field, minimum });
    }
    Ok(value)
}

fn parse_count(text: &str, field: &'static str) -> Result<u64, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    let value: i64 = trimmed
        .parse()
        .map_err(|_| ValidationError::NotAnInteger { field })?;
    u64::try_from(value).map_err(|_| ValidationError::BelowMinimum { field, minimum: 0.0 })
}

fn interval_period(settings: &Settings) -> Result<Duration, ValidationError> {
    let hours = parse_count(&settings.interval_hours, "Hours")?;
    let minutes = parse_count(&settings.interval_minutes, "Minutes")?;
    let seconds = parse_count(&settings.interval_seconds, "Seconds")?;
    let millis = parse_count(&settings.interval_milliseconds, "Milliseconds")?;

    let whole_seconds = hours
        .checked_mul(3600)
        .and_then(|h| minutes.checked_mul(60).and_then(|m| h.checked_add(m)))
        .and_then(|hm| hm.checked_add(seconds))
        .ok_or(ValidationError::IntervalTooLong)?;

    let period = Duration::from_secs(whole_seconds)
        .checked_add(Duration::from_millis(millis))
        .ok_or(ValidationError::IntervalTooLong)?;

    if period.is_zero() {
        return Err(ValidationError::IntervalNotPositive);
    }
    if period > MAX_INTERVAL {
        return Err(ValidationError::IntervalTooLong);
    }
    Ok(period)
}

#[cfg(test)]
mod tests {
    use super::*;

    const F6: u32 = 64;
    const F7: u32 = 65;
    const KEY_Q: u32 = 16;

    fn valid_settings() -> Settings {
        Settings {
            start_bind: Bind::new("f6", F6),
            ..Settings::default()
        }
    }

    #[test]
    fn test_defaults_validate_once_start_bind_is_set() {
        let config = validate(&valid_settings()).unwrap();
        assert_eq!(
            config.rate,
            Rate::Static {
                base_rate: 12.0,
                variance: 1.0
            }
        );
        assert_eq!(config.output, Output::Mouse(MouseButton::Left));
        assert_eq!(config.toggle_mode, ToggleMode::Press);
    }

    #[test]
    fn test_start_bind_required() {
        let err = validate(&Settings::default()).unwrap_err();
        assert_eq!(err, ValidationError::StartBindRequired);
        assert_eq!(err.to_string(), "Start bind is required");
    }

    #[test]
    fn test_start_and_stop_must_differ() {
        let mut settings = valid_settings();
        settings.stop_bind = Bind::new("f6", F6);
        assert_eq!(
            validate(&settings).unwrap_err(),
            ValidationError::StartEqualsStop
        );
    }

    #[test]
    fn test_separate_stop_requires_stop_bind() {
        let mut settings = valid_settings();
        settings.toggle_mode = ToggleMode::SeparateStop;
        assert_eq!(
            validate(&settings).unwrap_err(),
            ValidationError::StopBindRequired
        );

        settings.stop_bind = Bind::new("f7", F7);
        assert!(validate(&settings).is_ok());
    }

    #[test]
    fn test_keyboard_output_key_rules() {
        let mut settings = valid_settings();
        settings.output_mode = OutputMode::Keyboard;
        assert_eq!(
            validate(&settings).unwrap_err(),
            ValidationError::OutputKeyRequired
        );

        settings.output_key = Bind::new("f6", F6);
        assert_eq!(
            validate(&settings).unwrap_err(),
            ValidationError::OutputMatchesStart
        );

        settings.stop_bind = Bind::new("f7", F7);
        settings.output_key = Bind::new("f7", F7);
        assert_eq!(
            validate(&settings).unwrap_err(),
            ValidationError::OutputMatchesStop
        );

        settings.output_key = Bind::new("q", KEY_Q);
        let config = validate(&settings).unwrap();
        assert_eq!(
            config.output,
            Output::Keyboard {
                physical_code: KEY_Q
            }
        );
    }

    #[test]
    fn test_output_key_ignored_in_mouse_mode() {
        let mut settings = valid_settings();
        settings.output_key = Bind::new("f6", F6);
        assert!(validate(&settings).is_ok());
    }

    #[test]
    fn test_static_rate_parsing() {
        let mut settings = valid_settings();
        settings.static_cps = " 20.5 ".to_string();
        settings.static_variance = "0".to_string();
        assert_eq!(
            validate(&settings).unwrap().rate,
            Rate::Static {
                base_rate: 20.5,
                variance: 0.0
            }
        );

        settings.static_cps = "fast".to_string();
        assert_eq!(
            validate(&settings).unwrap_err().to_string(),
            "Static CPS must be a number"
        );

        settings.static_cps = "0".to_string();
        assert_eq!(
            validate(&settings).unwrap_err().to_string(),
            "Static CPS must be >= 0.001"
        );

        settings.static_cps = "inf".to_string();
        assert!(matches!(
            validate(&settings).unwrap_err(),
            ValidationError::NotANumber { field: "Static CPS" }
        ));

        settings.static_cps = "10".to_string();
        settings.static_variance = "-1".to_string();
        assert_eq!(
            validate(&settings).unwrap_err().to_string(),
            "Variance must be >= 0"
        );
    }

    #[test]
    fn test_interval_period() {
        let mut settings = valid_settings();
        settings.rate_mode = RateMode::Interval;
        settings.interval_hours = "1".to_string();
        settings.interval_minutes = "2".to_string();
        settings.interval_seconds = "3".to_string();
        settings.interval_milliseconds = "400".to_string();

        assert_eq!(
            validate(&settings).unwrap().rate,
            Rate::Interval {
                period: Duration::from_millis(3_723_400)
            }
        );
    }

    #[test]
    fn test_interval_field_errors() {
        let mut settings = valid_settings();
        settings.rate_mode = RateMode::Interval;
        settings.interval_milliseconds = "1.5".to_string();
        assert_eq!(
            validate(&settings).unwrap_err().to_string(),
            "Milliseconds must be an integer"
        );

        settings.interval_milliseconds = "100".to_string();
        settings.interval_minutes = "-3".to_string();
        assert_eq!(
            validate(&settings).unwrap_err().to_string(),
            "Minutes must be >= 0"
        );

        settings.interval_minutes = String::new();
        settings.interval_milliseconds = "0".to_string();
        assert_eq!(
            validate(&settings).unwrap_err(),
            ValidationError::IntervalNotPositive
        );

        settings.interval_hours = "9000".to_string();
        assert_eq!(
            validate(&settings).unwrap_err(),
            ValidationError::IntervalTooLong
        );

        settings.interval_hours = "9223372036854775807".to_string();
        assert_eq!(
            validate(&settings).unwrap_err(),
            ValidationError::IntervalTooLong
        );
    }

    #[test]
    fn test_rules_short_circuit_in_order() {
        let mut settings = Settings::default();
        settings.static_cps = "nope".to_string();
        settings.output_mode = OutputMode::Keyboard;
        // Missing start bind is reported before anything else.
        assert_eq!(
            validate(&settings).unwrap_err(),
            ValidationError::StartBindRequired
        );
    }

    #[test]
    fn test_validation_is_idempotent() {
        let good = valid_settings();
        assert_eq!(validate(&good), validate(&good));

        let mut bad = valid_settings();
        bad.static_variance = "x".to_string();
        assert_eq!(validate(&bad), validate(&bad));
    }

    #[test]
    fn test_bind_same_key_requires_both_set() {
        let unset = Bind::default();
        assert!(!unset.same_key(&Bind::default()));
        assert!(!unset.same_key(&Bind::new("f6", F6)));
        assert!(Bind::new("f6", F6).same_key(&Bind::new("other name", F6)));
    }

    #[test]
    fn test_bind_format() {
        assert_eq!(Bind::default().format(CodeDisplay::Hex), "Not Set");
        assert_eq!(Bind::new("f6", F6).format(CodeDisplay::Hex), "F6 (0x40)");
        assert_eq!(
            Bind::new("page_up", 104).format(CodeDisplay::Decimal),
            "Page Up (104)"
        );
    }

    #[test]
    fn test_settings_deserialize_merges_over_defaults() {
        let settings: Settings = serde_json::from_str(
            r#"{ "static_cps": "30", "toggle_mode": "separate_toggle", "unknown": 1 }"#,
        )
        .unwrap();
        assert_eq!(settings.static_cps, "30");
        assert_eq!(settings.toggle_mode, ToggleMode::SeparateStop);
        assert_eq!(settings.static_variance, "1");
        assert_eq!(settings.interval_milliseconds, "100");
    }
}
