//! Settings persistence
//!
//! Settings live as pretty JSON under the user config directory:
//! - Linux: `~/.config/hotclick/settings.json`
//!
//! Loading merges over defaults, so files written by older versions (or
//! edited by hand) keep working. Saving goes through a temp file and a
//! rename so a crash never leaves a truncated file behind.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::arbiter::BindingsSource;
use crate::config::{validate, HotkeyBindings, RuntimeConfig, Settings, ValidationError};
use crate::ClickerError;

struct Stored {
    settings: Settings,
    modified: Option<SystemTime>,
}

/// Shared, file-backed settings.
pub struct SettingsStore {
    path: PathBuf,
    stored: Mutex<Stored>,
}

impl SettingsStore {
    /// `<config dir>/hotclick/settings.json`
    pub fn default_path() -> Result<PathBuf, ClickerError> {
        dirs::config_dir()
            .map(|dir| dir.join("hotclick").join("settings.json"))
            .ok_or_else(|| {
                ClickerError::Settings("could not determine the config directory".to_string())
            })
    }

    /// Open the store at `path`. A missing or unreadable file yields defaults.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (settings, modified) = match load(&path) {
            Ok(Some(loaded)) => {
                info!("Loaded settings from {}", path.display());
                loaded
            }
            Ok(None) => {
                info!("No settings at {}, using defaults", path.display());
                (Settings::default(), None)
            }
            Err(e) => {
                warn!("Ignoring settings at {}: {}", path.display(), e);
                (Settings::default(), None)
            }
        };

        Self {
            path,
            stored: Mutex::new(Stored { settings, modified }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current settings
    pub fn snapshot(&self) -> Settings {
        self.lock().settings.clone()
    }

    /// Validate the current settings. The lock is only held for the copy.
    pub fn runtime_config(&self) -> Result<RuntimeConfig, ValidationError> {
        let settings = self.snapshot();
        validate(&settings)
    }

    /// Change settings in place and save them.
    pub fn update<F>(&self, change: F) -> Result<(), ClickerError>
    where
        F: FnOnce(&mut Settings),
    {
        let mut stored = self.lock();
        change(&mut stored.settings);
        stored.modified = write_atomic(&self.path, &stored.settings)?;
        Ok(())
    }

    /// Re-read the file if it changed on disk since the last load or save.
    ///
    /// Returns `true` when new settings were picked up.
    pub fn reload_if_changed(&self) -> bool {
        let modified = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return false,
        };

        let mut stored = self.lock();
        if stored.modified == Some(modified) {
            return false;
        }

        match load(&self.path) {
            Ok(Some((settings, modified))) => {
                debug!("Settings changed on disk, reloaded");
                stored.modified = modified;
                if stored.settings == settings {
                    return false;
                }
                stored.settings = settings;
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Settings file changed but could not be read: {}", e);
                // Don't retry until the file changes again.
                stored.modified = Some(modified);
                false
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Stored> {
        self.stored.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BindingsSource for SettingsStore {
    fn hotkeys(&self) -> HotkeyBindings {
        self.lock().settings.hotkeys()
    }
}

fn load(path: &Path) -> Result<Option<(Settings, Option<SystemTime>)>, ClickerError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok();
    let settings: Settings = serde_json::from_str(&contents)?;
    Ok(Some((settings, modified)))
}

fn write_atomic(path: &Path, settings: &Settings) -> Result<Option<SystemTime>, ClickerError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let contents = serde_json::to_string_pretty(settings)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    debug!("Settings saved to {}", path.display());

    Ok(fs::metadata(path).and_then(|m| m.modified()).ok())
}

/// A single settings field addressable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingField {
    CodeDisplay,
    RateMode,
    StaticCps,
    StaticVariance,
    IntervalHours,
    IntervalMinutes,
    IntervalSeconds,
    IntervalMilliseconds,
    OutputMode,
    MouseButton,
    ToggleMode,
}

impl SettingField {
    pub const ALL: [SettingField; 11] = [
        SettingField::CodeDisplay,
        SettingField::RateMode,
        SettingField::StaticCps,
        SettingField::StaticVariance,
        SettingField::IntervalHours,
        SettingField::IntervalMinutes,
        SettingField::IntervalSeconds,
        SettingField::IntervalMilliseconds,
        SettingField::OutputMode,
        SettingField::MouseButton,
        SettingField::ToggleMode,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SettingField::CodeDisplay => "code-display",
            SettingField::RateMode => "rate-mode",
            SettingField::StaticCps => "cps",
            SettingField::StaticVariance => "variance",
            SettingField::IntervalHours => "hours",
            SettingField::IntervalMinutes => "minutes",
            SettingField::IntervalSeconds => "seconds",
            SettingField::IntervalMilliseconds => "millis",
            SettingField::OutputMode => "output-mode",
            SettingField::MouseButton => "button",
            SettingField::ToggleMode => "toggle-mode",
        }
    }

    /// Store `value` into `settings`.
    ///
    /// Numeric fields keep the raw text (validation happens later); mode
    /// fields must name one of their variants.
    pub fn apply(self, settings: &mut Settings, value: &str) -> Result<(), ClickerError> {
        let text = value.trim().to_string();
        match self {
            SettingField::CodeDisplay => settings.code_display = self.parse_variant(&text)?,
            SettingField::RateMode => settings.rate_mode = self.parse_variant(&text)?,
            SettingField::StaticCps => settings.static_cps = text,
            SettingField::StaticVariance => settings.static_variance = text,
            SettingField::IntervalHours => settings.interval_hours = text,
            SettingField::IntervalMinutes => settings.interval_minutes = text,
            SettingField::IntervalSeconds => settings.interval_seconds = text,
            SettingField::IntervalMilliseconds => settings.interval_milliseconds = text,
            SettingField::OutputMode => settings.output_mode = self.parse_variant(&text)?,
            SettingField::MouseButton => settings.mouse_button = self.parse_variant(&text)?,
            SettingField::ToggleMode => settings.toggle_mode = self.parse_variant(&text)?,
        }
        Ok(())
    }

    fn parse_variant<T: serde::de::DeserializeOwned>(self, text: &str) -> Result<T, ClickerError> {
        let normalized = text.to_lowercase().replace('-', "_");
        serde_json::from_value(Value::String(normalized)).map_err(|_| {
            ClickerError::InvalidSetting {
                field: self.name().to_string(),
                value: text.to_string(),
            }
        })
    }
}

impl FromStr for SettingField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        match wanted.as_str() {
            "static-cps" => return Ok(SettingField::StaticCps),
            "milliseconds" | "ms" => return Ok(SettingField::IntervalMilliseconds),
            "mouse-button" => return Ok(SettingField::MouseButton),
            _ => {}
        }
        SettingField::ALL
            .into_iter()
            .find(|field| field.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = SettingField::ALL.iter().map(|f| f.name()).collect();
                format!("unknown setting '{}' ({})", s, names.join(", "))
            })
    }
}
