//! Input simulation
//!
//! Two backends inject synthetic clicks and key taps:
//! - XTest, talking to the X server directly through x11rb
//! - ydotool, which sends events via uinput at the kernel level and so also
//!   works on Wayland. Requires the ydotoold daemon:
//!   sudo systemctl enable --now ydotoold
//!
//! Key codes passed in are evdev codes (see [`crate::keycode`]).

use std::process::Command;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, trace};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    ConnectionExt as _, Window, BUTTON_PRESS_EVENT, BUTTON_RELEASE_EVENT, KEY_PRESS_EVENT,
    KEY_RELEASE_EVENT,
};
use x11rb::protocol::xtest::ConnectionExt as _;
use x11rb::rust_connection::RustConnection;

use crate::config::MouseButton;
use crate::keycode::X11_KEYCODE_OFFSET;
use crate::ClickerError;

/// Capability to inject input events.
///
/// Every call is synchronous; `Err` means the OS did not confirm the event.
pub trait InputInjector: Send + Sync {
    /// Press and release a mouse button
    fn click(&self, button: MouseButton) -> Result<(), ClickerError>;

    /// Press and release a key
    fn key_tap(&self, physical_code: u32) -> Result<(), ClickerError>;

    /// Map a physical key code to the layout-aware code
    fn map_to_logical_key(&self, physical_code: u32) -> Result<u32, ClickerError>;
}

/// Which injector to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backend {
    #[default]
    XTest,
    Ydotool,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "xtest" | "x11" => Ok(Backend::XTest),
            "ydotool" | "uinput" => Ok(Backend::Ydotool),
            other => Err(format!("unknown backend '{}' (xtest, ydotool)", other)),
        }
    }
}

/// Create the injector for `backend`
pub fn create_injector(backend: Backend) -> Result<Arc<dyn InputInjector>, ClickerError> {
    Ok(match backend {
        Backend::XTest => Arc::new(XTestInjector::new()?),
        Backend::Ydotool => Arc::new(YdotoolInjector::new()?),
    })
}

/// X11 button number for a mouse button
fn x11_button(button: MouseButton) -> u8 {
    match button {
        MouseButton::Left => 1,
        MouseButton::Middle => 2,
        MouseButton::Right => 3,
    }
}

fn x11_keycode(physical_code: u32) -> Result<u8, ClickerError> {
    physical_code
        .checked_add(X11_KEYCODE_OFFSET)
        .and_then(|code| u8::try_from(code).ok())
        .ok_or_else(|| {
            ClickerError::SendEvent(format!("key code {} has no X11 keycode", physical_code))
        })
}

/// Input simulator using the XTEST extension
pub struct XTestInjector {
    conn: RustConnection,
    root: Window,
}

impl XTestInjector {
    pub fn new() -> Result<Self, ClickerError> {
        info!("Connecting to X server for XTest input...");

        let (conn, screen_num) = x11rb::connect(None)
            .map_err(|e| ClickerError::InputAccess(format!("Failed to connect to X11: {}", e)))?;
        let root = conn.setup().roots[screen_num].root;

        let version = conn
            .xtest_get_version(2, 2)
            .map_err(|e| ClickerError::InputAccess(format!("XTest unavailable: {}", e)))?
            .reply()
            .map_err(|e| ClickerError::InputAccess(format!("XTest unavailable: {}", e)))?;

        info!(
            "XTest {}.{} ready",
            version.major_version, version.minor_version
        );
        Ok(Self { conn, root })
    }

    /// Send one fake event and wait for the server to accept it
    fn fake(&self, event_type: u8, detail: u8) -> Result<(), ClickerError> {
        self.conn
            .xtest_fake_input(event_type, detail, x11rb::CURRENT_TIME, self.root, 0, 0, 0)
            .map_err(|e| ClickerError::SendEvent(e.to_string()))?
            .check()
            .map_err(|e| ClickerError::SendEvent(e.to_string()))
    }
}

impl InputInjector for XTestInjector {
    fn click(&self, button: MouseButton) -> Result<(), ClickerError> {
        trace!("Click mouse | button={}", button);
        let detail = x11_button(button);
        self.fake(BUTTON_PRESS_EVENT, detail)?;
        self.fake(BUTTON_RELEASE_EVENT, detail)
    }

    fn key_tap(&self, physical_code: u32) -> Result<(), ClickerError> {
        trace!("Tap key | code={}", physical_code);
        let keycode = x11_keycode(physical_code)?;
        self.fake(KEY_PRESS_EVENT, keycode)?;
        self.fake(KEY_RELEASE_EVENT, keycode)
    }

    fn map_to_logical_key(&self, physical_code: u32) -> Result<u32, ClickerError> {
        let keycode = x11_keycode(physical_code)?;
        let reply = self
            .conn
            .get_keyboard_mapping(keycode, 1)
            .map_err(|e| ClickerError::InputAccess(e.to_string()))?
            .reply()
            .map_err(|e| ClickerError::InputAccess(e.to_string()))?;

        reply
            .keysyms
            .iter()
            .copied()
            .find(|&keysym| keysym != 0)
            .ok_or_else(|| {
                ClickerError::InputAccess(format!("no keysym for key code {}", physical_code))
            })
    }
}

/// Get the ydotool socket path
fn get_socket_path() -> String {
    let uid = unsafe { libc::getuid() };
    format!("/run/user/{}/.ydotool_socket", uid)
}

/// ydotool click code: button id plus the "down then up" flags.
fn ydotool_button(button: MouseButton) -> &'static str {
    match button {
        MouseButton::Left => "0xC0",
        MouseButton::Right => "0xC1",
        MouseButton::Middle => "0xC2",
    }
}

/// Input simulator that sends synthetic inputs via ydotool
pub struct YdotoolInjector {
    socket_path: String,
}

impl YdotoolInjector {
    /// Create a new YdotoolInjector
    ///
    /// Requires ydotool to be installed and ydotoold daemon running.
    pub fn new() -> Result<Self, ClickerError> {
        info!("Checking for ydotool...");

        let output = Command::new("which")
            .arg("ydotool")
            .output()
            .map_err(|e| {
                ClickerError::InputAccess(format!("Failed to check for ydotool: {}", e))
            })?;

        if !output.status.success() {
            return Err(ClickerError::InputAccess(
                "ydotool not found. Install it: sudo pacman -S ydotool".to_string(),
            ));
        }

        let socket_path = get_socket_path();
        if !std::path::Path::new(&socket_path).exists() {
            return Err(ClickerError::InputAccess(format!(
                "ydotoold socket {} missing. Start it: sudo systemctl enable --now ydotoold",
                socket_path
            )));
        }

        info!("ydotool ready (socket {})", socket_path);
        Ok(Self { socket_path })
    }

    /// Run a ydotool command with the socket path set
    fn run_ydotool(&self, args: &[&str]) -> Result<(), ClickerError> {
        trace!("ydotool {}", args.join(" "));

        let output = Command::new("ydotool")
            .env("YDOTOOL_SOCKET", &self.socket_path)
            .args(args)
            .output()
            .map_err(|e| ClickerError::SendEvent(format!("Failed to run ydotool: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClickerError::SendEvent(format!("ydotool failed: {}", stderr)));
        }

        Ok(())
    }
}

impl InputInjector for YdotoolInjector {
    fn click(&self, button: MouseButton) -> Result<(), ClickerError> {
        self.run_ydotool(&["click", ydotool_button(button)])
    }

    fn key_tap(&self, physical_code: u32) -> Result<(), ClickerError> {
        // ydotool key format: keycode:1 (down) keycode:0 (up)
        let down = format!("{}:1", physical_code);
        let up = format!("{}:0", physical_code);
        self.run_ydotool(&["key", &down, &up])
    }

    fn map_to_logical_key(&self, physical_code: u32) -> Result<u32, ClickerError> {
        // uinput works on evdev codes, there is no separate layout mapping
        Ok(physical_code)
    }
}
