//! Focus detection for self-click suppression
//!
//! Uses X11 APIs to tell whether the pointer sits inside the window the
//! tool is controlled from. Clicking there would hit the tool itself, so
//! both the scheduler and the start hotkey back off.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt, Window};
use x11rb::rust_connection::RustConnection;

use crate::ClickerError;

/// X11 window id. `0` means "no window".
pub type WindowHandle = u32;

/// Trait for pointer-in-window checks
pub trait FocusProbe: Send + Sync {
    /// Whether the pointer is currently inside `window`
    fn is_pointer_inside_window(&self, window: WindowHandle) -> bool;
}

/// Trait for "a text field of the control surface has keyboard focus"
pub trait TextInputFocus: Send + Sync {
    fn is_text_input_focused(&self) -> bool;
}

/// Text focus flag that the UI flips from its focus-in/focus-out handlers.
#[derive(Debug, Default)]
pub struct TextFocusFlag {
    focused: AtomicBool,
}

impl TextFocusFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_focused(&self, focused: bool) {
        self.focused.store(focused, Ordering::SeqCst);
    }
}

impl TextInputFocus for TextFocusFlag {
    fn is_text_input_focused(&self) -> bool {
        self.focused.load(Ordering::SeqCst)
    }
}

/// Probe for sessions without X11 access. The pointer is never inside.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFocusProbe;

impl FocusProbe for NoFocusProbe {
    fn is_pointer_inside_window(&self, _window: WindowHandle) -> bool {
        false
    }
}

/// The window this process is controlled from, paired with a probe.
#[derive(Clone)]
pub struct OwnWindow {
    probe: Arc<dyn FocusProbe>,
    window: WindowHandle,
}

impl OwnWindow {
    pub fn new(probe: Arc<dyn FocusProbe>, window: WindowHandle) -> Self {
        Self { probe, window }
    }

    pub fn pointer_inside(&self) -> bool {
        self.window != 0 && self.probe.is_pointer_inside_window(self.window)
    }
}

/// X11 pointer probe using `_NET_ACTIVE_WINDOW` and `QueryPointer`
pub struct X11PointerProbe {
    conn: RustConnection,
    root: Window,
    net_active_window: Atom,
}

impl X11PointerProbe {
    /// Connect to the X server named by `$DISPLAY`
    pub fn connect() -> Result<Self, ClickerError> {
        let (conn, screen_num) = x11rb::connect(None).map_err(|e| {
            ClickerError::FocusDetection(format!("Failed to connect to X11: {}", e))
        })?;
        let root = conn.setup().roots[screen_num].root;

        let net_active_window = conn
            .intern_atom(false, b"_NET_ACTIVE_WINDOW")
            .map_err(|e| ClickerError::FocusDetection(e.to_string()))?
            .reply()
            .map_err(|e| ClickerError::FocusDetection(e.to_string()))?
            .atom;

        Ok(Self {
            conn,
            root,
            net_active_window,
        })
    }

    /// Get the active window from the window manager
    pub fn active_window(&self) -> Option<Window> {
        let reply = self
            .conn
            .get_property(
                false,
                self.root,
                self.net_active_window,
                AtomEnum::WINDOW,
                0,
                1,
            )
            .ok()?
            .reply()
            .ok()?;

        if reply.value.len() < 4 {
            return None;
        }

        let window = u32::from_ne_bytes([
            reply.value[0],
            reply.value[1],
            reply.value[2],
            reply.value[3],
        ]);

        (window != 0).then_some(window)
    }

    fn pointer_within(&self, window: Window) -> Option<bool> {
        let pointer = self.conn.query_pointer(window).ok()?.reply().ok()?;
        if !pointer.same_screen {
            return Some(false);
        }

        let geometry = self.conn.get_geometry(window).ok()?.reply().ok()?;
        let (x, y) = (i32::from(pointer.win_x), i32::from(pointer.win_y));
        Some(
            (0..=i32::from(geometry.width)).contains(&x)
                && (0..=i32::from(geometry.height)).contains(&y),
        )
    }
}

impl FocusProbe for X11PointerProbe {
    fn is_pointer_inside_window(&self, window: WindowHandle) -> bool {
        if window == 0 || self.active_window() != Some(window) {
            return false;
        }
        self.pointer_within(window).unwrap_or(false)
    }
}

/// Cached probe that wraps another probe
/// Caches the answer and only re-queries after the cache expires
pub struct CachedFocusProbe<P: FocusProbe> {
    inner: P,
    cached: Mutex<Option<(WindowHandle, Instant, bool)>>,
    cache_duration: Duration,
}

impl<P: FocusProbe> CachedFocusProbe<P> {
    pub fn new(inner: P, cache_duration: Duration) -> Self {
        Self {
            inner,
            cached: Mutex::new(None),
            cache_duration,
        }
    }
}

impl<P: FocusProbe> FocusProbe for CachedFocusProbe<P> {
    fn is_pointer_inside_window(&self, window: WindowHandle) -> bool {
        let now = Instant::now();
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some((cached_window, checked_at, inside)) = *cached {
            if cached_window == window && now.duration_since(checked_at) < self.cache_duration {
                return inside;
            }
        }

        let inside = self.inner.is_pointer_inside_window(window);
        *cached = Some((window, now, inside));
        inside
    }
}

/// Parse a window id given as decimal or `0x` hex
pub fn parse_window_handle(text: &str) -> Result<WindowHandle, String> {
    let trimmed = text.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => trimmed.parse(),
    };
    parsed.map_err(|_| format!("'{}' is not a window id", text))
}

/// Decide which window the tool is controlled from.
///
/// An explicit id wins, then `$WINDOWID` (set by most terminal emulators),
/// then whatever window is active at startup.
pub fn resolve_owning_window(
    explicit: Option<WindowHandle>,
    probe: &X11PointerProbe,
) -> WindowHandle {
    if let Some(window) = explicit {
        return window;
    }

    if let Ok(value) = std::env::var("WINDOWID") {
        match parse_window_handle(&value) {
            Ok(window) => {
                debug!("Owning window from WINDOWID: 0x{:x}", window);
                return window;
            }
            Err(e) => warn!("Ignoring WINDOWID: {}", e),
        }
    }

    match probe.active_window() {
        Some(window) => {
            info!("Owning window is the active window 0x{:x}", window);
            window
        }
        None => {
            warn!("No owning window found, self-click suppression disabled");
            0
        }
    }
}
