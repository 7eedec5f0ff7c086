//! Hotkey arbitration
//!
//! Translates raw key transitions into scheduler commands according to the
//! configured toggle mode. The only state kept here is the set of keys
//! currently held, used to swallow auto-repeat.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

use crate::capture::BindCapture;
use crate::config::{HotkeyBindings, ToggleMode};
use crate::focus_detector::{OwnWindow, TextInputFocus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Down,
    Up,
}

/// A key event as delivered by the key-event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawKeyEvent {
    pub physical_code: u32,
    pub transition: Transition,
    pub display_name: String,
}

impl RawKeyEvent {
    pub fn down(physical_code: u32, display_name: impl Into<String>) -> Self {
        Self {
            physical_code,
            transition: Transition::Down,
            display_name: display_name.into(),
        }
    }

    pub fn up(physical_code: u32, display_name: impl Into<String>) -> Self {
        Self {
            physical_code,
            transition: Transition::Up,
            display_name: display_name.into(),
        }
    }

    pub fn is_down(&self) -> bool {
        self.transition == Transition::Down
    }
}

/// Control surface the arbiter drives.
pub trait SchedulerControl: Send + Sync {
    fn activate(&self, reason: &str);
    fn deactivate(&self, reason: &str);
    fn toggle(&self);
}

/// Where the arbiter reads the live bind assignment from.
pub trait BindingsSource: Send + Sync {
    fn hotkeys(&self) -> HotkeyBindings;
}

impl<F> BindingsSource for F
where
    F: Fn() -> HotkeyBindings + Send + Sync,
{
    fn hotkeys(&self) -> HotkeyBindings {
        self()
    }
}

/// Command decided for one key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Activate(&'static str),
    Deactivate(&'static str),
    Toggle,
}

/// Physical keys currently held down.
#[derive(Debug, Default)]
pub struct PressedKeySet {
    keys: Mutex<HashSet<u32>>,
}

impl PressedKeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transition. Returns `false` for a repeated `Down` of a held
    /// key and for an `Up` of a key never seen going down.
    pub fn record(&self, physical_code: u32, transition: Transition) -> bool {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        match transition {
            Transition::Down => keys.insert(physical_code),
            Transition::Up => keys.remove(&physical_code),
        }
    }
}

pub struct HotkeyArbiter<C: SchedulerControl> {
    control: Arc<C>,
    bindings: Arc<dyn BindingsSource>,
    own_window: OwnWindow,
    text_focus: Arc<dyn TextInputFocus>,
    capture: Arc<BindCapture>,
    pressed: PressedKeySet,
}

impl<C: SchedulerControl> HotkeyArbiter<C> {
    pub fn new(
        control: Arc<C>,
        bindings: Arc<dyn BindingsSource>,
        own_window: OwnWindow,
        text_focus: Arc<dyn TextInputFocus>,
        capture: Arc<BindCapture>,
    ) -> Self {
        Self {
            control,
            bindings,
            own_window,
            text_focus,
            capture,
            pressed: PressedKeySet::new(),
        }
    }

    /// Process one key event and issue the resulting command, if any.
    pub fn handle(&self, event: &RawKeyEvent) -> Option<Command> {
        let command = self.decide(event)?;
        match command {
            Command::Activate(reason) => self.control.activate(reason),
            Command::Deactivate(reason) => self.control.deactivate(reason),
            Command::Toggle => self.control.toggle(),
        }
        Some(command)
    }

    fn decide(&self, event: &RawKeyEvent) -> Option<Command> {
        if self.capture.offer(event) {
            trace!("Key event routed to bind capture");
            return None;
        }

        let code = event.physical_code;
        if !self.pressed.record(code, event.transition) {
            return None;
        }

        let bindings = self.bindings.hotkeys();
        let is_down = event.is_down();

        trace!(
            "Hotkey event | {:?} | code=0x{:X} | start={:?} | stop={:?} | mode={:?}",
            event.transition,
            code,
            bindings.start,
            bindings.stop,
            bindings.mode
        );

        if is_down && bindings.stop == Some(code) {
            return Some(Command::Deactivate("stop bind"));
        }

        if bindings.start != Some(code) {
            return None;
        }

        if is_down {
            if self.text_focus.is_text_input_focused() {
                debug!("Start hotkey ignored (text input focused)");
                return None;
            }
            if self.own_window.pointer_inside() {
                debug!("Start hotkey ignored (cursor inside app window)");
                return None;
            }
        }

        match (bindings.mode, event.transition) {
            (ToggleMode::Press, Transition::Down) => Some(Command::Activate("hold bind")),
            (ToggleMode::Press, Transition::Up) => Some(Command::Deactivate("hold bind")),
            (ToggleMode::Toggle, Transition::Down) => Some(Command::Toggle),
            (ToggleMode::SeparateStop, Transition::Down) => Some(Command::Activate("stop bind")),
            (ToggleMode::Toggle | ToggleMode::SeparateStop, Transition::Up) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BindTarget;
    use crate::focus_detector::{FocusProbe, TextFocusFlag, WindowHandle};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const F6: u32 = 64;
    const F7: u32 = 65;
    const KEY_A: u32 = 30;

    #[derive(Default)]
    struct RecordingControl {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingControl {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SchedulerControl for RecordingControl {
        fn activate(&self, reason: &str) {
            self.calls.lock().unwrap().push(format!("activate:{}", reason));
        }

        fn deactivate(&self, reason: &str) {
            self.calls.lock().unwrap().push(format!("deactivate:{}", reason));
        }

        fn toggle(&self) {
            self.calls.lock().unwrap().push("toggle".to_string());
        }
    }

    #[derive(Default)]
    struct SwitchProbe {
        inside: AtomicBool,
    }

    impl FocusProbe for SwitchProbe {
        fn is_pointer_inside_window(&self, _window: WindowHandle) -> bool {
            self.inside.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        control: Arc<RecordingControl>,
        probe: Arc<SwitchProbe>,
        text_focus: Arc<TextFocusFlag>,
        capture: Arc<BindCapture>,
        arbiter: HotkeyArbiter<RecordingControl>,
    }

    fn harness(mode: ToggleMode, stop: Option<u32>) -> Harness {
        let control = Arc::new(RecordingControl::default());
        let probe = Arc::new(SwitchProbe::default());
        let text_focus = Arc::new(TextFocusFlag::new());
        let capture = Arc::new(BindCapture::new());
        let bindings = move || HotkeyBindings {
            start: Some(F6),
            stop,
            mode,
        };
        let arbiter = HotkeyArbiter::new(
            control.clone(),
            Arc::new(bindings),
            OwnWindow::new(probe.clone(), 42),
            text_focus.clone(),
            capture.clone(),
        );
        Harness {
            control,
            probe,
            text_focus,
            capture,
            arbiter,
        }
    }

    #[test]
    fn test_press_mode_holds() {
        let h = harness(ToggleMode::Press, None);
        assert_eq!(
            h.arbiter.handle(&RawKeyEvent::down(F6, "f6")),
            Some(Command::Activate("hold bind"))
        );
        assert_eq!(
            h.arbiter.handle(&RawKeyEvent::up(F6, "f6")),
            Some(Command::Deactivate("hold bind"))
        );
        assert_eq!(
            h.control.calls(),
            vec!["activate:hold bind", "deactivate:hold bind"]
        );
    }

    #[test]
    fn test_toggle_mode_ignores_key_repeat() {
        let h = harness(ToggleMode::Toggle, None);
        h.arbiter.handle(&RawKeyEvent::down(F6, "f6"));
        h.arbiter.handle(&RawKeyEvent::down(F6, "f6"));
        h.arbiter.handle(&RawKeyEvent::down(F6, "f6"));
        assert_eq!(h.arbiter.handle(&RawKeyEvent::up(F6, "f6")), None);
        assert_eq!(h.control.calls(), vec!["toggle"]);

        h.arbiter.handle(&RawKeyEvent::down(F6, "f6"));
        assert_eq!(h.control.calls(), vec!["toggle", "toggle"]);
    }

    #[test]
    fn test_spurious_up_is_dropped() {
        let h = harness(ToggleMode::Press, None);
        assert_eq!(h.arbiter.handle(&RawKeyEvent::up(F6, "f6")), None);
        assert!(h.control.calls().is_empty());
    }

    #[test]
    fn test_separate_stop_mode() {
        let h = harness(ToggleMode::SeparateStop, Some(F7));
        assert_eq!(
            h.arbiter.handle(&RawKeyEvent::down(F6, "f6")),
            Some(Command::Activate("stop bind"))
        );
        assert_eq!(h.arbiter.handle(&RawKeyEvent::up(F6, "f6")), None);
        assert_eq!(
            h.arbiter.handle(&RawKeyEvent::down(F7, "f7")),
            Some(Command::Deactivate("stop bind"))
        );
        assert_eq!(h.arbiter.handle(&RawKeyEvent::up(F7, "f7")), None);
    }

    #[test]
    fn test_stop_bind_works_in_every_mode() {
        for mode in [ToggleMode::Press, ToggleMode::Toggle] {
            let h = harness(mode, Some(F7));
            assert_eq!(
                h.arbiter.handle(&RawKeyEvent::down(F7, "f7")),
                Some(Command::Deactivate("stop bind"))
            );
        }
    }

    #[test]
    fn test_unrelated_keys_do_nothing() {
        let h = harness(ToggleMode::Toggle, Some(F7));
        h.arbiter.handle(&RawKeyEvent::down(KEY_A, "a"));
        h.arbiter.handle(&RawKeyEvent::up(KEY_A, "a"));
        assert!(h.control.calls().is_empty());
    }

    #[test]
    fn test_start_suppressed_while_pointer_in_own_window() {
        let h = harness(ToggleMode::Toggle, None);
        h.probe.inside.store(true, Ordering::SeqCst);
        assert_eq!(h.arbiter.handle(&RawKeyEvent::down(F6, "f6")), None);
        h.arbiter.handle(&RawKeyEvent::up(F6, "f6"));

        h.probe.inside.store(false, Ordering::SeqCst);
        assert_eq!(
            h.arbiter.handle(&RawKeyEvent::down(F6, "f6")),
            Some(Command::Toggle)
        );
    }

    #[test]
    fn test_start_suppressed_while_text_field_focused() {
        let h = harness(ToggleMode::Press, Some(F7));
        h.text_focus.set_focused(true);
        assert_eq!(h.arbiter.handle(&RawKeyEvent::down(F6, "f6")), None);
        // The stop bind is not guarded.
        assert_eq!(
            h.arbiter.handle(&RawKeyEvent::down(F7, "f7")),
            Some(Command::Deactivate("stop bind"))
        );
    }

    #[test]
    fn test_capture_session_swallows_events() {
        let h = harness(ToggleMode::Press, None);
        let session = h.capture.begin(BindTarget::Start).unwrap();

        assert_eq!(h.arbiter.handle(&RawKeyEvent::down(F6, "f6")), None);
        assert!(h.control.calls().is_empty());

        let captured = session.wait(Duration::from_millis(100)).unwrap();
        assert_eq!(captured.physical_code, F6);

        // Session over: the key was never recorded as held, so its release
        // is spurious and a fresh press starts the scheduler.
        assert_eq!(h.arbiter.handle(&RawKeyEvent::up(F6, "f6")), None);
        assert_eq!(
            h.arbiter.handle(&RawKeyEvent::down(F6, "f6")),
            Some(Command::Activate("hold bind"))
        );
    }

    #[test]
    fn test_pressed_key_set() {
        let pressed = PressedKeySet::new();
        assert!(pressed.record(F6, Transition::Down));
        // Auto-repeat of a held key is not a new press
        assert!(!pressed.record(F6, Transition::Down));
        assert!(pressed.record(F7, Transition::Down));
        assert!(pressed.record(F6, Transition::Up));
        assert!(!pressed.record(F6, Transition::Up));
        // Released keys press again
        assert!(pressed.record(F6, Transition::Down));
    }
}
