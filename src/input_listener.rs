//! Global key listening using rdev

use rdev::{listen, Event, EventType, Key};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

use crate::arbiter::{RawKeyEvent, Transition};
use crate::constants::KEY_EVENT_QUEUE_DEPTH;
use crate::keycode::{key_name, key_to_code};
use crate::ClickerError;

/// Key listener that captures global keyboard events
pub struct KeyListener {
    sender: SyncSender<RawKeyEvent>,
}

/// Stops delivery from a running [`KeyListener`].
///
/// The OS hook itself lives until the process exits; after `unsubscribe`
/// its events are simply dropped.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    subscribed: Arc<AtomicBool>,
}

impl ListenerHandle {
    pub fn unsubscribe(&self) {
        if self.subscribed.swap(false, Ordering::SeqCst) {
            info!("Key listener unsubscribed");
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }
}

impl KeyListener {
    /// Create a new KeyListener with the given channel sender
    pub fn new(sender: SyncSender<RawKeyEvent>) -> Self {
        Self { sender }
    }

    /// Start listening for key events in a background thread
    ///
    /// Events are pushed into the bounded queue without blocking the OS
    /// hook; when the queue is full the event is dropped. The queue's
    /// receiver sees a disconnect if the hook fails to install.
    pub fn start(self) -> Result<ListenerHandle, ClickerError> {
        let subscribed = Arc::new(AtomicBool::new(true));
        let handle = ListenerHandle {
            subscribed: subscribed.clone(),
        };

        thread::Builder::new()
            .name("key-listener".to_string())
            .spawn(move || {
                info!("Key listener started");

                let sender = self.sender;
                let callback = move |event: Event| {
                    if !subscribed.load(Ordering::Relaxed) {
                        return;
                    }
                    let Some(raw) = translate(&event) else {
                        return;
                    };
                    match sender.try_send(raw) {
                        Ok(()) => {}
                        Err(TrySendError::Full(dropped)) => {
                            warn!("Key event queue full, dropping {:?}", dropped.transition)
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            subscribed.store(false, Ordering::Relaxed);
                        }
                    }
                };

                if let Err(e) = listen(callback) {
                    error!("Error in key listener: {:?}", e);
                }
            })
            .map_err(|e| ClickerError::KeyListener(e.to_string()))?;

        Ok(handle)
    }
}

/// Turn an rdev event into a raw key event. Mouse events and keys without
/// a physical code are skipped.
pub fn translate(event: &Event) -> Option<RawKeyEvent> {
    let (key, transition) = match event.event_type {
        EventType::KeyPress(key) => (key, Transition::Down),
        EventType::KeyRelease(key) => (key, Transition::Up),
        _ => return None,
    };

    let Some(physical_code) = key_to_code(key) else {
        debug!("No key code for {:?}", key);
        return None;
    };

    Some(RawKeyEvent {
        physical_code,
        transition,
        display_name: display_name(key, event.name.as_deref()),
    })
}

/// The text the OS produced for the key if it is a single visible
/// character, otherwise the key's own name.
fn display_name(key: Key, text: Option<&str>) -> String {
    let mut chars = text.unwrap_or_default().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_alphanumeric() || c.is_ascii_punctuation() => c.to_string(),
        _ => key_name(key),
    }
}

/// Create a bounded channel for key events and return both ends
pub fn create_event_channel() -> (SyncSender<RawKeyEvent>, mpsc::Receiver<RawKeyEvent>) {
    mpsc::sync_channel(KEY_EVENT_QUEUE_DEPTH)
}
