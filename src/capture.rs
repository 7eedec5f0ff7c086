//! One-shot key capture for assigning binds
//!
//! While a session is open every key event is handed to the session
//! instead of the hotkey arbiter. The first press completes the session;
//! releases are swallowed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::arbiter::RawKeyEvent;
use crate::config::BindTarget;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureFailure {
    #[error("already capturing the {0}")]
    AlreadyInProgress(BindTarget),

    #[error("no key pressed for the {0}")]
    TimedOut(BindTarget),

    #[error("capture session closed")]
    Disconnected,
}

struct Pending {
    target: BindTarget,
    id: u64,
    sender: mpsc::Sender<RawKeyEvent>,
}

/// Routes the next key press to an open capture session.
#[derive(Default)]
pub struct BindCapture {
    pending: Mutex<Option<Pending>>,
    next_id: AtomicU64,
}

impl BindCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for `target`. Only one session can be open at a time.
    pub fn begin(self: &Arc<Self>, target: BindTarget) -> Result<CaptureSession, CaptureFailure> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = pending.as_ref() {
            return Err(CaptureFailure::AlreadyInProgress(current.target));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel();
        *pending = Some(Pending { target, id, sender });

        info!("Press a key for the {}...", target);
        Ok(CaptureSession {
            capture: Arc::clone(self),
            target,
            id,
            receiver,
        })
    }

    pub fn is_active(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Offer a key event. Returns `true` if the event was consumed.
    pub fn offer(&self, event: &RawKeyEvent) -> bool {
        let mut slot = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            return false;
        }
        if !event.is_down() {
            return true;
        }
        let Some(pending) = slot.take() else {
            return false;
        };
        drop(slot);

        debug!(
            "Captured '{}' (0x{:X}) for the {}",
            event.display_name, event.physical_code, pending.target
        );
        // The session may already have given up; the key is consumed either way.
        let _ = pending.sender.send(event.clone());
        true
    }

    fn close(&self, id: u64) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.as_ref().is_some_and(|p| p.id == id) {
            *pending = None;
        }
    }
}

/// An open capture. Dropping it closes the session.
pub struct CaptureSession {
    capture: Arc<BindCapture>,
    target: BindTarget,
    id: u64,
    receiver: mpsc::Receiver<RawKeyEvent>,
}

impl CaptureSession {
    pub fn target(&self) -> BindTarget {
        self.target
    }

    /// Block until a key is pressed or `timeout` passes.
    pub fn wait(self, timeout: Duration) -> Result<RawKeyEvent, CaptureFailure> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(event),
            Err(RecvTimeoutError::Timeout) => Err(CaptureFailure::TimedOut(self.target)),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureFailure::Disconnected),
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.capture.close(self.id);
    }
}
