//! Status events flowing from the scheduler to whoever displays them.
//!
//! The channel is an unbounded mpsc queue: senders never block and the
//! observer drains it on its own schedule.

use std::sync::mpsc;

use crate::config::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Status,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTag {
    Running,
    Stopped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub kind: StatusKind,
    pub text: String,
    pub tag: StatusTag,
}

impl StatusEvent {
    pub fn running(text: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Status,
            text: text.into(),
            tag: StatusTag::Running,
        }
    }

    pub fn stopped() -> Self {
        Self {
            kind: StatusKind::Status,
            text: "Stopped".to_string(),
            tag: StatusTag::Stopped,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Error,
            text: text.into(),
            tag: StatusTag::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == StatusKind::Error
    }
}

/// Sending half of the status channel.
#[derive(Debug, Clone)]
pub struct StatusSender {
    inner: mpsc::Sender<StatusEvent>,
}

impl StatusSender {
    /// Queue an event. A dropped observer is not an error for the sender.
    pub fn send(&self, event: StatusEvent) {
        let _ = self.inner.send(event);
    }
}

/// Receiving half of the status channel.
#[derive(Debug)]
pub struct StatusReceiver {
    inner: mpsc::Receiver<StatusEvent>,
}

impl StatusReceiver {
    /// Take everything queued so far without waiting.
    pub fn drain(&self) -> Vec<StatusEvent> {
        self.inner.try_iter().collect()
    }
}

/// Create a status channel and return both ends
pub fn channel() -> (StatusSender, StatusReceiver) {
    let (tx, rx) = mpsc::channel();
    (StatusSender { inner: tx }, StatusReceiver { inner: rx })
}

/// What a status line should show.
///
/// A pending validation error outranks any running/stopped status, so an
/// invalid configuration stays visible while the scheduler is idle.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    last: StatusEvent,
    validation: Option<ValidationError>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self {
            last: StatusEvent::stopped(),
            validation: None,
        }
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: StatusEvent) {
        self.last = event;
    }

    pub fn set_validation(&mut self, validation: Option<ValidationError>) {
        self.validation = validation;
    }

    pub fn display(&self) -> String {
        match &self.validation {
            Some(err) => err.to_string(),
            None => self.last.text.clone(),
        }
    }

    pub fn display_tag(&self) -> StatusTag {
        if self.validation.is_some() {
            StatusTag::Error
        } else {
            self.last.tag
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_returns_events_in_order() {
        let (tx, rx) = channel();
        tx.send(StatusEvent::running("Running (hold bind)"));
        tx.send(StatusEvent::stopped());

        let events = rx.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tag, StatusTag::Running);
        assert_eq!(events[1].text, "Stopped");
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (tx, rx) = channel();
        drop(rx);
        tx.send(StatusEvent::error("Input send failed"));
    }

    #[test]
    fn test_validation_error_takes_precedence() {
        let mut board = StatusBoard::new();
        assert_eq!(board.display(), "Stopped");

        board.apply(StatusEvent::running("Running (toggle bind)"));
        assert_eq!(board.display(), "Running (toggle bind)");
        assert_eq!(board.display_tag(), StatusTag::Running);

        board.set_validation(Some(ValidationError::StartBindRequired));
        assert_eq!(board.display(), "Start bind is required");
        assert_eq!(board.display_tag(), StatusTag::Error);

        board.apply(StatusEvent::stopped());
        assert_eq!(board.display(), "Start bind is required");

        board.set_validation(None);
        assert_eq!(board.display(), "Stopped");
    }
}
