//! User-facing notifications for mutation outcomes.
//!
//! The engine reports every user-initiated mutation through a [`Notifier`]:
//! one notification per failure, plus best-effort success messages. How they
//! are shown (toast, status bar, log) is up to the caller.

use log::{info, warn};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn success<S: Into<String>>(message: S) -> Self {
        Self {
            level: NotificationLevel::Success,
            message: message.into(),
        }
    }

    pub fn failure<S: Into<String>>(message: S) -> Self {
        Self {
            level: NotificationLevel::Failure,
            message: message.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.level == NotificationLevel::Failure
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log. Used when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Success => info!("[Notify] {}", notification.message),
            NotificationLevel::Failure => warn!("[Notify] {}", notification.message),
        }
    }
}

/// Forwards notifications to a UI task over a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::Sender<Notification>,
}

impl ChannelNotifier {
    pub fn new(sender: mpsc::Sender<Notification>) -> Self {
        Self { sender }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self::new(sender), receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        // Never block a mutation on a slow UI
        if let Err(e) = self.sender.try_send(notification) {
            warn!("[Notify] Dropped notification: {}", e);
        }
    }
}
