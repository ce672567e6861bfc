//! Application-wide notification bus.

use promptlib_types::Notification;
use tokio::sync::broadcast;
use tracing::debug;

/// Sender side of the notification surface. Owned by the application root and cloned into
/// components that need to emit.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Emit a notification. Never blocks; dropped when nobody is listening.
    pub fn notify(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            debug!(target: "promptlib::notify", "Notification dropped, no subscribers");
        }
    }

    /// Report a failed save to the user.
    pub fn persistence_failure(&self, action: &str, error: &dyn std::fmt::Display) {
        self.notify(Notification::error(
            "Couldn't save conversation",
            format!("Failed to {}: {}", action, error),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptlib_types::NotificationLevel;

    #[tokio::test]
    async fn test_persistence_failure_reaches_subscriber() {
        let notifier = Notifier::default();
        let mut rx = notifier.subscribe();

        notifier.persistence_failure("save message", &"disk full");

        let n = rx.recv().await.unwrap();
        assert_eq!(n.level, NotificationLevel::Error);
        assert_eq!(n.message, "Failed to save message: disk full");
    }

    #[test]
    fn test_notify_without_subscribers_is_silent() {
        let notifier = Notifier::new(4);
        notifier.notify(Notification::warning("t", "m"));
    }
}
