//! Notification seam. The chat transport itself lives outside the core;
//! the monitors only depend on this trait.

use async_trait::async_trait;

/// Receiver of human-facing lifecycle announcements. Failures are logged
/// and swallowed, never propagated into the state machine.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str);
}

/// Default sink that writes announcements to the log stream.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) {
        tracing::info!(target: "notify", "{}", text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Test double collecting every announcement.
    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, text: &str) {
            self.messages.lock().push(text.to_string());
        }
    }

    #[tokio::test]
    async fn test_notifier_object_safety() {
        let recorder = std::sync::Arc::new(RecordingNotifier::default());
        let notifier: std::sync::Arc<dyn Notifier> = recorder.clone();
        notifier.notify("window closed").await;
        let messages = recorder.messages.lock();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], "window closed");
    }
}
