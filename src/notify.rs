//! User-facing notices ("toasts") raised by auth actions.
//!
//! Auth actions report outcomes through a [`Notifier`] so that the same
//! state machine can drive a browser toast layer, a terminal, or a test
//! recorder.

use parking_lot::Mutex;

/// Severity of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A single user-facing notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Sink for user-facing notices.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);

    fn success(&self, message: &str) {
        self.notify(Notice {
            level: NoticeLevel::Success,
            message: message.to_string(),
        });
    }

    fn error(&self, message: &str) {
        self.notify(Notice {
            level: NoticeLevel::Error,
            message: message.to_string(),
        });
    }
}

/// Routes notices into the tracing log.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Success => tracing::info!(notice = %notice.message),
            NoticeLevel::Error => tracing::warn!(notice = %notice.message),
        }
    }
}

/// Prints styled notices to stderr for the CLI.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        let line = match notice.level {
            NoticeLevel::Success => console::style(format!("✓ {}", notice.message)).green(),
            NoticeLevel::Error => console::style(format!("✗ {}", notice.message)).red(),
        };
        eprintln!("{line}");
    }
}

/// Keeps every notice in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    /// Messages of the given level, oldest first.
    pub fn messages(&self, level: NoticeLevel) -> Vec<String> {
        self.notices
            .lock()
            .iter()
            .filter(|n| n.level == level)
            .map(|n| n.message.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_notifier_keeps_order_and_level() {
        let notifier = RecordingNotifier::new();
        notifier.success("Signed in successfully!");
        notifier.error("Invalid login credentials");
        notifier.success("Signed out successfully");

        assert_eq!(notifier.notices().len(), 3);
        assert_eq!(
            notifier.messages(NoticeLevel::Success),
            vec!["Signed in successfully!", "Signed out successfully"]
        );
        assert_eq!(
            notifier.messages(NoticeLevel::Error),
            vec!["Invalid login credentials"]
        );
    }

    #[test]
    fn tracing_notifier_does_not_panic_without_subscriber() {
        TracingNotifier.success("ok");
        TracingNotifier.error("bad");
    }
}
