//! Injected notification sink for turn outcomes.

use std::sync::{Mutex, MutexGuard, PoisonError};

use coach_store::ConversationId;

use crate::error::FailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub severity: Severity,
}

impl Notice {
    #[must_use]
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity: Severity::Info,
        }
    }

    #[must_use]
    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity: Severity::Error,
        }
    }

    /// Builds the user-facing notice for a failed turn. `detail` replaces the
    /// default description when present.
    #[must_use]
    pub fn for_failure(kind: FailureKind, detail: Option<&str>) -> Self {
        let (title, fallback) = match kind {
            FailureKind::RateLimited => (
                "Too many requests",
                "Rate limit exceeded. Please wait a moment and try again.",
            ),
            FailureKind::QuotaExceeded => (
                "Credits required",
                "Your AI usage quota is exhausted. Add credits to keep chatting.",
            ),
            FailureKind::TransportFailure => (
                "Something went wrong",
                "The assistant could not respond. Please try again.",
            ),
            FailureKind::PersistenceFailure => (
                "Storage error",
                "Your changes could not be saved. Please try again.",
            ),
        };
        Self::error(title, detail.unwrap_or(fallback))
    }
}

pub trait SessionNotifier: Send + Sync {
    fn notify(&self, notice: Notice);

    /// The conversation's ordering metadata is stale and should be refetched.
    fn conversation_updated(&self, _conversation_id: &ConversationId) {}
}

/// Emits notices through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl SessionNotifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        match notice.severity {
            Severity::Info => {
                tracing::info!(title = %notice.title, "{}", notice.description);
            }
            Severity::Error => {
                tracing::error!(title = %notice.title, "{}", notice.description);
            }
        }
    }

    fn conversation_updated(&self, conversation_id: &ConversationId) {
        tracing::debug!(conversation = %conversation_id, "conversation updated");
    }
}

/// Keeps every notice and update in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
    updated: Mutex<Vec<ConversationId>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn notices(&self) -> Vec<Notice> {
        lock_unpoisoned(&self.notices).clone()
    }

    #[must_use]
    pub fn updated_conversations(&self) -> Vec<ConversationId> {
        lock_unpoisoned(&self.updated).clone()
    }

    /// Drains recorded notices.
    pub fn take_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut *lock_unpoisoned(&self.notices))
    }
}

impl SessionNotifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        lock_unpoisoned(&self.notices).push(notice);
    }

    fn conversation_updated(&self, conversation_id: &ConversationId) {
        lock_unpoisoned(&self.updated).push(conversation_id.clone());
    }
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_notices_are_distinct_per_kind() {
        let rate = Notice::for_failure(FailureKind::RateLimited, None);
        let quota = Notice::for_failure(FailureKind::QuotaExceeded, None);
        let generic = Notice::for_failure(FailureKind::TransportFailure, None);

        assert_ne!(rate.title, generic.title);
        assert_ne!(quota.title, generic.title);
        assert_ne!(rate.description, quota.description);
        assert!([rate, quota, generic]
            .iter()
            .all(|notice| notice.severity == Severity::Error));
    }

    #[test]
    fn detail_overrides_description() {
        let notice = Notice::for_failure(FailureKind::RateLimited, Some("Rate limit exceeded"));
        assert_eq!(notice.description, "Rate limit exceeded");
    }

    #[test]
    fn recording_notifier_keeps_order() {
        let notifier = RecordingNotifier::new();
        notifier.notify(Notice::info("a", "1"));
        notifier.notify(Notice::error("b", "2"));
        notifier.conversation_updated(&ConversationId::from("c1"));

        let titles: Vec<String> = notifier.notices().into_iter().map(|n| n.title).collect();
        assert_eq!(titles, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            notifier.updated_conversations(),
            vec![ConversationId::from("c1")]
        );
        assert_eq!(notifier.take_notices().len(), 2);
        assert!(notifier.notices().is_empty());
    }
}
