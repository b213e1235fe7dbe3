use coach_store::{ConversationId, StoreError};
use completion_api::{CompletionError, CompletionFailure};
use thiserror::Error;

/// User-facing failure class of a turn or a store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    RateLimited,
    QuotaExceeded,
    TransportFailure,
    PersistenceFailure,
}

/// What a store call was doing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistAction {
    SaveUserMessage,
    SaveAssistantMessage,
    LoadConversation,
}

impl PersistAction {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::SaveUserMessage => "save your message",
            Self::SaveAssistantMessage => "save the assistant reply",
            Self::LoadConversation => "load the conversation",
        }
    }
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("a turn is already in flight for conversation '{0}'")]
    Busy(ConversationId),

    #[error("turn cancelled")]
    Cancelled,

    #[error("the assistant returned an empty response")]
    EmptyResponse,

    #[error("completion request failed: {0}")]
    Completion(#[source] CompletionError),

    #[error("could not {}: {source}", action.describe())]
    Persistence {
        action: PersistAction,
        #[source]
        source: StoreError,
    },
}

impl TurnError {
    #[must_use]
    pub fn persistence(action: PersistAction, source: StoreError) -> Self {
        Self::Persistence { action, source }
    }

    /// `None` for outcomes the user caused and should not be told about.
    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::EmptyMessage | Self::Busy(_) | Self::Cancelled => None,
            Self::EmptyResponse => Some(FailureKind::TransportFailure),
            Self::Completion(error) => match error.failure() {
                CompletionFailure::RateLimited => Some(FailureKind::RateLimited),
                CompletionFailure::QuotaExceeded => Some(FailureKind::QuotaExceeded),
                CompletionFailure::Transport => Some(FailureKind::TransportFailure),
                CompletionFailure::Cancelled => None,
            },
            Self::Persistence { .. } => Some(FailureKind::PersistenceFailure),
        }
    }

    /// Text worth showing verbatim, when the failure carries any.
    #[must_use]
    pub fn user_detail(&self) -> Option<String> {
        match self {
            Self::Completion(CompletionError::RateLimited { message })
            | Self::Completion(CompletionError::QuotaExceeded { message })
                if !message.trim().is_empty() =>
            {
                Some(message.clone())
            }
            Self::Persistence { action, .. } => Some(format!("Could not {}.", action.describe())),
            _ => None,
        }
    }
}

impl From<CompletionError> for TurnError {
    fn from(error: CompletionError) -> Self {
        match error {
            CompletionError::Cancelled => Self::Cancelled,
            other => Self::Completion(other),
        }
    }
}
