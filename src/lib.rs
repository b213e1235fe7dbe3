//! Streaming chat core for a personal-coaching assistant.
//!
//! [`ChatSession`] runs chat turns: it persists the user message through a
//! [`coach_store::TranscriptStore`], streams the reply from a
//! [`completion_api::CompletionBackend`], merges deltas into one in-place
//! assistant entry, and publishes transcript snapshots to subscribers.

pub mod config;
pub mod error;
pub mod logging;
pub mod notify;
pub mod session;
pub mod transcript;

pub use config::EnvConfig;
pub use error::{FailureKind, PersistAction, TurnError};
pub use notify::{LogNotifier, Notice, RecordingNotifier, SessionNotifier, Severity};
pub use session::{ChatSession, SessionOptions, TurnOutcome, TurnPhase};
pub use transcript::{
    DeltaMerge, PendingAssistantMessage, Transcript, TranscriptEntry, TranscriptSnapshot,
};
