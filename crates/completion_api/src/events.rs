use serde::{Deserialize, Serialize};

/// Unit produced by the stream decoder. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental assistant text taken from `choices[0].delta.content`.
    Delta { text: String },
    /// The `[DONE]` sentinel was seen.
    Done,
    /// A line that never became valid JSON and was dropped.
    Malformed { line: String },
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>) -> Self {
        Self::Delta { text: text.into() }
    }

    pub fn delta_text(&self) -> Option<&str> {
        match self {
            Self::Delta { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}
