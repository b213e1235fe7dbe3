//! Visible transcript and the delta merge engine.
//!
//! The transcript is an id-keyed map with an explicit order, so updating the
//! streaming assistant entry never depends on where it sits in the list.

use std::collections::HashMap;

use coach_store::{ConversationId, Message, MessageId, Role};
use completion_api::StreamEvent;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub message: Message,
    /// `true` while the entry is an unpersisted assistant reply.
    pub pending: bool,
}

/// Ordered copy of a transcript, as published to subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptSnapshot {
    pub entries: Vec<TranscriptEntry>,
}

impl TranscriptSnapshot {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|entry| &entry.message)
    }

    #[must_use]
    pub fn pending(&self) -> Option<&Message> {
        self.entries
            .iter()
            .find(|entry| entry.pending)
            .map(|entry| &entry.message)
    }

    #[must_use]
    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }
}

#[derive(Debug, Default)]
pub struct Transcript {
    entries: HashMap<MessageId, TranscriptEntry>,
    order: Vec<MessageId>,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole transcript with persisted messages.
    pub fn reset(&mut self, messages: Vec<Message>) {
        self.entries.clear();
        self.order.clear();
        for message in messages {
            self.upsert(message, false);
        }
    }

    /// Replaces the entry with the same id in place, or appends a new one.
    pub fn upsert(&mut self, message: Message, pending: bool) {
        let id = message.id.clone();
        if !self.entries.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.entries.insert(id, TranscriptEntry { message, pending });
    }

    /// Swaps `old_id` for a persisted message, keeping its position.
    ///
    /// Appends when `old_id` is not present.
    pub fn replace(&mut self, old_id: &MessageId, message: Message) {
        let Some(position) = self.order.iter().position(|id| id == old_id) else {
            self.upsert(message, false);
            return;
        };
        self.entries.remove(old_id);
        self.order[position] = message.id.clone();
        self.entries.insert(
            message.id.clone(),
            TranscriptEntry {
                message,
                pending: false,
            },
        );
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let entry = self.entries.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(entry.message)
    }

    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&TranscriptEntry> {
        self.entries.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Persisted and optimistic messages in order, skipping pending replies.
    pub fn settled_messages(&self) -> impl Iterator<Item = &Message> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .filter(|entry| !entry.pending)
            .map(|entry| &entry.message)
    }

    #[must_use]
    pub fn snapshot(&self) -> TranscriptSnapshot {
        TranscriptSnapshot {
            entries: self
                .order
                .iter()
                .filter_map(|id| self.entries.get(id))
                .cloned()
                .collect(),
        }
    }
}

/// In-memory accumulator for the assistant reply of one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAssistantMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub content: String,
    pub created_at: OffsetDateTime,
}

impl PendingAssistantMessage {
    #[must_use]
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id,
            content: String::new(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[must_use]
    pub fn to_message(&self) -> Message {
        Message {
            id: self.id.clone(),
            conversation_id: self.conversation_id.clone(),
            role: Role::Assistant,
            content: self.content.clone(),
            created_at: self.created_at,
        }
    }
}

/// Folds decoded deltas into one growing assistant message.
#[derive(Debug)]
pub struct DeltaMerge {
    pending: PendingAssistantMessage,
}

impl DeltaMerge {
    #[must_use]
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            pending: PendingAssistantMessage::new(conversation_id),
        }
    }

    #[must_use]
    pub fn id(&self) -> &MessageId {
        &self.pending.id
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.pending.content
    }

    /// Appends a delta verbatim and returns the updated snapshot.
    ///
    /// `Done` and `Malformed` leave the accumulator untouched.
    pub fn apply(&mut self, event: &StreamEvent) -> Option<Message> {
        let text = event.delta_text()?;
        self.pending.content.push_str(text);
        Some(self.pending.to_message())
    }

    #[must_use]
    pub fn into_pending(self) -> PendingAssistantMessage {
        self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn message(id: &str, role: Role, content: &str) -> Message {
        Message {
            id: MessageId::from(id),
            conversation_id: ConversationId::from("c1"),
            role,
            content: content.to_string(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn contents(snapshot: &TranscriptSnapshot) -> Vec<String> {
        snapshot.messages().map(|m| m.content.clone()).collect()
    }

    #[test]
    fn deltas_grow_a_single_entry_in_place() {
        let mut transcript = Transcript::new();
        transcript.upsert(message("u1", Role::User, "Saluda"), false);

        let mut merge = DeltaMerge::new(ConversationId::from("c1"));
        let mut seen = Vec::new();
        for delta in ["Hola", " ", "mundo"] {
            let snapshot = merge
                .apply(&StreamEvent::delta(delta))
                .expect("delta yields a snapshot");
            assert_eq!(&snapshot.id, merge.id());
            transcript.upsert(snapshot, true);
            let view = transcript.snapshot();
            assert_eq!(view.len(), 2);
            seen.push(view.pending().map(|m| m.content.clone()));
        }

        assert_eq!(
            seen,
            vec![
                Some("Hola".to_string()),
                Some("Hola ".to_string()),
                Some("Hola mundo".to_string()),
            ]
        );
    }

    #[test]
    fn done_and_malformed_do_not_touch_the_accumulator() {
        let mut merge = DeltaMerge::new(ConversationId::from("c1"));
        merge.apply(&StreamEvent::delta("a"));
        assert!(merge.apply(&StreamEvent::Done).is_none());
        assert!(merge
            .apply(&StreamEvent::Malformed {
                line: "data: {".to_string()
            })
            .is_none());
        assert_eq!(merge.content(), "a");
        assert_eq!(merge.into_pending().content, "a");
    }

    #[test]
    fn deltas_are_concatenated_without_normalization() {
        let mut merge = DeltaMerge::new(ConversationId::from("c1"));
        for delta in ["  a", "a", "\n", "  "] {
            merge.apply(&StreamEvent::delta(delta));
        }
        assert_eq!(merge.content(), "  aa\n  ");
    }

    #[test]
    fn replace_keeps_position() {
        let mut transcript = Transcript::new();
        transcript.upsert(message("u1", Role::User, "uno"), false);
        transcript.upsert(message("local", Role::User, "dos"), false);
        transcript.upsert(message("p1", Role::Assistant, "tres"), true);

        transcript.replace(&MessageId::from("local"), message("db-2", Role::User, "dos"));

        let snapshot = transcript.snapshot();
        let ids: Vec<&str> = snapshot.messages().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "db-2", "p1"]);
        assert!(!transcript.contains(&MessageId::from("local")));
    }

    #[test]
    fn remove_and_settled_messages_skip_pending() {
        let mut transcript = Transcript::new();
        transcript.upsert(message("u1", Role::User, "hola"), false);
        transcript.upsert(message("p1", Role::Assistant, "parcial"), true);

        let settled: Vec<&str> = transcript
            .settled_messages()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(settled, vec!["hola"]);

        assert!(transcript.remove(&MessageId::from("p1")).is_some());
        assert!(transcript.remove(&MessageId::from("p1")).is_none());
        assert_eq!(contents(&transcript.snapshot()), vec!["hola".to_string()]);
    }

    #[test]
    fn reset_replaces_everything() {
        let mut transcript = Transcript::new();
        transcript.upsert(message("old", Role::User, "viejo"), false);
        transcript.reset(vec![
            message("a", Role::User, "x"),
            message("b", Role::Assistant, "y"),
        ]);
        assert_eq!(
            contents(&transcript.snapshot()),
            vec!["x".to_string(), "y".to_string()]
        );
        assert!(transcript.get(&MessageId::from("old")).is_none());
    }
}
