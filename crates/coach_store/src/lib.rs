//! Storage collaborators for the coaching chat: conversations, transcripts,
//! tasks, calendar events and habit tracking.

mod error;
mod memory;
mod paths;
mod schema;
mod store;
mod stores;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use paths::{transcript_file_name, transcript_path};
pub use schema::{
    CalendarEvent, Conversation, ConversationId, EventId, EventKind, Habit, HabitId,
    HabitTracking, Message, MessageId, MessageRecord, NewEvent, NewMessage, NewTask, Role, Task,
    TaskId, TrackingId, TrackingStatus, TranscriptHeader,
};
pub use store::JsonlTranscriptStore;
pub use stores::{
    validate_title, ConversationStore, EventStore, HabitStore, TaskStore, TranscriptStore,
    DEFAULT_CONVERSATION_TITLE, DEFAULT_HABIT_COLOR, MAX_TITLE_CHARS,
};
