//! CRUD contracts of the hosted backend, one trait per table family.

use time::Date;

use crate::error::StoreError;
use crate::schema::{
    CalendarEvent, Conversation, ConversationId, EventId, Habit, HabitId, HabitTracking, Message,
    NewEvent, NewMessage, NewTask, Task, TaskId, TrackingStatus,
};

pub const DEFAULT_CONVERSATION_TITLE: &str = "New conversation";
pub const MAX_TITLE_CHARS: usize = 100;
pub const DEFAULT_HABIT_COLOR: &str = "#10b981";

/// Ordered message log per conversation.
///
/// Calls are synchronous and may block on file I/O; async callers should run
/// them off the runtime worker (for example with `spawn_blocking`).
pub trait TranscriptStore: Send + Sync {
    fn append_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Messages of one conversation, oldest first.
    fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>, StoreError>;
}

pub trait ConversationStore: Send + Sync {
    fn create_conversation(&self, title: Option<&str>) -> Result<Conversation, StoreError>;

    /// Conversations, most recently updated first.
    fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError>;

    fn rename_conversation(
        &self,
        id: &ConversationId,
        title: &str,
    ) -> Result<Conversation, StoreError>;

    fn delete_conversation(&self, id: &ConversationId) -> Result<(), StoreError>;

    fn touch_conversation(&self, id: &ConversationId) -> Result<(), StoreError>;
}

pub trait TaskStore: Send + Sync {
    fn create_task(&self, task: NewTask) -> Result<Task, StoreError>;

    /// Tasks, newest first.
    fn list_tasks(&self) -> Result<Vec<Task>, StoreError>;

    fn toggle_task(&self, id: &TaskId) -> Result<Task, StoreError>;

    fn delete_task(&self, id: &TaskId) -> Result<(), StoreError>;
}

pub trait EventStore: Send + Sync {
    fn create_event(&self, event: NewEvent) -> Result<CalendarEvent, StoreError>;

    /// Events ordered by `event_date` ascending.
    fn list_events(&self) -> Result<Vec<CalendarEvent>, StoreError>;

    fn toggle_event(&self, id: &EventId) -> Result<CalendarEvent, StoreError>;
}

pub trait HabitStore: Send + Sync {
    fn create_habit(&self, name: &str, color: Option<&str>) -> Result<Habit, StoreError>;

    /// Active habits, oldest first.
    fn list_active_habits(&self) -> Result<Vec<Habit>, StoreError>;

    /// Soft delete: tracking history is kept.
    fn deactivate_habit(&self, id: &HabitId) -> Result<(), StoreError>;

    /// Advance the grid cell for `(habit, date)`; an untracked cell becomes completed.
    fn cycle_tracking(&self, habit_id: &HabitId, date: Date) -> Result<HabitTracking, StoreError>;

    /// Tracking rows with `start <= date <= end`.
    fn tracking_between(&self, start: Date, end: Date) -> Result<Vec<HabitTracking>, StoreError>;

    /// Percentage of tracked days in range that are completed, rounded; 0 when untracked.
    fn completion_rate(&self, habit_id: &HabitId, start: Date, end: Date) -> Result<u8, StoreError> {
        let rows = self.tracking_between(start, end)?;
        let tracked = rows.iter().filter(|row| &row.habit_id == habit_id);
        let (total, completed) = tracked.fold((0u32, 0u32), |(total, completed), row| {
            let done = u32::from(row.status == TrackingStatus::Completed);
            (total + 1, completed + done)
        });
        if total == 0 {
            return Ok(0);
        }
        let rate = (f64::from(completed) * 100.0 / f64::from(total)).round();
        Ok(rate as u8)
    }
}

/// Trim and bound a conversation title.
pub fn validate_title(raw: &str) -> Result<String, StoreError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(StoreError::InvalidTitle("title must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(StoreError::InvalidTitle(
            "title must be at most 100 characters",
        ));
    }
    Ok(title.to_owned())
}

/// Message bodies are stored verbatim; only a zero-length body is rejected.
pub(crate) fn require_content(value: &str) -> Result<String, StoreError> {
    if value.is_empty() {
        Err(StoreError::EmptyField { field: "content" })
    } else {
        Ok(value.to_owned())
    }
}

pub(crate) fn require_non_empty(field: &'static str, value: &str) -> Result<String, StoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(StoreError::EmptyField { field })
    } else {
        Ok(trimmed.to_owned())
    }
}
