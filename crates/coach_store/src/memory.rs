use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use time::{Date, Duration, OffsetDateTime};

use crate::error::StoreError;
use crate::schema::{
    CalendarEvent, Conversation, ConversationId, EventId, Habit, HabitId, HabitTracking, Message,
    MessageId, NewEvent, NewMessage, NewTask, Task, TaskId, TrackingId, TrackingStatus,
};
use crate::stores::{
    require_content, require_non_empty, validate_title, ConversationStore, EventStore,
    HabitStore, TaskStore, TranscriptStore, DEFAULT_CONVERSATION_TITLE, DEFAULT_HABIT_COLOR,
};

#[derive(Default)]
struct Tables {
    last_tick: Option<OffsetDateTime>,
    conversations: Vec<Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
    tasks: Vec<Task>,
    events: Vec<CalendarEvent>,
    habits: Vec<Habit>,
    tracking: Vec<HabitTracking>,
}

impl Tables {
    /// Strictly increasing wall clock so orderings never tie.
    fn tick(&mut self) -> OffsetDateTime {
        let mut now = OffsetDateTime::now_utc();
        if let Some(last) = self.last_tick {
            if now <= last {
                now = last + Duration::nanoseconds(1);
            }
        }
        self.last_tick = Some(now);
        now
    }

    fn conversation_mut(&mut self, id: &ConversationId) -> Result<&mut Conversation, StoreError> {
        self.conversations
            .iter_mut()
            .find(|conversation| &conversation.id == id)
            .ok_or_else(|| StoreError::not_found("conversation", id))
    }
}

/// In-process implementation of every store trait.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TranscriptStore for MemoryStore {
    fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let content = require_content(&message.content)?;
        let mut tables = self.lock();
        let created_at = tables.tick();

        if let Ok(conversation) = tables.conversation_mut(&message.conversation_id) {
            conversation.updated_at = created_at;
        }

        let stored = Message {
            id: MessageId::generate(),
            conversation_id: message.conversation_id,
            role: message.role,
            content,
            created_at,
        };
        tables
            .messages
            .entry(stored.conversation_id.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .lock()
            .messages
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}

impl ConversationStore for MemoryStore {
    fn create_conversation(&self, title: Option<&str>) -> Result<Conversation, StoreError> {
        let title = match title {
            Some(title) => validate_title(title)?,
            None => DEFAULT_CONVERSATION_TITLE.to_owned(),
        };
        let mut tables = self.lock();
        let now = tables.tick();
        let conversation = Conversation {
            id: ConversationId::generate(),
            title,
            created_at: now,
            updated_at: now,
        };
        tables.conversations.push(conversation.clone());
        Ok(conversation)
    }

    fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let mut conversations = self.lock().conversations.clone();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    fn rename_conversation(
        &self,
        id: &ConversationId,
        title: &str,
    ) -> Result<Conversation, StoreError> {
        let title = validate_title(title)?;
        let mut tables = self.lock();
        let now = tables.tick();
        let conversation = tables.conversation_mut(id)?;
        conversation.title = title;
        conversation.updated_at = now;
        Ok(conversation.clone())
    }

    fn delete_conversation(&self, id: &ConversationId) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let before = tables.conversations.len();
        tables.conversations.retain(|conversation| &conversation.id != id);
        if tables.conversations.len() == before {
            return Err(StoreError::not_found("conversation", id));
        }
        tables.messages.remove(id);
        Ok(())
    }

    fn touch_conversation(&self, id: &ConversationId) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let now = tables.tick();
        tables.conversation_mut(id)?.updated_at = now;
        Ok(())
    }
}

impl TaskStore for MemoryStore {
    fn create_task(&self, task: NewTask) -> Result<Task, StoreError> {
        let title = require_non_empty("title", &task.title)?;
        let mut tables = self.lock();
        let created_at = tables.tick();
        let task = Task {
            id: TaskId::generate(),
            title,
            description: task.description.filter(|text| !text.trim().is_empty()),
            completed: false,
            due_date: task.due_date,
            created_at,
        };
        tables.tasks.push(task.clone());
        Ok(task)
    }

    fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let mut tasks = self.lock().tasks.clone();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    fn toggle_task(&self, id: &TaskId) -> Result<Task, StoreError> {
        let mut tables = self.lock();
        let task = tables
            .tasks
            .iter_mut()
            .find(|task| &task.id == id)
            .ok_or_else(|| StoreError::not_found("task", id))?;
        task.completed = !task.completed;
        Ok(task.clone())
    }

    fn delete_task(&self, id: &TaskId) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let before = tables.tasks.len();
        tables.tasks.retain(|task| &task.id != id);
        if tables.tasks.len() == before {
            return Err(StoreError::not_found("task", id));
        }
        Ok(())
    }
}

impl EventStore for MemoryStore {
    fn create_event(&self, event: NewEvent) -> Result<CalendarEvent, StoreError> {
        let title = require_non_empty("title", &event.title)?;
        let event = CalendarEvent {
            id: EventId::generate(),
            title,
            description: event.description.filter(|text| !text.trim().is_empty()),
            event_date: event.event_date,
            kind: event.kind,
            completed: false,
        };
        self.lock().events.push(event.clone());
        Ok(event)
    }

    fn list_events(&self) -> Result<Vec<CalendarEvent>, StoreError> {
        let mut events = self.lock().events.clone();
        events.sort_by(|a, b| a.event_date.cmp(&b.event_date));
        Ok(events)
    }

    fn toggle_event(&self, id: &EventId) -> Result<CalendarEvent, StoreError> {
        let mut tables = self.lock();
        let event = tables
            .events
            .iter_mut()
            .find(|event| &event.id == id)
            .ok_or_else(|| StoreError::not_found("event", id))?;
        event.completed = !event.completed;
        Ok(event.clone())
    }
}

impl HabitStore for MemoryStore {
    fn create_habit(&self, name: &str, color: Option<&str>) -> Result<Habit, StoreError> {
        let name = require_non_empty("name", name)?;
        let color = color
            .map(str::trim)
            .filter(|color| !color.is_empty())
            .unwrap_or(DEFAULT_HABIT_COLOR)
            .to_owned();
        let mut tables = self.lock();
        let created_at = tables.tick();
        let habit = Habit {
            id: HabitId::generate(),
            name,
            color,
            is_active: true,
            created_at,
        };
        tables.habits.push(habit.clone());
        Ok(habit)
    }

    fn list_active_habits(&self) -> Result<Vec<Habit>, StoreError> {
        let mut habits: Vec<Habit> = self
            .lock()
            .habits
            .iter()
            .filter(|habit| habit.is_active)
            .cloned()
            .collect();
        habits.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(habits)
    }

    fn deactivate_habit(&self, id: &HabitId) -> Result<(), StoreError> {
        let mut tables = self.lock();
        let habit = tables
            .habits
            .iter_mut()
            .find(|habit| &habit.id == id)
            .ok_or_else(|| StoreError::not_found("habit", id))?;
        habit.is_active = false;
        Ok(())
    }

    fn cycle_tracking(&self, habit_id: &HabitId, date: Date) -> Result<HabitTracking, StoreError> {
        let mut tables = self.lock();
        if !tables.habits.iter().any(|habit| &habit.id == habit_id) {
            return Err(StoreError::not_found("habit", habit_id));
        }

        if let Some(row) = tables
            .tracking
            .iter_mut()
            .find(|row| &row.habit_id == habit_id && row.date == date)
        {
            row.status = row.status.next();
            return Ok(row.clone());
        }

        let row = HabitTracking {
            id: TrackingId::generate(),
            habit_id: habit_id.clone(),
            date,
            status: TrackingStatus::Completed,
        };
        tables.tracking.push(row.clone());
        Ok(row)
    }

    fn tracking_between(&self, start: Date, end: Date) -> Result<Vec<HabitTracking>, StoreError> {
        let mut rows: Vec<HabitTracking> = self
            .lock()
            .tracking
            .iter()
            .filter(|row| row.date >= start && row.date <= end)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(rows)
    }
}
