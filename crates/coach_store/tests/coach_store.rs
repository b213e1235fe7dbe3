use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use coach_store::{
    transcript_path, ConversationId, ConversationStore, EventKind, EventStore, HabitStore,
    JsonlTranscriptStore, MemoryStore, NewEvent, NewMessage, NewTask, Role, StoreError, TaskStore,
    TrackingStatus, TranscriptStore, DEFAULT_CONVERSATION_TITLE,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use time::macros::{date, datetime};

fn write_transcript(conversation: &str, lines: &[String]) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = transcript_path(dir.path(), conversation);
    let mut file = File::create(&path).expect("transcript file should be created");
    for line in lines {
        writeln!(file, "{line}").expect("line should be written");
    }
    (dir, path)
}

fn header_line(conversation: &str) -> String {
    json!({
        "type": "transcript",
        "version": 1,
        "conversation_id": conversation,
        "created_at": "2026-02-14T00:00:00Z",
    })
    .to_string()
}

fn message_line(id: &str, role: &str, created_at: &str, content: &str) -> String {
    json!({
        "type": "message",
        "id": id,
        "role": role,
        "content": content,
        "created_at": created_at,
    })
    .to_string()
}

#[test]
fn open_reads_messages_in_file_order() {
    let conversation = ConversationId::from("c1");
    let (_dir, path) = write_transcript(
        "c1",
        &[
            header_line("c1"),
            message_line("m1", "user", "2026-02-14T00:00:01Z", "Hola"),
            message_line("m2", "assistant", "2026-02-14T00:00:02Z", "Hola, ¿qué tal?"),
        ],
    );

    let messages = JsonlTranscriptStore::open(&path, &conversation).expect("valid transcript");
    let summary: Vec<(&str, Role, &str)> = messages
        .iter()
        .map(|m| (m.id.as_str(), m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("m1", Role::User, "Hola"),
            ("m2", Role::Assistant, "Hola, ¿qué tal?"),
        ]
    );
    assert!(messages.iter().all(|m| m.conversation_id == conversation));
}

#[test]
fn open_rejects_missing_header() {
    let (_dir, path) = write_transcript("c1", &[]);
    let error = JsonlTranscriptStore::open(&path, &ConversationId::from("c1"))
        .expect_err("empty file must fail");
    assert!(matches!(error, StoreError::MissingHeader { .. }));
}

#[test]
fn open_rejects_message_as_first_line() {
    let (_dir, path) = write_transcript(
        "c1",
        &[message_line("m1", "user", "2026-02-14T00:00:01Z", "Hola")],
    );
    let error = JsonlTranscriptStore::open(&path, &ConversationId::from("c1"))
        .expect_err("message first must fail");
    assert!(matches!(
        error,
        StoreError::InvalidHeaderRecord { line: 1, .. }
    ));
}

#[test]
fn open_rejects_unsupported_version() {
    let header = json!({
        "type": "transcript",
        "version": 2,
        "conversation_id": "c1",
        "created_at": "2026-02-14T00:00:00Z",
    })
    .to_string();
    let (_dir, path) = write_transcript("c1", &[header]);
    let error = JsonlTranscriptStore::open(&path, &ConversationId::from("c1"))
        .expect_err("version 2 must fail");
    assert!(matches!(
        error,
        StoreError::UnsupportedVersion { found: 2, .. }
    ));
}

#[test]
fn open_rejects_header_for_other_conversation() {
    let (_dir, path) = write_transcript("c1", &[header_line("c2")]);
    let error = JsonlTranscriptStore::open(&path, &ConversationId::from("c1"))
        .expect_err("foreign header must fail");
    assert!(matches!(
        error,
        StoreError::ConversationMismatch { ref found, .. } if found == "c2"
    ));
}

#[test]
fn open_reports_invalid_timestamp_with_line() {
    let (_dir, path) = write_transcript(
        "c1",
        &[
            header_line("c1"),
            message_line("m1", "user", "yesterday", "Hola"),
        ],
    );
    let error = JsonlTranscriptStore::open(&path, &ConversationId::from("c1"))
        .expect_err("bad timestamp must fail");
    assert!(matches!(
        error,
        StoreError::InvalidTimestamp { line: 2, field: "created_at", .. }
    ));
}

#[test]
fn open_rejects_duplicate_message_ids() {
    let (_dir, path) = write_transcript(
        "c1",
        &[
            header_line("c1"),
            message_line("m1", "user", "2026-02-14T00:00:01Z", "a"),
            message_line("m1", "assistant", "2026-02-14T00:00:02Z", "b"),
        ],
    );
    let error = JsonlTranscriptStore::open(&path, &ConversationId::from("c1"))
        .expect_err("duplicate id must fail");
    assert!(matches!(
        error,
        StoreError::DuplicateMessageId { line: 3, ref id, .. } if id == "m1"
    ));
}

#[test]
fn open_rejects_unknown_role() {
    let (_dir, path) = write_transcript(
        "c1",
        &[
            header_line("c1"),
            message_line("m1", "system", "2026-02-14T00:00:01Z", "a"),
        ],
    );
    let error = JsonlTranscriptStore::open(&path, &ConversationId::from("c1"))
        .expect_err("unknown role must fail");
    assert!(matches!(error, StoreError::JsonLineParse { line: 2, .. }));
}

#[test]
fn jsonl_store_appends_and_reloads() {
    let dir = tempfile::tempdir().expect("tempdir");
    let conversation = ConversationId::from("coaching-1");

    let store = JsonlTranscriptStore::new(dir.path()).expect("store");
    assert!(store
        .list_messages(&conversation)
        .expect("missing transcript lists empty")
        .is_empty());

    let user = store
        .append_message(NewMessage::new(conversation.clone(), Role::User, "Hola"))
        .expect("user append");
    let assistant = store
        .append_message(NewMessage::new(
            conversation.clone(),
            Role::Assistant,
            "Hola mundo",
        ))
        .expect("assistant append");
    assert!(assistant.created_at > user.created_at);

    let reopened = JsonlTranscriptStore::new(dir.path()).expect("reopen");
    let messages = reopened.list_messages(&conversation).expect("list");
    assert_eq!(messages, vec![user, assistant]);
}

#[test]
fn jsonl_store_keeps_punctuation_variants_apart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let dotted = ConversationId::from("a.b");
    let dashed = ConversationId::from("a-b");

    JsonlTranscriptStore::new(dir.path())
        .expect("store")
        .append_message(NewMessage::new(dotted.clone(), Role::User, "con punto"))
        .expect("dotted append");
    JsonlTranscriptStore::new(dir.path())
        .expect("fresh store")
        .append_message(NewMessage::new(dashed.clone(), Role::User, "con guion"))
        .expect("dashed append");

    let store = JsonlTranscriptStore::new(dir.path()).expect("reopen");
    let contents = |id: &ConversationId| -> Vec<String> {
        store
            .list_messages(id)
            .expect("list")
            .into_iter()
            .map(|message| message.content)
            .collect()
    };
    assert_eq!(contents(&dotted), vec!["con punto".to_string()]);
    assert_eq!(contents(&dashed), vec!["con guion".to_string()]);
    assert_ne!(
        transcript_path(dir.path(), dotted.as_str()),
        transcript_path(dir.path(), dashed.as_str())
    );
}

#[test]
fn stores_keep_content_verbatim_and_reject_empty() {
    let store = MemoryStore::new();
    let conversation = ConversationId::from("c");
    let error = store
        .append_message(NewMessage::new(conversation.clone(), Role::User, ""))
        .expect_err("empty content must fail");
    assert!(matches!(error, StoreError::EmptyField { field: "content" }));

    let stored = store
        .append_message(NewMessage::new(conversation, Role::Assistant, "  sí\n"))
        .expect("whitespace is preserved");
    assert_eq!(stored.content, "  sí\n");
}

#[test]
fn conversations_default_title_and_order_by_activity() {
    let store = MemoryStore::new();
    let first = store.create_conversation(None).expect("first");
    let second = store
        .create_conversation(Some("  Objetivos  "))
        .expect("second");
    assert_eq!(first.title, DEFAULT_CONVERSATION_TITLE);
    assert_eq!(second.title, "Objetivos");

    store
        .append_message(NewMessage::new(first.id.clone(), Role::User, "Hola"))
        .expect("append");

    let order: Vec<ConversationId> = store
        .list_conversations()
        .expect("list")
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(order, vec![first.id.clone(), second.id.clone()]);

    store.touch_conversation(&second.id).expect("touch");
    let head = store.list_conversations().expect("list")[0].id.clone();
    assert_eq!(head, second.id);
}

#[test]
fn rename_validates_and_delete_drops_messages() {
    let store = MemoryStore::new();
    let conversation = store.create_conversation(None).expect("create");

    let error = store
        .rename_conversation(&conversation.id, "   ")
        .expect_err("blank title must fail");
    assert!(matches!(error, StoreError::InvalidTitle(_)));

    let renamed = store
        .rename_conversation(&conversation.id, " Semana 2 ")
        .expect("rename");
    assert_eq!(renamed.title, "Semana 2");

    store
        .append_message(NewMessage::new(conversation.id.clone(), Role::User, "x"))
        .expect("append");
    store
        .delete_conversation(&conversation.id)
        .expect("delete");
    assert!(store
        .list_messages(&conversation.id)
        .expect("list")
        .is_empty());
    assert!(matches!(
        store.delete_conversation(&conversation.id),
        Err(StoreError::NotFound { entity: "conversation", .. })
    ));
}

#[test]
fn tasks_list_newest_first_and_toggle() {
    let store = MemoryStore::new();
    let older = store
        .create_task(NewTask {
            title: "Leer 10 páginas".into(),
            ..NewTask::default()
        })
        .expect("older");
    let newer = store
        .create_task(NewTask {
            title: "Caminar".into(),
            description: Some("   ".into()),
            due_date: Some(date!(2026 - 03 - 01)),
        })
        .expect("newer");
    assert_eq!(newer.description, None);

    let titles: Vec<String> = store
        .list_tasks()
        .expect("list")
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(titles, vec!["Caminar".to_string(), "Leer 10 páginas".to_string()]);

    assert!(store.toggle_task(&older.id).expect("toggle").completed);
    assert!(!store.toggle_task(&older.id).expect("toggle back").completed);

    store.delete_task(&newer.id).expect("delete");
    assert_eq!(store.list_tasks().expect("list").len(), 1);

    let error = store
        .create_task(NewTask::default())
        .expect_err("blank title must fail");
    assert!(matches!(error, StoreError::EmptyField { field: "title" }));
}

#[test]
fn events_are_listed_by_date() {
    let store = MemoryStore::new();
    store
        .create_event(NewEvent {
            title: "Meta trimestral".into(),
            description: None,
            event_date: datetime!(2026-06-30 09:00 UTC),
            kind: EventKind::Goal,
        })
        .expect("goal");
    let appointment = store
        .create_event(NewEvent {
            title: "Sesión".into(),
            description: Some("Revisión semanal".into()),
            event_date: datetime!(2026-03-02 17:30 UTC),
            kind: EventKind::Appointment,
        })
        .expect("appointment");

    let events = store.list_events().expect("list");
    assert_eq!(events[0].id, appointment.id);
    assert_eq!(events[1].kind, EventKind::Goal);

    assert!(store.toggle_event(&appointment.id).expect("toggle").completed);
}

#[test]
fn habit_tracking_cycles_and_scores() {
    let store = MemoryStore::new();
    let habit = store.create_habit("Meditar", None).expect("habit");
    assert_eq!(habit.color, coach_store::DEFAULT_HABIT_COLOR);

    let monday = date!(2026 - 03 - 02);
    let tuesday = date!(2026 - 03 - 03);
    let wednesday = date!(2026 - 03 - 04);

    let statuses: Vec<TrackingStatus> = (0..4)
        .map(|_| store.cycle_tracking(&habit.id, monday).expect("cycle").status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            TrackingStatus::Completed,
            TrackingStatus::Failed,
            TrackingStatus::Pending,
            TrackingStatus::Completed,
        ]
    );

    store.cycle_tracking(&habit.id, tuesday).expect("tuesday");
    store.cycle_tracking(&habit.id, wednesday).expect("wednesday");
    store.cycle_tracking(&habit.id, wednesday).expect("wednesday failed");

    assert_eq!(
        store
            .completion_rate(&habit.id, monday, wednesday)
            .expect("rate"),
        67
    );
    assert_eq!(
        store
            .completion_rate(&habit.id, date!(2026 - 04 - 01), date!(2026 - 04 - 30))
            .expect("empty range"),
        0
    );

    store.deactivate_habit(&habit.id).expect("deactivate");
    assert!(store.list_active_habits().expect("list").is_empty());
    assert_eq!(
        store
            .tracking_between(monday, wednesday)
            .expect("history kept")
            .len(),
        3
    );
}
