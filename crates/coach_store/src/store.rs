use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use crate::error::StoreError;
use crate::paths::transcript_path;
use crate::schema::{
    ConversationId, JsonLine, Message, MessageId, MessageRecord, NewMessage, TranscriptHeader,
};
use crate::stores::{require_content, TranscriptStore};

/// File-backed transcript log: one JSONL file per conversation under `root`.
///
/// Transcripts are validated on first access and cached afterwards; every
/// append is written through before it is returned. Each conversation has its
/// own lock, so file I/O for one never waits on another.
pub struct JsonlTranscriptStore {
    root: PathBuf,
    slots: Mutex<HashMap<ConversationId, Slot>>,
}

/// Cached transcript of one conversation; `None` until first read.
type Slot = Arc<Mutex<Option<Vec<Message>>>>;

impl JsonlTranscriptStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|source| StoreError::io("creating transcript directory", &root, source))?;
        Ok(Self {
            root,
            slots: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads and validates the transcript file of one conversation.
    pub fn open(path: &Path, expected: &ConversationId) -> Result<Vec<Message>, StoreError> {
        let read_file =
            File::open(path).map_err(|source| StoreError::io("opening transcript", path, source))?;
        let reader = BufReader::new(read_file);

        let mut header: Option<TranscriptHeader> = None;
        let mut seen_ids = HashSet::new();
        let mut messages = Vec::new();

        for (line_index, line_result) in reader.lines().enumerate() {
            let line_number = line_index + 1;
            let line = line_result.map_err(|source| StoreError::io_line(path, line_number, source))?;
            let parsed = parse_json_line(path, line_number, &line)?;

            if line_number == 1 {
                match parsed {
                    JsonLine::Transcript(parsed_header) => {
                        validate_header_line(path, line_number, &parsed_header, expected)?;
                        header = Some(parsed_header);
                    }
                    JsonLine::Message(_) => {
                        return Err(StoreError::InvalidHeaderRecord {
                            path: path.to_path_buf(),
                            line: line_number,
                        });
                    }
                }
                continue;
            }

            match parsed {
                JsonLine::Transcript(_) => {
                    return Err(StoreError::InvalidMessageRecord {
                        path: path.to_path_buf(),
                        line: line_number,
                    });
                }
                JsonLine::Message(record) => {
                    let created_at =
                        parse_rfc3339(path, line_number, "created_at", &record.created_at)?;
                    if !seen_ids.insert(record.id.clone()) {
                        return Err(StoreError::DuplicateMessageId {
                            path: path.to_path_buf(),
                            line: line_number,
                            id: record.id.to_string(),
                        });
                    }
                    messages.push(Message {
                        id: record.id,
                        conversation_id: expected.clone(),
                        role: record.role,
                        content: record.content,
                        created_at,
                    });
                }
            }
        }

        if header.is_none() {
            return Err(StoreError::MissingHeader {
                path: path.to_path_buf(),
            });
        }

        Ok(messages)
    }

    fn slot(&self, conversation_id: &ConversationId) -> Slot {
        let mut slots = lock_unpoisoned(&self.slots);
        Arc::clone(slots.entry(conversation_id.clone()).or_default())
    }

    fn load_into<'a>(
        &self,
        cached: &'a mut Option<Vec<Message>>,
        conversation_id: &ConversationId,
    ) -> Result<&'a mut Vec<Message>, StoreError> {
        if cached.is_none() {
            let path = transcript_path(&self.root, conversation_id.as_str());
            let messages = if path.exists() {
                Self::open(&path, conversation_id)?
            } else {
                Vec::new()
            };
            tracing::debug!(
                conversation = %conversation_id,
                count = messages.len(),
                "loaded transcript"
            );
            *cached = Some(messages);
        }
        cached
            .as_mut()
            .ok_or_else(|| StoreError::not_found("conversation", conversation_id))
    }

    fn write_lines(&self, path: &Path, lines: &[JsonLine]) -> Result<(), StoreError> {
        let mut buffer = String::new();
        for line in lines {
            let encoded =
                serde_json::to_string(line).map_err(|source| StoreError::json_serialize(path, source))?;
            buffer.push_str(&encoded);
            buffer.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| StoreError::io("opening transcript for append", path, source))?;
        file.write_all(buffer.as_bytes())
            .map_err(|source| StoreError::io("appending to transcript", path, source))?;
        file.flush()
            .map_err(|source| StoreError::io("flushing transcript", path, source))
    }
}

impl TranscriptStore for JsonlTranscriptStore {
    fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let content = require_content(&message.content)?;
        let path = transcript_path(&self.root, message.conversation_id.as_str());

        let slot = self.slot(&message.conversation_id);
        let mut cached = lock_unpoisoned(&slot);
        let messages = self.load_into(&mut cached, &message.conversation_id)?;

        let mut created_at = OffsetDateTime::now_utc();
        if let Some(last) = messages.last() {
            if created_at <= last.created_at {
                created_at = last.created_at + Duration::nanoseconds(1);
            }
        }
        let stamp = created_at.format(&Rfc3339).map_err(StoreError::ClockFormat)?;

        let mut lines = Vec::with_capacity(2);
        if !path.exists() {
            lines.push(JsonLine::Transcript(TranscriptHeader::v1(
                message.conversation_id.clone(),
                stamp.clone(),
            )));
        }
        let id = MessageId::generate();
        lines.push(JsonLine::Message(MessageRecord {
            id: id.clone(),
            role: message.role,
            content: content.clone(),
            created_at: stamp,
        }));
        self.write_lines(&path, &lines)?;

        let stored = Message {
            id,
            conversation_id: message.conversation_id,
            role: message.role,
            content,
            created_at,
        };
        messages.push(stored.clone());
        Ok(stored)
    }

    fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        let slot = self.slot(conversation_id);
        let mut cached = lock_unpoisoned(&slot);
        let messages = self.load_into(&mut cached, conversation_id)?;
        Ok(messages.clone())
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn parse_json_line(
    path: &Path,
    line_number: usize,
    line: &str,
) -> Result<JsonLine, StoreError> {
    serde_json::from_str::<JsonLine>(line)
        .map_err(|source| StoreError::json_line(path, line_number, source))
}

pub(crate) fn validate_header_line(
    path: &Path,
    line_number: usize,
    header: &TranscriptHeader,
    expected: &ConversationId,
) -> Result<(), StoreError> {
    if header.version != 1 {
        return Err(StoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            line: line_number,
            found: header.version,
        });
    }

    parse_rfc3339(path, line_number, "created_at", &header.created_at)?;

    if &header.conversation_id != expected {
        return Err(StoreError::ConversationMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            found: header.conversation_id.to_string(),
        });
    }

    Ok(())
}

pub(crate) fn parse_rfc3339(
    path: &Path,
    line_number: usize,
    field: &'static str,
    value: &str,
) -> Result<OffsetDateTime, StoreError> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|_| StoreError::InvalidTimestamp {
        path: path.to_path_buf(),
        line: line_number,
        field,
        value: value.to_string(),
    })
}
