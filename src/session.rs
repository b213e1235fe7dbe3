//! Conversation session controller: drives one chat turn end to end.
//!
//! A turn persists the user message, opens the completion stream, folds
//! decoded deltas into a pending assistant entry, and persists the reply once
//! the stream completes. Each conversation has its own busy flag, transcript
//! and snapshot channel, so turns on different conversations never share
//! state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coach_store::{
    ConversationId, Message, MessageId, NewMessage, Role, StoreError, TranscriptStore,
};
use completion_api::{
    await_or_cancel, is_cancelled, CancellationSignal, ChatMessage, ChatRole, CompletionBackend,
    CompletionRequest, DecoderOptions, SseLineDecoder, StreamEvent,
};
use futures_util::StreamExt;
use time::OffsetDateTime;
use tokio::sync::watch;

use crate::error::{PersistAction, TurnError};
use crate::notify::{lock_unpoisoned, Notice, SessionNotifier};
use crate::transcript::{DeltaMerge, Transcript, TranscriptSnapshot};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Bound on each wait for the transport: opening the stream and every chunk.
    pub stream_timeout: Option<Duration>,
    pub decoder: DecoderOptions,
}

impl SessionOptions {
    #[must_use]
    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_decoder(mut self, decoder: DecoderOptions) -> Self {
        self.decoder = decoder;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TurnPhase {
    #[default]
    Idle,
    UserTurnPersisted,
    StreamOpen,
    Streaming,
    Finalizing,
    /// The last turn ended with a reported failure. Cleared by the next turn.
    Failed,
}

/// Both persisted messages of a successful turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub user_message: Message,
    pub assistant_message: Message,
}

struct ActiveTurn {
    turn_id: u64,
    cancel: CancellationSignal,
}

struct ConversationState {
    transcript: Transcript,
    publisher: watch::Sender<TranscriptSnapshot>,
    phase: TurnPhase,
    active: Option<ActiveTurn>,
}

impl ConversationState {
    fn new() -> Self {
        let (publisher, _) = watch::channel(TranscriptSnapshot::default());
        Self {
            transcript: Transcript::new(),
            publisher,
            phase: TurnPhase::Idle,
            active: None,
        }
    }

    fn publish(&self) {
        self.publisher.send_replace(self.transcript.snapshot());
    }
}

pub struct ChatSession {
    store: Arc<dyn TranscriptStore>,
    backend: Arc<dyn CompletionBackend>,
    notifier: Arc<dyn SessionNotifier>,
    options: SessionOptions,
    conversations: Mutex<HashMap<ConversationId, ConversationState>>,
    next_turn_id: AtomicU64,
}

impl ChatSession {
    pub fn new(
        store: Arc<dyn TranscriptStore>,
        backend: Arc<dyn CompletionBackend>,
        notifier: Arc<dyn SessionNotifier>,
        options: SessionOptions,
    ) -> Self {
        Self {
            store,
            backend,
            notifier,
            options,
            conversations: Mutex::new(HashMap::new()),
            next_turn_id: AtomicU64::new(1),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Receives a fresh snapshot after every change to the visible transcript.
    pub fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> watch::Receiver<TranscriptSnapshot> {
        self.with_state(conversation_id, |state| state.publisher.subscribe())
    }

    pub fn snapshot(&self, conversation_id: &ConversationId) -> TranscriptSnapshot {
        self.with_state(conversation_id, |state| state.transcript.snapshot())
    }

    pub fn phase(&self, conversation_id: &ConversationId) -> TurnPhase {
        lock_unpoisoned(&self.conversations)
            .get(conversation_id)
            .map_or(TurnPhase::Idle, |state| state.phase)
    }

    pub fn is_busy(&self, conversation_id: &ConversationId) -> bool {
        lock_unpoisoned(&self.conversations)
            .get(conversation_id)
            .is_some_and(|state| state.active.is_some())
    }

    /// Replaces the visible transcript with the persisted one.
    pub fn load(&self, conversation_id: &ConversationId) -> Result<TranscriptSnapshot, TurnError> {
        let messages = match self.store.list_messages(conversation_id) {
            Ok(messages) => messages,
            Err(source) => {
                let error = TurnError::persistence(PersistAction::LoadConversation, source);
                tracing::warn!(conversation = %conversation_id, error = %error, "load failed");
                self.report(&error);
                return Err(error);
            }
        };

        self.with_state(conversation_id, |state| {
            if state.active.is_some() {
                return Err(TurnError::Busy(conversation_id.clone()));
            }
            state.transcript.reset(messages);
            state.publish();
            Ok(state.transcript.snapshot())
        })
    }

    /// Requests cancellation of the in-flight turn. Returns `false` when idle.
    pub fn cancel(&self, conversation_id: &ConversationId) -> bool {
        let conversations = lock_unpoisoned(&self.conversations);
        let Some(active) = conversations
            .get(conversation_id)
            .and_then(|state| state.active.as_ref())
        else {
            return false;
        };
        active.cancel.store(true, Ordering::Release);
        tracing::debug!(
            conversation = %conversation_id,
            turn = active.turn_id,
            "turn cancel requested"
        );
        true
    }

    /// Runs one turn. Dropping the returned future aborts the turn, closes the
    /// stream and discards the pending assistant entry.
    pub async fn submit(
        &self,
        conversation_id: &ConversationId,
        text: &str,
    ) -> Result<TurnOutcome, TurnError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(TurnError::EmptyMessage);
        }

        let mut turn = self.begin_turn(conversation_id)?;
        let result = self.run_turn(&mut turn, content).await;
        match result {
            Ok(outcome) => {
                turn.release();
                Ok(outcome)
            }
            Err(error) => Err(self.fail_turn(&mut turn, error)),
        }
    }

    fn begin_turn(&self, conversation_id: &ConversationId) -> Result<TurnGuard<'_>, TurnError> {
        let turn_id = self.next_turn_id.fetch_add(1, Ordering::SeqCst);
        let cancel: CancellationSignal = Arc::new(AtomicBool::new(false));

        self.with_state(conversation_id, |state| {
            if state.active.is_some() {
                tracing::debug!(conversation = %conversation_id, "turn rejected: busy");
                return Err(TurnError::Busy(conversation_id.clone()));
            }
            state.active = Some(ActiveTurn {
                turn_id,
                cancel: Arc::clone(&cancel),
            });
            state.phase = TurnPhase::Idle;
            Ok(())
        })?;

        tracing::debug!(conversation = %conversation_id, turn = turn_id, "turn started");
        Ok(TurnGuard {
            session: self,
            conversation_id: conversation_id.clone(),
            turn_id,
            cancel,
            pending_id: None,
            released: false,
        })
    }

    async fn run_turn(
        &self,
        turn: &mut TurnGuard<'_>,
        content: &str,
    ) -> Result<TurnOutcome, TurnError> {
        let conversation_id = turn.conversation_id.clone();
        let local_user = Message {
            id: MessageId::generate(),
            conversation_id: conversation_id.clone(),
            role: Role::User,
            content: content.to_owned(),
            created_at: OffsetDateTime::now_utc(),
        };

        let history = self.with_state(&conversation_id, |state| {
            state.transcript.upsert(local_user.clone(), false);
            state.publish();
            state
                .transcript
                .settled_messages()
                .map(chat_message)
                .collect::<Vec<_>>()
        });

        let user_message = match self
            .append(NewMessage::new(conversation_id.clone(), Role::User, content))
            .await
        {
            Ok(message) => message,
            Err(source) => {
                self.with_state(&conversation_id, |state| {
                    state.transcript.remove(&local_user.id);
                    state.publish();
                });
                return Err(TurnError::persistence(PersistAction::SaveUserMessage, source));
            }
        };
        self.with_state(&conversation_id, |state| {
            state.transcript.replace(&local_user.id, user_message.clone());
            state.publish();
        });
        self.set_phase(&conversation_id, TurnPhase::UserTurnPersisted);

        let signal = Arc::clone(&turn.cancel);
        let cancel = Some(&signal);
        if is_cancelled(cancel) {
            return Err(TurnError::Cancelled);
        }

        let timeout = self.options.stream_timeout;
        let request = CompletionRequest::new(history);
        self.set_phase(&conversation_id, TurnPhase::StreamOpen);
        let mut stream =
            await_or_cancel(self.backend.open_stream(&request), cancel, timeout).await??;

        let mut decoder = SseLineDecoder::new(self.options.decoder);
        let mut merge = DeltaMerge::new(conversation_id.clone());
        turn.pending_id = Some(merge.id().clone());
        let mut streaming = false;

        loop {
            let Some(chunk) = await_or_cancel(stream.next(), cancel, timeout).await? else {
                let tail = decoder.finish();
                self.merge_events(&conversation_id, &mut merge, &tail);
                break;
            };
            let bytes = chunk?;
            if !streaming {
                streaming = true;
                self.set_phase(&conversation_id, TurnPhase::Streaming);
            }

            let events = decoder.feed(&bytes);
            self.merge_events(&conversation_id, &mut merge, &events);
            if decoder.is_done() {
                break;
            }
        }
        drop(stream);

        self.set_phase(&conversation_id, TurnPhase::Finalizing);
        if is_cancelled(cancel) {
            return Err(TurnError::Cancelled);
        }

        let pending = merge.into_pending();
        if pending.content.is_empty() {
            return Err(TurnError::EmptyResponse);
        }

        let assistant_message = self
            .append(NewMessage::new(
                conversation_id.clone(),
                Role::Assistant,
                pending.content,
            ))
            .await
            .map_err(|source| TurnError::persistence(PersistAction::SaveAssistantMessage, source))?;

        self.with_state(&conversation_id, |state| {
            state.transcript.replace(&pending.id, assistant_message.clone());
            state.publish();
        });
        turn.pending_id = None;
        self.notifier.conversation_updated(&conversation_id);
        tracing::debug!(
            conversation = %conversation_id,
            turn = turn.turn_id,
            chars = assistant_message.content.chars().count(),
            "turn finished"
        );

        Ok(TurnOutcome {
            user_message,
            assistant_message,
        })
    }

    /// Appends on the blocking pool; store implementations may do file I/O.
    async fn append(&self, message: NewMessage) -> Result<Message, StoreError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.append_message(message))
            .await
            .map_err(|error| StoreError::Interrupted(error.to_string()))?
    }

    fn merge_events(
        &self,
        conversation_id: &ConversationId,
        merge: &mut DeltaMerge,
        events: &[StreamEvent],
    ) {
        let mut latest = None;
        for event in events {
            match event {
                StreamEvent::Delta { .. } => latest = merge.apply(event).or(latest),
                StreamEvent::Malformed { line } => {
                    tracing::debug!(
                        conversation = %conversation_id,
                        line = %line,
                        "dropped malformed frame"
                    );
                }
                StreamEvent::Done => {}
            }
        }

        if let Some(snapshot) = latest {
            self.with_state(conversation_id, |state| {
                state.transcript.upsert(snapshot, true);
                state.publish();
            });
        }
    }

    /// Rolls back the pending entry, then reports the failure once.
    fn fail_turn(&self, turn: &mut TurnGuard<'_>, error: TurnError) -> TurnError {
        let conversation_id = turn.conversation_id.clone();
        match error.failure_kind() {
            Some(_) => {
                tracing::warn!(
                    conversation = %conversation_id,
                    turn = turn.turn_id,
                    error = %error,
                    "turn failed"
                );
                turn.release_as(TurnPhase::Failed);
                self.report(&error);
            }
            None => {
                tracing::debug!(
                    conversation = %conversation_id,
                    turn = turn.turn_id,
                    error = %error,
                    "turn ended"
                );
                turn.release();
            }
        }
        error
    }

    fn report(&self, error: &TurnError) {
        if let Some(kind) = error.failure_kind() {
            let detail = error.user_detail();
            self.notifier.notify(Notice::for_failure(kind, detail.as_deref()));
        }
    }

    fn set_phase(&self, conversation_id: &ConversationId, phase: TurnPhase) {
        self.with_state(conversation_id, |state| state.phase = phase);
        tracing::debug!(conversation = %conversation_id, ?phase, "turn phase");
    }

    fn with_state<R>(
        &self,
        conversation_id: &ConversationId,
        f: impl FnOnce(&mut ConversationState) -> R,
    ) -> R {
        let mut conversations = lock_unpoisoned(&self.conversations);
        let state = conversations
            .entry(conversation_id.clone())
            .or_insert_with(ConversationState::new);
        f(state)
    }
}

/// Clears the busy flag and the pending entry however the turn ends,
/// including when the submit future is dropped.
struct TurnGuard<'a> {
    session: &'a ChatSession,
    conversation_id: ConversationId,
    turn_id: u64,
    cancel: CancellationSignal,
    pending_id: Option<MessageId>,
    released: bool,
}

impl TurnGuard<'_> {
    fn release(&mut self) {
        self.release_as(TurnPhase::Idle);
    }

    /// Frees the conversation and leaves `phase` visible until the next turn.
    fn release_as(&mut self, phase: TurnPhase) {
        if self.released {
            return;
        }
        self.released = true;

        let pending = self.pending_id.take();
        let turn_id = self.turn_id;
        self.session.with_state(&self.conversation_id, |state| {
            if let Some(id) = pending {
                if state.transcript.remove(&id).is_some() {
                    state.publish();
                }
            }
            if state
                .active
                .as_ref()
                .is_some_and(|active| active.turn_id == turn_id)
            {
                state.active = None;
            }
            state.phase = phase;
        });
        tracing::debug!(conversation = %self.conversation_id, ?phase, "turn phase");
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            tracing::debug!(
                conversation = %self.conversation_id,
                turn = self.turn_id,
                "turn abandoned before completion"
            );
            self.release();
        }
    }
}

fn chat_message(message: &Message) -> ChatMessage {
    let role = match message.role {
        Role::User => ChatRole::User,
        Role::Assistant => ChatRole::Assistant,
    };
    ChatMessage {
        role,
        content: message.content.clone(),
    }
}
