//! Transport-only client primitives for the streamed chat completion function.
//!
//! This crate owns request building, status classification, and decoding of
//! the server-sent-event body into [`StreamEvent`]s. It holds no transcript
//! state and performs no retries.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod payload;
pub mod sse;
pub mod url;
pub mod utf8;

pub use client::{
    await_or_cancel, is_cancelled, ByteStream, CancellationSignal, CompletionBackend,
    CompletionClient,
};
pub use config::CompletionConfig;
pub use error::{classify_status, CompletionError, CompletionFailure};
pub use events::StreamEvent;
pub use payload::{ChatMessage, ChatRole, CompletionRequest};
pub use reqwest::StatusCode;
pub use sse::{DecoderOptions, SseLineDecoder};
pub use url::normalize_chat_url;
pub use utf8::Utf8StreamDecoder;
