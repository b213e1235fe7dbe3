use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Error as JsonError;

#[derive(Debug)]
pub enum CompletionError {
    MissingApiKey,
    InvalidBaseUrl(String),
    InvalidHeader(String),
    InvalidRequestPayload(String),
    Request(reqwest::Error),
    RateLimited { message: String },
    QuotaExceeded { message: String },
    Status(StatusCode, String),
    Stream(String),
    Serde(JsonError),
    TimedOut(Duration),
    Cancelled,
}

/// Coarse classification used by callers to pick a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionFailure {
    RateLimited,
    QuotaExceeded,
    Transport,
    Cancelled,
}

impl CompletionError {
    pub fn failure(&self) -> CompletionFailure {
        match self {
            Self::RateLimited { .. } => CompletionFailure::RateLimited,
            Self::QuotaExceeded { .. } => CompletionFailure::QuotaExceeded,
            Self::Cancelled => CompletionFailure::Cancelled,
            _ => CompletionFailure::Transport,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            Self::QuotaExceeded { .. } => Some(StatusCode::PAYMENT_REQUIRED),
            Self::Status(status, _) => Some(*status),
            Self::Request(error) => error.status(),
            _ => None,
        }
    }
}

/// Error body returned by the chat proxy. The proxy emits `{"error": "text"}`;
/// upstream gateways sometimes nest it as `{"error": {"message": "text"}}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayload {
    pub error: Option<ErrorValue>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ErrorValue {
    Text(String),
    Detailed { message: Option<String> },
}

impl ErrorValue {
    fn message(&self) -> Option<&str> {
        let message = match self {
            Self::Text(text) => text.as_str(),
            Self::Detailed { message } => message.as_deref()?,
        };
        non_empty_string(message.trim())
    }
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingApiKey => write!(f, "completion API key is required"),
            Self::InvalidBaseUrl(value) => write!(f, "invalid base URL: {value}"),
            Self::InvalidHeader(message) => write!(f, "invalid header: {message}"),
            Self::InvalidRequestPayload(message) => write!(f, "invalid request payload: {message}"),
            Self::Request(error) => write!(f, "request error: {error}"),
            Self::RateLimited { message } => write!(f, "rate limited: {message}"),
            Self::QuotaExceeded { message } => write!(f, "payment required: {message}"),
            Self::Status(status, message) => write!(f, "HTTP {status} {message}"),
            Self::Stream(message) => write!(f, "stream read failure: {message}"),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::TimedOut(after) => write!(f, "stream stalled for {}ms", after.as_millis()),
            Self::Cancelled => write!(f, "request was cancelled"),
        }
    }
}

impl std::error::Error for CompletionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(error) => Some(error),
            Self::Serde(error) => Some(error),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error)
    }
}

impl From<JsonError> for CompletionError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

/// Map a non-success response to its error variant.
pub fn classify_status(status: StatusCode, body: &str) -> CompletionError {
    let message = parse_error_message(status, body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => CompletionError::RateLimited { message },
        StatusCode::PAYMENT_REQUIRED => CompletionError::QuotaExceeded { message },
        _ => CompletionError::Status(status, message),
    }
}

pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorPayload>(body) {
        if let Some(message) = payload.error.as_ref().and_then(ErrorValue::message) {
            return message.to_owned();
        }
    }

    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}

fn non_empty_string(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
