//! Environment configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use completion_api::CompletionConfig;

use crate::session::SessionOptions;

pub const DEFAULT_DATA_DIR: &str = ".coach/transcripts";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub chat_url: Option<String>,
    pub api_key: Option<String>,
    pub stream_timeout: Option<Duration>,
    pub data_dir: PathBuf,
    pub log_filter: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            chat_url: env_string_opt("COACH_CHAT_URL"),
            api_key: env_string_opt("COACH_CHAT_KEY"),
            stream_timeout: env_millis_opt("COACH_STREAM_TIMEOUT_MS"),
            data_dir: env_string_opt("COACH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            log_filter: env_string_opt("COACH_LOG"),
        }
    }

    /// A missing key is left empty so the client reports it on first request.
    pub fn completion_config(&self) -> CompletionConfig {
        let config = CompletionConfig::new(self.api_key.clone().unwrap_or_default());
        match &self.chat_url {
            Some(url) => config.with_base_url(url),
            None => config,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        let options = SessionOptions::default();
        match self.stream_timeout {
            Some(timeout) => options.with_stream_timeout(timeout),
            None => options,
        }
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

// Zero and unparsable values disable the timeout.
fn env_millis_opt(key: &str) -> Option<Duration> {
    env_string_opt(key)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|millis| *millis > 0)
        .map(Duration::from_millis)
}
