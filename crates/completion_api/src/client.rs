use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};

use crate::config::CompletionConfig;
use crate::error::{classify_status, CompletionError};
use crate::headers::build_headers;
use crate::payload::CompletionRequest;
use crate::url::normalize_chat_url;

/// Optional cancellation signal shared across request and stream loops.
pub type CancellationSignal = Arc<AtomicBool>;

/// Raw response body chunks as delivered by the transport.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, CompletionError>>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Anything that can open a streamed completion for a request.
///
/// A non-success HTTP status must surface as an error from `open_stream`,
/// never as a byte stream.
pub trait CompletionBackend: Send + Sync {
    fn open_stream<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<ByteStream, CompletionError>>;
}

#[derive(Debug)]
pub struct CompletionClient {
    http: Client,
    config: CompletionConfig,
}

impl CompletionClient {
    pub fn new(config: CompletionConfig) -> Result<Self, CompletionError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build().map_err(CompletionError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    pub fn normalized_endpoint(&self) -> String {
        normalize_chat_url(&self.config.base_url)
    }

    pub fn build_headers(&self) -> Result<HeaderMap, CompletionError> {
        let headers = build_headers(&self.config)?;
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| CompletionError::InvalidHeader(format!("invalid key: {key}")))?,
                HeaderValue::from_str(&value)
                    .map_err(|_| CompletionError::InvalidHeader(format!("invalid value for {key}")))?,
            );
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        request: &CompletionRequest,
    ) -> Result<reqwest::RequestBuilder, CompletionError> {
        validate_request(request)?;

        let headers = self.build_headers()?;
        Ok(self
            .http
            .post(self.normalized_endpoint())
            .headers(headers)
            .json(request))
    }

    /// Send one request. There is no retry: 429 and 402 are returned to the
    /// caller as distinct errors.
    pub async fn send(&self, request: &CompletionRequest) -> Result<Response, CompletionError> {
        let response = self.build_request(request)?.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
        tracing::warn!(status = status.as_u16(), "completion request rejected");
        Err(classify_status(status, &body))
    }
}

impl CompletionBackend for CompletionClient {
    fn open_stream<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<ByteStream, CompletionError>> {
        Box::pin(async move {
            let response = self.send(request).await?;
            let bytes = response
                .bytes_stream()
                .map_ok(|chunk| chunk.to_vec())
                .map_err(|error| CompletionError::Stream(error.to_string()));
            Ok(bytes.boxed())
        })
    }
}

fn validate_request(request: &CompletionRequest) -> Result<(), CompletionError> {
    if request.messages.is_empty() {
        return Err(CompletionError::InvalidRequestPayload(
            "'messages' must contain at least one message".to_owned(),
        ));
    }
    Ok(())
}

pub fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

/// Await `future`, giving up on cancellation or when `deadline` elapses.
pub async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
    deadline: Option<Duration>,
) -> Result<F::Output, CompletionError>
where
    F: Future,
{
    if cancellation.is_none() {
        return match deadline {
            Some(limit) => tokio::time::timeout(limit, future)
                .await
                .map_err(|_| CompletionError::TimedOut(limit)),
            None => Ok(future.await),
        };
    }

    let started = tokio::time::Instant::now();
    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(CompletionError::Cancelled);
        }
        if let Some(limit) = deadline {
            if started.elapsed() >= limit {
                return Err(CompletionError::TimedOut(limit));
            }
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(CompletionError::Cancelled);
            }
            return Ok(output);
        }
    }
}
