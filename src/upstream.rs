use crate::config::UpstreamConfig;
use crate::error::RelayError;
use crate::io_struct::{ChatCompletion, StreamFragment, UpstreamPayload};
use crate::sse::{SseDecoder, SseEvent};
use bytes::Bytes;
use futures::{Stream, ready};
use reqwest::header::ACCEPT;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;
type ReleaseHook = Box<dyn FnOnce() + Send>;

pub enum CompletionResult {
    Single(ChatCompletion),
    Stream(FragmentStream),
}

impl CompletionResult {
    pub fn is_stream(&self) -> bool {
        matches!(self, CompletionResult::Stream(_))
    }
}

impl fmt::Debug for CompletionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionResult::Single(c) => f.debug_tuple("Single").field(c).finish(),
            CompletionResult::Stream(s) => f.debug_tuple("Stream").field(s).finish(),
        }
    }
}

/// One session with the chat-completion API. Built per inbound request and
/// consumed by [`UpstreamClient::complete`]; the session is released when the
/// client is dropped, which happens exactly once.
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    release_hook: Option<ReleaseHook>,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, RelayError> {
        let api_key = config.credential.resolve()?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RelayError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            release_hook: None,
        })
    }

    /// Run `hook` when the session is released.
    pub fn with_release_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.release_hook = Some(Box::new(hook));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_path(&self, api_path: &str) -> String {
        if api_path.starts_with('/') {
            format!("{}{}", self.base_url, api_path)
        } else {
            format!("{}/{}", self.base_url, api_path)
        }
    }

    /// Ask for a completion. `system_content` of `None` uses the default assistant prompt.
    pub async fn complete(
        self,
        model: &str,
        user_content: &str,
        system_content: Option<&str>,
        stream: bool,
    ) -> Result<CompletionResult, RelayError> {
        if model.is_empty() {
            return Err(RelayError::BadRequest("model must not be empty".to_string()));
        }
        if user_content.is_empty() {
            return Err(RelayError::BadRequest(
                "user_content must not be empty".to_string(),
            ));
        }
        let payload = UpstreamPayload::new(model, user_content, system_content, stream);
        self.send(&payload).await
    }

    pub async fn send(self, payload: &UpstreamPayload) -> Result<CompletionResult, RelayError> {
        let url = self.api_path("/chat/completions");
        let mut request = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(payload);
        if payload.stream {
            request = request.header(ACCEPT, "text/event-stream");
        }

        let resp = request.send().await.inspect_err(|e| {
            log::error!("Failed to reach upstream {}: {}", self.base_url, e);
        })?;
        let resp = check_status(resp).await?;

        if payload.stream {
            return Ok(CompletionResult::Stream(FragmentStream::new(
                resp.bytes_stream(),
                self,
            )));
        }
        let body = resp.bytes().await?;
        let completion = serde_json::from_slice::<Value>(&body).map_err(|e| {
            RelayError::UnexpectedResponse(format!("completion body is not JSON: {}", e))
        })?;
        Ok(CompletionResult::Single(ChatCompletion(completion)))
    }
}

/// Turn a non-2xx response into `UpstreamApi` when it carries a JSON body, `Transport` otherwise.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, RelayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let status_error = resp.error_for_status_ref().err();
    let body = resp.bytes().await.unwrap_or_default();
    let details = if body.is_empty() {
        None
    } else {
        serde_json::from_slice::<Value>(&body).ok()
    };
    let err = match (details, status_error) {
        (Some(details), _) => RelayError::UpstreamApi {
            status: status.as_u16(),
            details,
        },
        (None, Some(e)) => RelayError::Transport(e),
        (None, None) => {
            RelayError::UnexpectedResponse(format!("upstream answered with status {}", status))
        }
    };
    log::error!("Upstream request failed: {}", err);
    Err(err)
}

impl fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Drop for UpstreamClient {
    fn drop(&mut self) {
        if let Some(hook) = self.release_hook.take() {
            hook();
        }
        log::debug!("Upstream session to {} closed", self.base_url);
    }
}

/// Lazy, single-pass stream of fragments decoded from the upstream SSE body.
///
/// Owns the session. It is released as soon as the stream reaches its end
/// (sentinel, end of body, or transport error) or when the stream is dropped.
pub struct FragmentStream {
    body: Option<ByteStream>,
    session: Option<UpstreamClient>,
    decoder: SseDecoder,
    pending: VecDeque<StreamFragment>,
}

impl FragmentStream {
    pub fn new(
        body: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
        session: UpstreamClient,
    ) -> Self {
        Self {
            body: Some(Box::pin(body)),
            session: Some(session),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
        }
    }

    /// True once the upstream body is gone; buffered fragments may still be pending.
    pub fn is_released(&self) -> bool {
        self.body.is_none() && self.session.is_none()
    }

    fn release(&mut self) {
        self.body = None;
        self.session = None;
    }

    fn push_events(&mut self, events: Vec<SseEvent>) {
        for event in events {
            match event {
                SseEvent::Fragment(fragment) => self.pending.push_back(fragment),
                SseEvent::Done => self.release(),
            }
        }
    }
}

impl Stream for FragmentStream {
    type Item = Result<StreamFragment, RelayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(fragment) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(fragment)));
            }
            let Some(body) = this.body.as_mut() else {
                return Poll::Ready(None);
            };
            match ready!(body.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => {
                    let events = this.decoder.feed(&chunk);
                    this.push_events(events);
                }
                Some(Err(e)) => {
                    this.release();
                    return Poll::Ready(Some(Err(RelayError::Transport(e))));
                }
                None => {
                    let events = this.decoder.finish();
                    this.push_events(events);
                    this.release();
                }
            }
        }
    }
}

impl fmt::Debug for FragmentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentStream")
            .field("session", &self.session)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
