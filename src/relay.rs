use crate::config::{UpstreamConfig, configured_default_model};
use crate::error::RelayError;
use crate::io_struct::{ChatRequest, StreamFragment};
use crate::upstream::{CompletionResult, FragmentStream, UpstreamClient};
use actix_web::HttpResponse;
use actix_web::http::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use log::{error, info, warn};
use std::fmt;
use std::sync::Arc;

pub const MISSING_USER_CONTENT: &str = "Missing 'user_content' in request body";

type ReleaseObserver = Arc<dyn Fn() + Send + Sync>;

/// Handles `POST /api/chat`. Holds only read-only upstream settings; every
/// request builds its own [`UpstreamClient`].
#[derive(Clone)]
pub struct RelayHandler {
    upstream: UpstreamConfig,
    on_release: Option<ReleaseObserver>,
}

impl RelayHandler {
    pub fn new(upstream: UpstreamConfig) -> Self {
        Self {
            upstream,
            on_release: None,
        }
    }

    /// Call `observer` each time a request's upstream session is released.
    pub fn with_release_observer(mut self, observer: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_release = Some(Arc::new(observer));
        self
    }

    pub fn upstream_config(&self) -> &UpstreamConfig {
        &self.upstream
    }

    /// Fresh client for one request; the credential is resolved again on every call.
    pub fn upstream_client(&self) -> Result<UpstreamClient, RelayError> {
        let client = UpstreamClient::new(&self.upstream)?;
        Ok(match &self.on_release {
            Some(observer) => {
                let observer = observer.clone();
                client.with_release_hook(move || observer())
            }
            None => client,
        })
    }

    pub async fn handle(&self, request: ChatRequest) -> Result<HttpResponse, RelayError> {
        let Some(user_content) = request.user_content() else {
            return Err(RelayError::BadRequest(MISSING_USER_CONTENT.to_string()));
        };
        let model = request.resolve_model(configured_default_model());

        let client = self.upstream_client().inspect_err(|e| {
            error!("Failed to initialize upstream client: {}", e);
        })?;

        if request.is_stream() {
            info!("Starting stream for model {}", model);
            let frames = event_stream(
                client,
                model,
                user_content.to_string(),
                request.system_prompt().to_string(),
            );
            return Ok(HttpResponse::Ok()
                .insert_header((CONTENT_TYPE, HeaderValue::from_static("text/event-stream")))
                .insert_header((CACHE_CONTROL, HeaderValue::from_static("no-cache")))
                .streaming(frames));
        }

        info!("Sending non-stream request for model {}", model);
        let result = client
            .complete(&model, user_content, Some(request.system_prompt()), false)
            .await;
        match result {
            Ok(CompletionResult::Single(completion)) => {
                info!("Non-stream request successful.");
                Ok(HttpResponse::Ok().json(completion))
            }
            Ok(CompletionResult::Stream(_)) => {
                let err = RelayError::UnexpectedResponse(
                    "stream returned for a non-stream request".to_string(),
                );
                log_failure(&err);
                Err(err)
            }
            Err(err) => {
                log_failure(&err);
                Err(err)
            }
        }
    }
}

impl fmt::Debug for RelayHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayHandler")
            .field("upstream", &self.upstream)
            .field("observed", &self.on_release.is_some())
            .finish()
    }
}

fn log_failure(err: &RelayError) {
    match err {
        RelayError::UpstreamApi { .. } => error!("API Error: {}", err),
        RelayError::Transport(_) => error!("Network Error communicating with upstream: {}", err),
        _ => error!("An unexpected error occurred: {:?}", err),
    }
}

type Frame = Result<Bytes, actix_web::Error>;

enum StreamState {
    Connect {
        client: UpstreamClient,
        model: String,
        user_content: String,
        system_content: String,
    },
    Relay {
        fragments: FragmentStream,
        sent: usize,
    },
    Finished,
}

/// Body of a streamed response. The upstream call is made on the first poll,
/// after the 200 status line is committed, so every failure from then on is
/// reported as one final `data: {"error": ...}` frame. Dropping the body
/// (caller disconnect) drops the upstream session with it.
fn event_stream(
    client: UpstreamClient,
    model: String,
    user_content: String,
    system_content: String,
) -> impl Stream<Item = Frame> {
    let initial = StreamState::Connect {
        client,
        model,
        user_content,
        system_content,
    };
    stream::unfold(initial, |state| async move {
        let (mut fragments, sent) = match state {
            StreamState::Connect {
                client,
                model,
                user_content,
                system_content,
            } => {
                let result = client
                    .complete(&model, &user_content, Some(&system_content), true)
                    .await;
                match result {
                    Ok(CompletionResult::Stream(fragments)) => (fragments, 0),
                    Ok(CompletionResult::Single(_)) => {
                        let err = RelayError::UnexpectedResponse(
                            "single document returned for a stream request".to_string(),
                        );
                        return Some((error_frame(&err), StreamState::Finished));
                    }
                    Err(err) => return Some((error_frame(&err), StreamState::Finished)),
                }
            }
            StreamState::Relay { fragments, sent } => (fragments, sent),
            StreamState::Finished => return None,
        };

        loop {
            match fragments.next().await {
                Some(Ok(fragment)) if fragment.is_empty() => {
                    warn!("Received an empty chunk from stream");
                }
                Some(Ok(fragment)) => {
                    return Some((
                        data_frame(&fragment),
                        StreamState::Relay {
                            fragments,
                            sent: sent + 1,
                        },
                    ));
                }
                Some(Err(err)) => {
                    warn!("Stream aborted after {} messages", sent);
                    return Some((error_frame(&err), StreamState::Finished));
                }
                None => {
                    info!("Stream finished. Sent {} messages.", sent);
                    return None;
                }
            }
        }
    })
}

fn data_frame(fragment: &StreamFragment) -> Frame {
    Ok(Bytes::from(fragment.to_event_frame()))
}

fn error_frame(err: &RelayError) -> Frame {
    error!("Error during streaming: {}", err);
    Ok(Bytes::from(err.stream_frame()))
}
