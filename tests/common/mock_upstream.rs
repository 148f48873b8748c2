use actix_web::dev::ServerHandle;
use actix_web::http::StatusCode;
use actix_web::http::header::{ACCEPT, AUTHORIZATION};
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
use bytes::Bytes;
use futures::{StreamExt, stream};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the mock answers on `POST /v1/chat/completions`.
#[derive(Clone, Debug)]
pub enum MockReply {
    Json(Value),
    /// Raw body chunks of a `text/event-stream` response.
    Sse(Vec<String>),
    /// Sends the chunks, then drops the connection without finishing the body.
    SseAbort(Vec<String>),
    /// Sends the chunks, then keeps the body open without sending more.
    SseStall(Vec<String>),
    Error { status: u16, body: String },
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub authorization: Option<String>,
    pub accept: Option<String>,
    pub body: Value,
}

struct MockState {
    reply: MockReply,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Chat-completion API stand-in bound to an ephemeral local port.
pub struct MockUpstream {
    base_url: String,
    state: Arc<MockState>,
    handle: ServerHandle,
}

impl MockUpstream {
    pub async fn start(reply: MockReply) -> Self {
        let state = Arc::new(MockState {
            reply,
            requests: Mutex::new(Vec::new()),
        });
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let data = web::Data::from(state.clone());
        let server = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .route("/v1/chat/completions", web::post().to(chat_completions))
        })
        .workers(1)
        .shutdown_timeout(1)
        .disable_signals()
        .listen(listener)
        .unwrap()
        .run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        Self {
            base_url: format!("http://127.0.0.1:{}/v1", port),
            state,
            handle,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub async fn stop(self) {
        self.handle.stop(true).await;
    }
}

fn header(req: &HttpRequest, name: actix_web::http::header::HeaderName) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn chat_completions(
    req: HttpRequest,
    body: web::Json<Value>,
    state: web::Data<MockState>,
) -> HttpResponse {
    state.requests.lock().unwrap().push(RecordedRequest {
        authorization: header(&req, AUTHORIZATION),
        accept: header(&req, ACCEPT),
        body: body.into_inner(),
    });

    match &state.reply {
        MockReply::Json(doc) => HttpResponse::Ok().json(doc),
        MockReply::Sse(chunks) => event_stream_response(stream::iter(sse_chunks(chunks))),
        MockReply::SseAbort(chunks) => {
            let abort = stream::once(async {
                // let the earlier chunks reach the client first
                actix_web::rt::time::sleep(Duration::from_millis(100)).await;
                Err(actix_web::error::ErrorInternalServerError("upstream aborted"))
            });
            event_stream_response(stream::iter(sse_chunks(chunks)).chain(abort))
        }
        MockReply::SseStall(chunks) => {
            event_stream_response(stream::iter(sse_chunks(chunks)).chain(stream::pending()))
        }
        MockReply::Error { status, body } => {
            HttpResponse::build(StatusCode::from_u16(*status).unwrap()).body(body.clone())
        }
    }
}

fn sse_chunks(chunks: &[String]) -> Vec<Result<Bytes, actix_web::Error>> {
    chunks.iter().map(|c| Ok(Bytes::from(c.clone()))).collect()
}

fn event_stream_response(
    body: impl futures::Stream<Item = Result<Bytes, actix_web::Error>> + 'static,
) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/event-stream")
        .streaming(body)
}
