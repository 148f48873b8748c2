use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::{Value, json};

/// Message returned to the caller when the failure carries nothing it should see.
pub const GENERIC_ERROR_MESSAGE: &str = "An unexpected internal server error occurred.";

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// No usable credential, or the client could not be built.
    #[error("Backend configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Request must be JSON")]
    UnsupportedMediaType,

    #[error("{0}")]
    PayloadTooLarge(String),

    /// Upstream answered with a non-2xx status and a JSON error body.
    #[error("API returned error (status {status}): {details}")]
    UpstreamApi { status: u16, details: Value },

    #[error("Network error communicating with upstream API: {0}")]
    Transport(#[from] reqwest::Error),

    /// One stream line that is not valid JSON. Logged and skipped, never sent to the caller.
    #[error("Failed to parse JSON in stream line {line:?}: {source}")]
    StreamDecode {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unexpected upstream response: {0}")]
    UnexpectedResponse(String),
}

impl RelayError {
    /// Text placed in the `error` field of the response body.
    pub fn caller_message(&self) -> String {
        match self {
            RelayError::UpstreamApi { .. } => format!("API Error: {}", self),
            RelayError::StreamDecode { .. } | RelayError::UnexpectedResponse(_) => {
                GENERIC_ERROR_MESSAGE.to_string()
            }
            _ => self.to_string(),
        }
    }

    /// The in-band event frame written when a stream fails after the status line is committed.
    pub fn stream_frame(&self) -> String {
        let payload = json!({ "error": format!("Error during streaming: {}", self) });
        format!("data: {}\n\n", payload)
    }
}

impl ResponseError for RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            RelayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::Configuration(_)
            | RelayError::UpstreamApi { .. }
            | RelayError::StreamDecode { .. }
            | RelayError::UnexpectedResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.caller_message() }))
    }
}
