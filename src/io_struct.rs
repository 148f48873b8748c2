use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
pub const FALLBACK_MODEL: &str = "deepseek-r1-671b";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Body accepted on `POST /api/chat`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ChatRequest {
    pub user_content: Option<String>,
    pub system_content: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub stream: Option<bool>,
}

impl ChatRequest {
    pub fn user_content(&self) -> Option<&str> {
        self.user_content.as_deref().filter(|s| !s.is_empty())
    }

    /// `stream` absent or `null` means a single JSON response.
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// System prompt to forward. A request without one sends no system message.
    pub fn system_prompt(&self) -> &str {
        self.system_content.as_deref().unwrap_or("")
    }

    /// Request model, then the configured default, then [`FALLBACK_MODEL`].
    pub fn resolve_model(&self, configured_default: Option<String>) -> String {
        resolve_model(self.model.as_deref(), configured_default)
    }
}

pub fn resolve_model(requested: Option<&str>, configured_default: Option<String>) -> String {
    requested
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .or(configured_default.filter(|m| !m.is_empty()))
        .unwrap_or_else(|| FALLBACK_MODEL.to_string())
}

/// Exact body sent to `{base_url}/chat/completions`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

impl UpstreamPayload {
    /// `None` for the system prompt means [`DEFAULT_SYSTEM_PROMPT`]; an empty one is omitted.
    pub fn new(model: &str, user_content: &str, system_content: Option<&str>, stream: bool) -> Self {
        let system_content = system_content.unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let mut messages = Vec::with_capacity(2);
        if !system_content.is_empty() {
            messages.push(ChatMessage::system(system_content));
        }
        messages.push(ChatMessage::user(user_content));
        Self {
            model: model.to_string(),
            messages,
            stream,
        }
    }
}

/// Non-streamed completion, kept exactly as upstream sent it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ChatCompletion(pub Value);

impl ChatCompletion {
    pub fn content(&self) -> Option<&str> {
        self.0.pointer("/choices/0/message/content")?.as_str()
    }

    pub fn usage(&self) -> Option<&Value> {
        self.0.get("usage")
    }

    pub fn into_json(self) -> Value {
        self.0
    }
}

/// One `data:` payload of an upstream stream.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct StreamFragment(pub Value);

impl StreamFragment {
    pub fn delta_content(&self) -> Option<&str> {
        self.0.pointer("/choices/0/delta/content")?.as_str()
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.0.pointer("/choices/0/finish_reason")?.as_str()
    }

    /// True for payloads with no content at all: `null`, `false`, `0`, `""`, `[]` or `{}`.
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Number(n) => n.as_f64() == Some(0.0),
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
        }
    }

    /// `data: <json>\n\n`
    pub fn to_event_frame(&self) -> String {
        format!("data: {}\n\n", self.0)
    }
}
