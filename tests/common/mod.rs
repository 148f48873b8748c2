// Shared by the integration test binaries
#![allow(dead_code)]

pub mod mock_upstream;

use std::time::Duration;
use zju_chat_relay::{CredentialSource, UpstreamConfig};

pub const TEST_API_KEY: &str = "sk-relay-test";
pub const TEST_MODEL: &str = "test-model";

/// Upstream settings pointing at `base_url` with an explicit test key.
pub fn upstream_config(base_url: &str) -> UpstreamConfig {
    UpstreamConfig {
        base_url: base_url.to_string(),
        credential: CredentialSource::Explicit(TEST_API_KEY.to_string()),
        timeout: Duration::from_secs(5),
    }
}

/// An address nothing is listening on.
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}/v1", port)
}

/// Split an event-stream body into its `data:` payloads, checking every frame's shape.
pub fn parse_event_frames(body: &[u8]) -> Vec<serde_json::Value> {
    let text = String::from_utf8_lossy(body);
    assert!(
        text.is_empty() || text.ends_with("\n\n"),
        "unterminated frame: {:?}",
        text
    );
    text.split_terminator("\n\n")
        .map(|frame| {
            let payload = frame
                .strip_prefix("data: ")
                .unwrap_or_else(|| panic!("frame without data prefix: {:?}", frame));
            assert!(!payload.contains('\n'), "multi-line frame: {:?}", frame);
            serde_json::from_str(payload)
                .unwrap_or_else(|e| panic!("frame is not JSON ({}): {:?}", e, frame))
        })
        .collect()
}
