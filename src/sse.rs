//! Line-oriented decoding of the upstream's server-sent-event stream.
//!
//! [`classify_line`] is the pure per-line step; [`SseDecoder`] reassembles
//! lines from arbitrary network chunks and turns them into [`SseEvent`]s.

use crate::error::RelayError;
use crate::io_struct::StreamFragment;
use bytes::BytesMut;

pub const DATA_PREFIX: &str = "data:";
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// Empty line or a `data:` field with nothing in it.
    Blank,
    /// Comments and non-data fields (`event:`, `id:`, `retry:`).
    Ignored,
    Done,
    Data(&'a str),
}

pub fn classify_line(line: &str) -> SseLine<'_> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return SseLine::Blank;
    }
    match line.strip_prefix(DATA_PREFIX) {
        None => SseLine::Ignored,
        Some(payload) => {
            let payload = payload.trim();
            if payload == DONE_SENTINEL {
                SseLine::Done
            } else if payload.is_empty() {
                SseLine::Blank
            } else {
                SseLine::Data(payload)
            }
        }
    }
}

#[derive(Debug)]
pub enum SseEvent {
    Fragment(StreamFragment),
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the sentinel was seen or [`SseDecoder::finish`] was called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode every complete line in `chunk` plus what was buffered before it.
    /// Nothing after the sentinel is decoded.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.split_to(pos + 1);
            if let Some(event) = self.decode_line(&line[..pos]) {
                let done = matches!(event, SseEvent::Done);
                events.push(event);
                if done {
                    self.buffer.clear();
                    break;
                }
            }
        }
        events
    }

    /// Flush a trailing line that arrived without a newline.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.finished {
            return Vec::new();
        }
        let rest = self.buffer.split();
        let event = self.decode_line(&rest);
        self.finished = true;
        event.into_iter().collect()
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<SseEvent> {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                log::warn!("Skipping stream line with invalid UTF-8: {}", e);
                return None;
            }
        };
        match classify_line(line) {
            SseLine::Blank | SseLine::Ignored => None,
            SseLine::Done => {
                self.finished = true;
                Some(SseEvent::Done)
            }
            SseLine::Data(payload) => match serde_json::from_str(payload) {
                Ok(value) => Some(SseEvent::Fragment(StreamFragment(value))),
                Err(source) => {
                    let err = RelayError::StreamDecode {
                        line: line.to_string(),
                        source,
                    };
                    log::warn!("{}", err);
                    None
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fragments(events: Vec<SseEvent>) -> Vec<serde_json::Value> {
        events
            .into_iter()
            .filter_map(|e| match e {
                SseEvent::Fragment(f) => Some(f.0),
                SseEvent::Done => None,
            })
            .collect()
    }

    #[test]
    fn test_classify_line() {
        assert_eq!(classify_line(""), SseLine::Blank);
        assert_eq!(classify_line("\r"), SseLine::Blank);
        assert_eq!(classify_line("data: "), SseLine::Blank);
        assert_eq!(classify_line(": keep-alive"), SseLine::Ignored);
        assert_eq!(classify_line("event: message"), SseLine::Ignored);
        assert_eq!(classify_line("data: [DONE]"), SseLine::Done);
        assert_eq!(classify_line("data:[DONE]\r"), SseLine::Done);
        assert_eq!(classify_line("data: {\"a\":1}"), SseLine::Data("{\"a\":1}"));
        assert_eq!(classify_line("data:{\"a\":1}"), SseLine::Data("{\"a\":1}"));
    }

    #[test]
    fn test_decoder_yields_fragments_until_sentinel() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"h\"}}]}\n\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"i\"}}]}\n\n\
              data: [DONE]\n\n\
              data: {\"late\":true}\n\n",
        );
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2], SseEvent::Done));
        assert!(decoder.is_finished());
        assert_eq!(
            fragments(events),
            vec![
                json!({"choices":[{"delta":{"content":"h"}}]}),
                json!({"choices":[{"delta":{"content":"i"}}]}),
            ]
        );
        assert!(decoder.feed(b"data: {\"more\":1}\n").is_empty());
    }

    #[test]
    fn test_decoder_reassembles_split_lines() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"choi").is_empty());
        assert!(decoder.feed(b"ces\":[]").is_empty());
        let events = decoder.feed(b"}\r\n\r\ndata: [DO");
        assert_eq!(fragments(events), vec![json!({"choices": []})]);
        let events = decoder.feed(b"NE]\n");
        assert!(matches!(events.as_slice(), [SseEvent::Done]));
    }

    #[test]
    fn test_decoder_skips_malformed_line() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {not json\ndata: {\"ok\":1}\n");
        assert_eq!(fragments(events), vec![json!({"ok": 1})]);
        assert!(!decoder.is_finished());
    }

    #[test]
    fn test_decoder_skips_invalid_utf8() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: \xff\xfe\ndata: {\"ok\":2}\n");
        assert_eq!(fragments(events), vec![json!({"ok": 2})]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"tail\":true}").is_empty());
        assert_eq!(fragments(decoder.finish()), vec![json!({"tail": true})]);
        assert!(decoder.is_finished());
        assert!(decoder.finish().is_empty());
    }
}
