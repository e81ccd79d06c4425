//! Decoding of upstream frames into events.
//!
//! A frame that does not decode is dropped, never surfaced as an error: one
//! corrupt line must not end a stream that is already being delivered.

use serde::Deserialize;

use crate::reassembler::LINE_TERMINATOR;

/// Prefix every meaningful upstream frame starts with.
pub const DATA_PREFIX: &str = "data: ";

/// Event kind carrying assistant text.
pub const TEXT_DELTA: &str = "text-delta";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpstreamEvent {
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
    #[serde(default)]
    pub delta: String,
}

impl UpstreamEvent {
    /// The delta text if this is a non-empty text delta.
    pub fn text_delta(&self) -> Option<&str> {
        (self.kind == TEXT_DELTA && !self.delta.is_empty()).then_some(self.delta.as_str())
    }
}

/// Decode one frame. Wrong prefix, empty payload or bad JSON yield `None`.
pub fn decode_frame(frame: &str) -> Option<UpstreamEvent> {
    let payload = frame.strip_prefix(DATA_PREFIX)?;
    if payload.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<UpstreamEvent>(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(error = %e, frame_len = frame.len(), "dropping undecodable upstream frame");
            None
        }
    }
}

/// Accumulated assistant text of a fully materialized upstream body.
pub fn collect_text(body: &str) -> String {
    body.split(LINE_TERMINATOR)
        .filter_map(decode_frame)
        .filter_map(|ev| ev.text_delta().map(str::to_owned))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_text_delta() {
        let ev = decode_frame(r#"data: {"type":"text-delta","delta":"Hello"}"#).unwrap();
        assert_eq!(ev.kind, "text-delta");
        assert_eq!(ev.text_delta(), Some("Hello"));
    }

    #[test]
    fn missing_delta_defaults_to_empty() {
        let ev = decode_frame(r#"data: {"type":"finish"}"#).unwrap();
        assert_eq!(ev.delta, "");
        assert_eq!(ev.text_delta(), None);
    }

    #[test]
    fn kind_alias_is_accepted() {
        let ev = decode_frame(r#"data: {"kind":"text-delta","delta":"x"}"#).unwrap();
        assert_eq!(ev.text_delta(), Some("x"));
    }

    #[test]
    fn bad_frames_are_dropped() {
        assert!(decode_frame("").is_none());
        assert!(decode_frame("data: ").is_none());
        assert!(decode_frame("data: [DONE]").is_none());
        assert!(decode_frame("data: {\"type\":").is_none());
        assert!(decode_frame("data: \"just a string\"").is_none());
        assert!(decode_frame("event: ping").is_none());
        assert!(decode_frame("data:{\"type\":\"text-delta\",\"delta\":\"no space\"}").is_none());
    }

    #[test]
    fn carriage_return_is_tolerated() {
        let ev = decode_frame("data: {\"type\":\"text-delta\",\"delta\":\"a\"}\r").unwrap();
        assert_eq!(ev.text_delta(), Some("a"));
    }

    #[test]
    fn empty_delta_is_not_text() {
        let ev = decode_frame(r#"data: {"type":"text-delta","delta":""}"#).unwrap();
        assert_eq!(ev.text_delta(), None);
    }

    #[test]
    fn collect_text_concatenates_in_order_and_skips_noise() {
        let body = "data: {\"type\":\"start\"}\n\
                    data: {\"type\":\"text-delta\",\"delta\":\"Hel\"}\n\
                    garbage\n\
                    data: {broken\n\
                    \n\
                    data: {\"type\":\"text-delta\",\"delta\":\"lo\"}\n\
                    data: {\"type\":\"reasoning-delta\",\"delta\":\"hmm\"}\n\
                    data: {\"type\":\"text-delta\",\"delta\":\"!\"}";
        assert_eq!(collect_text(body), "Hello!");
    }
}
