//! MessageDecoder: raw transport frames → [`InboundFrame`].
//!
//! The only place in the system that inspects payload shape. Field
//! precedence for JSON frames is `error` > `text`/`chunk` > `audio` > `done` >
//! `ping`; a ping marker alongside any data field still resets the heartbeat,
//! and `"done": true` alongside data ends the stream after it. A field set to
//! `null` is treated as missing.

use base64::Engine;
use bytes::Bytes;
use serde_json::{Map, Value};

use crate::frame::{
    Decoded, DecodeError, InboundFrame, OutputMode, RawFrame, AUDIO_HEADER_LEN,
};

/// Stateless frame decoder for one output mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageDecoder {
    mode: OutputMode,
}

impl MessageDecoder {
    pub fn new(mode: OutputMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Decode one transport frame.
    pub fn decode(&self, raw: &RawFrame) -> Result<Decoded, DecodeError> {
        match raw {
            RawFrame::Binary(bytes) => decode_binary_audio(bytes).map(Decoded::new),
            RawFrame::Text(text) => match self.mode {
                OutputMode::PlainText => Ok(Decoded::new(InboundFrame::TextToken {
                    text: text.clone(),
                    meta: None,
                })),
                OutputMode::Json => decode_json(text),
            },
        }
    }
}

fn decode_binary_audio(bytes: &Bytes) -> Result<InboundFrame, DecodeError> {
    if bytes.len() < AUDIO_HEADER_LEN {
        return Err(DecodeError::FrameTooShort {
            expected: AUDIO_HEADER_LEN,
            actual: bytes.len(),
        });
    }
    let mut header = [0u8; AUDIO_HEADER_LEN];
    header.copy_from_slice(&bytes[..AUDIO_HEADER_LEN]);
    Ok(InboundFrame::AudioChunk {
        seq: u64::from_be_bytes(header),
        payload: bytes.slice(AUDIO_HEADER_LEN..),
    })
}

fn decode_json(text: &str) -> Result<Decoded, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let obj = match value {
        Value::Object(obj) => obj,
        other => return Err(DecodeError::NotAnObject(json_kind(&other))),
    };

    let ping = is_ping_marker(&obj)?;
    let done = obj.get("done").and_then(Value::as_bool) == Some(true);

    let frame = if let Some(err) = field(&obj, "error") {
        Some(InboundFrame::ErrorNotice {
            message: error_message(err),
        })
    } else if let Some(text) = field(&obj, "text") {
        Some(InboundFrame::TextToken {
            text: expect_str(text, "text")?,
            meta: match obj.get("meta") {
                None | Some(Value::Null) => None,
                Some(meta @ Value::Object(_)) => Some(meta.clone()),
                Some(_) => {
                    return Err(DecodeError::WrongType {
                        field: "meta",
                        expected: "object",
                    })
                }
            },
        })
    } else if let Some(chunk) = field(&obj, "chunk") {
        Some(InboundFrame::TextToken {
            text: expect_str(chunk, "chunk")?,
            meta: None,
        })
    } else if let Some(audio) = field(&obj, "audio") {
        let encoded = expect_str(audio, "audio")?;
        let seq = obj
            .get("seq")
            .ok_or(DecodeError::MissingField("seq"))?
            .as_u64()
            .ok_or(DecodeError::WrongType {
                field: "seq",
                expected: "unsigned integer",
            })?;
        let payload = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        Some(InboundFrame::AudioChunk {
            seq,
            payload: Bytes::from(payload),
        })
    } else if done {
        Some(InboundFrame::StreamEnd)
    } else {
        None
    };

    let decoded = match (frame, ping) {
        (Some(frame), true) => Decoded::with_ping(frame),
        (Some(frame), false) => Decoded::new(frame),
        (None, true) => Decoded::new(InboundFrame::ControlPing),
        (None, false) => return Err(DecodeError::Unrecognised(key_list(&obj))),
    };

    if done && decoded.frame.is_data() {
        Ok(decoded.ending_stream())
    } else {
        Ok(decoded)
    }
}

/// Explicit `null` counts as absent.
fn field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn is_ping_marker(obj: &Map<String, Value>) -> Result<bool, DecodeError> {
    match obj.get("ping") {
        None => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(DecodeError::WrongType {
            field: "ping",
            expected: "bool",
        }),
    }
}

fn expect_str(value: &Value, field: &'static str) -> Result<String, DecodeError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or(DecodeError::WrongType {
            field,
            expected: "string",
        })
}

// Servers occasionally send structured errors; keep them readable rather than
// rejecting the frame, since an error notice must never be dropped.
fn error_message(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn key_list(obj: &Map<String, Value>) -> String {
    if obj.is_empty() {
        return "none".to_string();
    }
    obj.keys().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn json() -> MessageDecoder {
        MessageDecoder::new(OutputMode::Json)
    }

    fn decode(s: &str) -> Result<Decoded, DecodeError> {
        json().decode(&RawFrame::text(s))
    }

    #[test]
    fn text_token() {
        let d = decode(r#"{"text": "Hello "}"#).unwrap();
        assert_eq!(
            d.frame,
            InboundFrame::TextToken {
                text: "Hello ".into(),
                meta: None
            }
        );
        assert!(!d.resets_heartbeat);
    }

    #[test]
    fn text_token_with_meta() {
        let d = decode(r#"{"text": "x", "meta": {"source": "doc-3"}}"#).unwrap();
        match d.frame {
            InboundFrame::TextToken { text, meta } => {
                assert_eq!(text, "x");
                assert_eq!(meta.unwrap()["source"], "doc-3");
            }
            other => panic!("expected TextToken, got {:?}", other),
        }
    }

    #[test]
    fn chunk_is_text_token() {
        let d = decode(r#"{"chunk": "world"}"#).unwrap();
        assert_eq!(
            d.frame,
            InboundFrame::TextToken {
                text: "world".into(),
                meta: None
            }
        );
    }

    #[test]
    fn error_notice() {
        let d = decode(r#"{"error": "quota exceeded"}"#).unwrap();
        assert_eq!(
            d.frame,
            InboundFrame::ErrorNotice {
                message: "quota exceeded".into()
            }
        );
    }

    #[test]
    fn error_wins_over_text() {
        let d = decode(r#"{"error": "boom", "text": "partial"}"#).unwrap();
        assert!(matches!(d.frame, InboundFrame::ErrorNotice { .. }));
    }

    #[test]
    fn structured_error_keeps_message() {
        let d = decode(r#"{"error": {"code": 429, "message": "slow down"}}"#).unwrap();
        assert_eq!(
            d.frame,
            InboundFrame::ErrorNotice {
                message: "slow down".into()
            }
        );
    }

    #[test]
    fn ping_alone_is_control() {
        let d = decode(r#"{"ping": true}"#).unwrap();
        assert_eq!(d.frame, InboundFrame::ControlPing);
        assert!(d.resets_heartbeat);
    }

    #[test]
    fn data_with_ping_is_data_and_resets() {
        let d = decode(r#"{"text": "hi", "ping": true}"#).unwrap();
        assert!(matches!(d.frame, InboundFrame::TextToken { .. }));
        assert!(d.resets_heartbeat);
    }

    #[test]
    fn done_is_stream_end() {
        assert_eq!(decode(r#"{"done": true}"#).unwrap().frame, InboundFrame::StreamEnd);
    }

    #[test]
    fn data_with_done_ends_stream_after_data() {
        let d = decode(r#"{"text": "!", "done": true}"#).unwrap();
        assert_eq!(
            d.frame,
            InboundFrame::TextToken {
                text: "!".into(),
                meta: None
            }
        );
        assert!(d.stream_end);
        assert!(!decode(r#"{"text": "!"}"#).unwrap().stream_end);
        assert!(!decode(r#"{"done": true}"#).unwrap().stream_end);
    }

    #[test]
    fn null_error_is_absent() {
        let d = decode(r#"{"text": "Hello", "error": null}"#).unwrap();
        assert_eq!(
            d.frame,
            InboundFrame::TextToken {
                text: "Hello".into(),
                meta: None
            }
        );
        assert!(matches!(
            decode(r#"{"error": null}"#),
            Err(DecodeError::Unrecognised(_))
        ));
    }

    #[test]
    fn done_false_is_unrecognised() {
        assert!(matches!(
            decode(r#"{"done": false}"#),
            Err(DecodeError::Unrecognised(_))
        ));
    }

    #[test]
    fn json_audio() {
        let d = decode(r#"{"audio": "AQID", "seq": 7}"#).unwrap();
        assert_eq!(
            d.frame,
            InboundFrame::AudioChunk {
                seq: 7,
                payload: Bytes::from_static(&[1, 2, 3])
            }
        );
    }

    #[test]
    fn json_audio_requires_seq() {
        assert!(matches!(
            decode(r#"{"audio": "AQID"}"#),
            Err(DecodeError::MissingField("seq"))
        ));
    }

    #[test]
    fn json_audio_rejects_bad_base64() {
        assert!(matches!(
            decode(r#"{"audio": "!!!", "seq": 1}"#),
            Err(DecodeError::Base64(_))
        ));
    }

    #[test]
    fn binary_audio() {
        let d = json().decode(&RawFrame::audio(42, b"abc")).unwrap();
        assert_eq!(
            d.frame,
            InboundFrame::AudioChunk {
                seq: 42,
                payload: Bytes::from_static(b"abc")
            }
        );
    }

    #[test]
    fn short_binary_is_error() {
        let raw = RawFrame::Binary(Bytes::from_static(&[0, 1, 2]));
        assert!(matches!(
            json().decode(&raw),
            Err(DecodeError::FrameTooShort {
                expected: 8,
                actual: 3
            })
        ));
    }

    #[test]
    fn malformed_inputs() {
        assert!(matches!(decode("{not json"), Err(DecodeError::Json(_))));
        assert!(matches!(decode("[1,2]"), Err(DecodeError::NotAnObject("array"))));
        assert!(matches!(decode("{}"), Err(DecodeError::Unrecognised(_))));
        assert!(matches!(
            decode(r#"{"text": 5}"#),
            Err(DecodeError::WrongType { field: "text", .. })
        ));
        assert!(matches!(
            decode(r#"{"ping": "yes"}"#),
            Err(DecodeError::WrongType { field: "ping", .. })
        ));
    }

    #[test]
    fn plain_text_is_verbatim() {
        let decoder = MessageDecoder::new(OutputMode::PlainText);
        let d = decoder.decode(&RawFrame::text(r#"{"text": "not parsed"}"#)).unwrap();
        assert_eq!(
            d.frame,
            InboundFrame::TextToken {
                text: r#"{"text": "not parsed"}"#.into(),
                meta: None
            }
        );
    }

    #[test]
    fn plain_text_still_decodes_binary_audio() {
        let decoder = MessageDecoder::new(OutputMode::PlainText);
        let d = decoder.decode(&RawFrame::audio(1, b"z")).unwrap();
        assert!(matches!(d.frame, InboundFrame::AudioChunk { seq: 1, .. }));
    }
}
