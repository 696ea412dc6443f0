//! Wire frames for the generation stream.
//!
//! The generation service speaks JSON text frames over a WebSocket, with
//! audio optionally delivered as binary frames:
//!
//! ```text
//! text frame     {"text": "Hello "}            one text delta
//!                {"chunk": "Hello "}           one text delta (alternate key)
//!                {"audio": "<b64>", "seq": 3}  one audio segment
//!                {"ping": true}                heartbeat acknowledgement
//!                {"done": true}                end of stream
//!                {"error": "quota exceeded"}   fatal, session terminates
//!
//! binary frame   [seq: u64 big-endian][payload bytes ...]
//! ```
//!
//! In plain-text mode the server drops the envelope entirely and every text
//! delivery is appended verbatim.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Width of the sequence header on binary audio frames.
pub const AUDIO_HEADER_LEN: usize = 8;

/// Whether the server wraps tokens in JSON envelopes or sends raw UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Structured JSON frames (`{"text": ...}`).
    #[default]
    Json,
    /// Raw UTF-8 text, no envelope.
    PlainText,
}

impl OutputMode {
    pub fn is_json(&self) -> bool {
        matches!(self, OutputMode::Json)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::Json => "json",
            OutputMode::PlainText => "plain_text",
        }
    }
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Undecoded data as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    Text(String),
    Binary(Bytes),
}

impl RawFrame {
    pub fn text(s: impl Into<String>) -> Self {
        RawFrame::Text(s.into())
    }

    /// Build a binary audio frame with the sequence header prepended.
    pub fn audio(seq: u64, payload: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(AUDIO_HEADER_LEN + payload.len());
        buf.put_u64(seq);
        buf.put_slice(payload);
        RawFrame::Binary(buf.freeze())
    }

    pub fn len(&self) -> usize {
        match self {
            RawFrame::Text(s) => s.len(),
            RawFrame::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One decoded inbound protocol message.
///
/// Downstream components match on this and never look at the raw payload.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// One text delta, in generation order.
    TextToken {
        text: String,
        meta: Option<serde_json::Value>,
    },
    /// One audio segment. Sequence numbers are strictly increasing per stream
    /// but may arrive out of order.
    AudioChunk { seq: u64, payload: Bytes },
    /// Heartbeat acknowledgement. Resets the heartbeat timer and nothing else.
    ControlPing,
    /// Server-signalled error. Terminates the session.
    ErrorNotice { message: String },
    /// Generation finished.
    StreamEnd,
}

impl InboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::TextToken { .. } => "text_token",
            InboundFrame::AudioChunk { .. } => "audio_chunk",
            InboundFrame::ControlPing => "control_ping",
            InboundFrame::ErrorNotice { .. } => "error_notice",
            InboundFrame::StreamEnd => "stream_end",
        }
    }

    /// Data frames carry content for the transcript or audio queue.
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            InboundFrame::TextToken { .. } | InboundFrame::AudioChunk { .. }
        )
    }

    /// Terminal frames end the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InboundFrame::ErrorNotice { .. } | InboundFrame::StreamEnd)
    }
}

/// Decoder output: the frame plus the markers that rode along with it.
///
/// A payload carrying both a data field and a ping marker decodes as data with
/// `resets_heartbeat` set. Likewise a data field next to `"done": true` is
/// data with `stream_end` set; the stream ends after the data is delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub frame: InboundFrame,
    pub resets_heartbeat: bool,
    pub stream_end: bool,
}

impl Decoded {
    pub fn new(frame: InboundFrame) -> Self {
        let resets_heartbeat = matches!(frame, InboundFrame::ControlPing);
        Self {
            frame,
            resets_heartbeat,
            stream_end: false,
        }
    }

    pub fn with_ping(frame: InboundFrame) -> Self {
        Self {
            frame,
            resets_heartbeat: true,
            stream_end: false,
        }
    }

    /// Mark that the stream ends once this frame is delivered.
    pub fn ending_stream(mut self) -> Self {
        self.stream_end = true;
        self
    }
}

/// Errors while decoding an inbound frame.
///
/// Always recoverable: the frame is dropped and the session continues.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Expected a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("Field '{field}' has wrong type: expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("No recognised field in frame (keys: {0})")]
    Unrecognised(String),
    #[error("Invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Frame too short: expected {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_frame_layout() {
        let frame = RawFrame::audio(0x0102, b"pcm");
        match frame {
            RawFrame::Binary(bytes) => {
                assert_eq!(bytes.len(), AUDIO_HEADER_LEN + 3);
                assert_eq!(&bytes[..8], &[0, 0, 0, 0, 0, 0, 0x01, 0x02]);
                assert_eq!(&bytes[8..], b"pcm");
            }
            other => panic!("expected binary frame, got {:?}", other),
        }
    }

    #[test]
    fn ping_resets_heartbeat_by_default() {
        assert!(Decoded::new(InboundFrame::ControlPing).resets_heartbeat);
        assert!(!Decoded::new(InboundFrame::StreamEnd).resets_heartbeat);
    }

    #[test]
    fn frame_classification() {
        let token = InboundFrame::TextToken {
            text: "a".into(),
            meta: None,
        };
        assert!(token.is_data());
        assert!(!token.is_terminal());
        assert!(InboundFrame::StreamEnd.is_terminal());
        assert!(!InboundFrame::ControlPing.is_data());
        assert_eq!(InboundFrame::ControlPing.kind(), "control_ping");
    }

    #[test]
    fn output_mode_serde() {
        assert_eq!(
            serde_json::to_string(&OutputMode::PlainText).unwrap(),
            "\"plain_text\""
        );
        assert_eq!(OutputMode::default(), OutputMode::Json);
    }
}
