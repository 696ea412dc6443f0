//! murmurproto - Wire types for the Murmur generation stream
//!
//! This crate defines everything that crosses the duplex connection between a
//! Murmur client and a generation/speech backend:
//!
//! - `frame`: raw transport frames, the decoded [`InboundFrame`] variant and
//!   [`DecodeError`]
//! - `decoder`: [`MessageDecoder`], the single place where payload shape is
//!   inspected
//! - `outbound`: the initial [`GenerateRequest`] and the [`Keepalive`] probe
//! - `state`: [`ConnectionState`] and its transition rules
//!
//! ## Why a separate crate
//!
//! Test harnesses and alternative transports (a mock server, a recorder)
//! need the decoder and message shapes without pulling in tokio or the
//! WebSocket stack. Keep dependencies here to serde, bytes and base64.
//!
//! ## Decoding at the boundary
//!
//! Servers send loosely-shaped JSON (`text` vs `chunk` vs `error` vs `ping`).
//! [`MessageDecoder::decode`] turns each delivery into exactly one tagged
//! variant so downstream code matches on types, never on field names:
//!
//! ```
//! use murmurproto::{InboundFrame, MessageDecoder, OutputMode, RawFrame};
//!
//! let decoder = MessageDecoder::new(OutputMode::Json);
//! let decoded = decoder.decode(&RawFrame::text(r#"{"text": "Hello "}"#)).unwrap();
//! assert!(matches!(decoded.frame, InboundFrame::TextToken { .. }));
//! ```

pub mod decoder;
pub mod frame;
pub mod outbound;
pub mod state;

pub use decoder::MessageDecoder;
pub use frame::{
    Decoded, DecodeError, InboundFrame, OutputMode, RawFrame, AUDIO_HEADER_LEN,
};
pub use outbound::{GenerateRequest, Keepalive, OutboundMessage};
pub use state::ConnectionState;
