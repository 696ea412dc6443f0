//! Messages sent from client to generation service.

use serde::{Deserialize, Serialize};

use crate::frame::OutputMode;

/// Initial request that starts generation.
///
/// `json` selects structured vs plain-text framing for the reply stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub json: bool,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>, mode: OutputMode) -> Self {
        Self {
            prompt: prompt.into(),
            json: mode.is_json(),
        }
    }

    pub fn mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::PlainText
        }
    }
}

/// Heartbeat probe, `{"ping": true}` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keepalive {
    pub ping: bool,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self { ping: true }
    }
}

/// Anything the client writes to the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Generate(GenerateRequest),
    Keepalive(Keepalive),
}

impl OutboundMessage {
    pub fn keepalive() -> Self {
        OutboundMessage::Keepalive(Keepalive::default())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Generate(_) => "generate",
            OutboundMessage::Keepalive(_) => "keepalive",
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> String {
        // Both variants are plain structs of strings and bools
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

impl From<GenerateRequest> for OutboundMessage {
    fn from(req: GenerateRequest) -> Self {
        OutboundMessage::Generate(req)
    }
}
