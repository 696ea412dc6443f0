//! Transport seam between the connection reactor and the wire.
//!
//! [`Connector`] opens one duplex channel per attempt; [`Channel`] moves raw
//! frames. The WebSocket implementation lives in [`crate::ws`]; tests plug
//! in scripted channels.

use std::time::Duration;

use async_trait::async_trait;
use murmurconf::BackendConfig;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use murmurproto::RawFrame;

use crate::error::ConnectError;

/// Everything needed to open a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Base endpoint without query string, e.g. `ws://host:8000/ws/generate`.
    pub endpoint: String,
    pub token: Option<String>,
    pub token_param: String,
    pub connect_timeout: Duration,
}

impl ConnectRequest {
    pub fn from_config(backend: &BackendConfig, token: Option<String>) -> Self {
        Self {
            endpoint: backend.endpoint(),
            token: token.or_else(|| backend.token.clone()),
            token_param: backend.token_param.clone(),
            connect_timeout: backend.connect_timeout(),
        }
    }

    /// Endpoint with the bearer token appended as a query parameter.
    ///
    /// The token is percent-encoded; the parameter name must already be
    /// URL-safe.
    pub fn url(&self) -> Result<String, ConnectError> {
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(ConnectError::InvalidEndpoint(format!(
                "{} (expected ws:// or wss://)",
                self.endpoint
            )));
        }

        let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(self.endpoint.clone());
        };

        if !self.token_param.chars().all(is_unreserved) || self.token_param.is_empty() {
            return Err(ConnectError::InvalidEndpoint(format!(
                "bad token parameter name {:?}",
                self.token_param
            )));
        }

        let sep = if self.endpoint.contains('?') { '&' } else { '?' };
        Ok(format!(
            "{}{}{}={}",
            self.endpoint,
            sep,
            self.token_param,
            utf8_percent_encode(token, QUERY_VALUE)
        ))
    }

    /// URL safe for logs.
    pub fn redacted_url(&self) -> String {
        match &self.token {
            Some(_) => format!("{}?{}=<redacted>", self.endpoint, self.token_param),
            None => self.endpoint.clone(),
        }
    }
}

/// Everything but the RFC 3986 unreserved set.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

/// Something read off a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Frame(RawFrame),
    /// Transport-level pong. Counts as a heartbeat acknowledgement.
    Pong,
    /// Peer closed. `normal` is true for a clean close (code 1000 or none).
    Closed { normal: bool, reason: Option<String> },
}

/// Opens channels. Shared across reconnect attempts.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Perform the handshake. Rejections map to [`ConnectError::Auth`].
    async fn open(&self, request: &ConnectRequest) -> Result<Box<dyn Channel>, ConnectError>;
}

/// An open duplex channel.
///
/// `recv` is raced against timers in the reactor, so it must be
/// cancel-safe: dropping the future must not lose a frame.
#[async_trait]
pub trait Channel: Send + 'static {
    async fn send_text(&mut self, text: String) -> Result<(), ConnectError>;

    /// Transport-level ping. The peer's pong arrives as [`ChannelEvent::Pong`].
    async fn send_ping(&mut self) -> Result<(), ConnectError>;

    async fn recv(&mut self) -> Result<ChannelEvent, ConnectError>;

    /// Best-effort close. Never fails.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(token: Option<&str>) -> ConnectRequest {
        ConnectRequest {
            endpoint: "ws://127.0.0.1:8000/ws/generate".into(),
            token: token.map(String::from),
            token_param: "token".into(),
            connect_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn url_without_token_is_endpoint() {
        assert_eq!(request(None).url().unwrap(), "ws://127.0.0.1:8000/ws/generate");
        assert_eq!(request(Some("")).url().unwrap(), "ws://127.0.0.1:8000/ws/generate");
    }

    #[test]
    fn url_appends_token() {
        assert_eq!(
            request(Some("abc-123_x.y~z")).url().unwrap(),
            "ws://127.0.0.1:8000/ws/generate?token=abc-123_x.y~z"
        );
    }

    #[test]
    fn url_respects_existing_query() {
        let mut req = request(Some("t"));
        req.endpoint.push_str("?voice=alto");
        assert_eq!(req.url().unwrap(), "ws://127.0.0.1:8000/ws/generate?voice=alto&token=t");
    }

    #[test]
    fn reserved_token_characters_are_encoded() {
        assert_eq!(
            request(Some("ab+c/d==")).url().unwrap(),
            "ws://127.0.0.1:8000/ws/generate?token=ab%2Bc%2Fd%3D%3D"
        );
        assert_eq!(
            request(Some("a b&c")).url().unwrap(),
            "ws://127.0.0.1:8000/ws/generate?token=a%20b%26c"
        );
    }

    #[test]
    fn unsafe_param_name_is_rejected() {
        let mut req = request(Some("t"));
        req.token_param = "to ken".into();
        assert!(matches!(req.url(), Err(ConnectError::InvalidEndpoint(_))));
    }

    #[test]
    fn non_ws_scheme_is_rejected() {
        let mut req = request(None);
        req.endpoint = "http://example.com".into();
        assert!(matches!(req.url(), Err(ConnectError::InvalidEndpoint(_))));
    }

    #[test]
    fn redacted_url_hides_token() {
        let shown = request(Some("secret")).redacted_url();
        assert!(!shown.contains("secret"));
        assert!(shown.contains("token=<redacted>"));
    }

    #[test]
    fn from_config_prefers_explicit_token() {
        let mut backend = BackendConfig::default();
        backend.token = Some("from-config".into());
        let req = ConnectRequest::from_config(&backend, Some("override".into()));
        assert_eq!(req.token.as_deref(), Some("override"));

        let req = ConnectRequest::from_config(&backend, None);
        assert_eq!(req.token.as_deref(), Some("from-config"));
    }
}
