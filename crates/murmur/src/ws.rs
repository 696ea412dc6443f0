//! WebSocket transport over tokio-tungstenite.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use murmurproto::RawFrame;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::ConnectError;
use crate::transport::{Channel, ChannelEvent, ConnectRequest, Connector};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens a WebSocket per attempt, with the token in the query string.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, request: &ConnectRequest) -> Result<Box<dyn Channel>, ConnectError> {
        let url = request.url()?;
        debug!("ws: connecting to {}", request.redacted_url());

        let (stream, response) = tokio::time::timeout(request.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                ConnectError::Transport(format!(
                    "handshake timed out after {:?}",
                    request.connect_timeout
                ))
            })?
            .map_err(map_handshake_error)?;

        debug!("ws: upgraded with HTTP {}", response.status());
        Ok(Box::new(WsChannel { stream }))
    }
}

/// 401/403 on upgrade is an auth rejection; never retried.
pub fn map_handshake_error(err: tungstenite::Error) -> ConnectError {
    match err {
        tungstenite::Error::Http(resp) => {
            let code = resp.status().as_u16();
            if code == 401 || code == 403 {
                ConnectError::Auth(format!("handshake rejected with HTTP {}", code))
            } else {
                ConnectError::Transport(format!("handshake failed with HTTP {}", code))
            }
        }
        tungstenite::Error::Url(e) => ConnectError::InvalidEndpoint(e.to_string()),
        other => ConnectError::Transport(other.to_string()),
    }
}

pub struct WsChannel {
    stream: WsStream,
}

#[async_trait]
impl Channel for WsChannel {
    async fn send_text(&mut self, text: String) -> Result<(), ConnectError> {
        trace!("ws: -> {}", text);
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ConnectError::Transport(format!("send failed: {}", e)))
    }

    async fn send_ping(&mut self) -> Result<(), ConnectError> {
        trace!("ws: -> ping");
        self.stream
            .send(Message::Ping(Default::default()))
            .await
            .map_err(|e| ConnectError::Transport(format!("ping failed: {}", e)))
    }

    async fn recv(&mut self) -> Result<ChannelEvent, ConnectError> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(m)) => m,
                Some(Err(e)) => return Err(ConnectError::Transport(e.to_string())),
                None => {
                    return Ok(ChannelEvent::Closed {
                        normal: false,
                        reason: Some("stream ended without close frame".to_string()),
                    })
                }
            };

            match msg {
                Message::Text(t) => return Ok(ChannelEvent::Frame(RawFrame::Text(t.to_string()))),
                Message::Binary(b) => return Ok(ChannelEvent::Frame(RawFrame::Binary(b))),
                Message::Pong(_) => return Ok(ChannelEvent::Pong),
                Message::Close(frame) => {
                    let (normal, reason) = match frame {
                        Some(f) => (
                            f.code == CloseCode::Normal,
                            Some(format!("{} {}", f.code, f.reason)),
                        ),
                        None => (true, None),
                    };
                    debug!("ws: peer closed (normal={})", normal);
                    return Ok(ChannelEvent::Closed { normal, reason });
                }
                // tungstenite answers pings itself
                Message::Ping(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            trace!("ws: close: {}", e);
        }
    }
}
