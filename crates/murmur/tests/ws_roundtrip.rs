//! WebSocket transport against a loopback tokio-tungstenite server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use murmur::{
    AudioSegment, AudioSink, ChannelEvent, ConnectError, ConnectRequest, Connector, PipelineConfig,
    PipelineController, PipelineState, PlaybackError, SessionParams, WsConnector,
};
use murmurproto::RawFrame;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

type ServerWs = WebSocketStream<TcpStream>;

/// Accept one connection, requiring `token=secret`, and hand it to `handler`.
async fn serve_one<F, Fut>(handler: F) -> SocketAddr
where
    F: FnOnce(ServerWs) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    serve_one_expecting("token=secret", handler).await
}

async fn serve_one_expecting<F, Fut>(query: &'static str, handler: F) -> SocketAddr
where
    F: FnOnce(ServerWs) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let check_token = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            if req.uri().query() == Some(query) {
                Ok(resp)
            } else {
                let mut err = ErrorResponse::new(Some("bad token".to_string()));
                *err.status_mut() = StatusCode::UNAUTHORIZED;
                Err(err)
            }
        };
        if let Ok(ws) = accept_hdr_async(stream, check_token).await {
            handler(ws).await;
        }
    });

    addr
}

fn request(addr: SocketAddr, token: &str) -> ConnectRequest {
    ConnectRequest {
        endpoint: format!("ws://{}/ws/generate", addr),
        token: Some(token.to_string()),
        token_param: "token".to_string(),
        connect_timeout: Duration::from_secs(5),
    }
}

fn binary(frame: RawFrame) -> Message {
    match frame {
        RawFrame::Binary(bytes) => Message::Binary(bytes),
        RawFrame::Text(text) => Message::Text(text.into()),
    }
}

#[derive(Default)]
struct RecordingSink {
    played: Mutex<Vec<(u64, usize)>>,
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&self, segment: &AudioSegment) -> Result<(), PlaybackError> {
        self.played.lock().unwrap().push((segment.seq, segment.len()));
        Ok(())
    }
}

#[tokio::test]
async fn full_session_over_websocket() {
    let (first_tx, first_rx) = oneshot::channel::<String>();
    let addr = serve_one(|mut ws| async move {
        if let Some(Ok(Message::Text(first))) = ws.next().await {
            let _ = first_tx.send(first.to_string());
        }
        for msg in [
            Message::Text(r#"{"text":"Hello "}"#.into()),
            binary(RawFrame::audio(1, &[9u8; 32])),
            binary(RawFrame::audio(0, &[7u8; 64])),
            Message::Text(r#"{"chunk":"world","ping":true}"#.into()),
            Message::Text(r#"{"done":true}"#.into()),
        ] {
            ws.send(msg).await.unwrap();
        }
        let _ = ws.close(None).await;
    })
    .await;

    let mut config = PipelineConfig::default();
    config.backend.url = format!("ws://{}", addr);
    config.backend.token = Some("secret".to_string());

    let sink = Arc::new(RecordingSink::default());
    let controller = PipelineController::new(
        Arc::new(WsConnector),
        Arc::clone(&sink) as Arc<dyn AudioSink>,
        config,
    );

    controller.start(SessionParams::new("say hi")).await.unwrap();
    let status = tokio::time::timeout(Duration::from_secs(10), controller.wait_settled())
        .await
        .expect("session did not settle");

    assert_eq!(status.state, PipelineState::Completed);
    assert_eq!(controller.transcript().await.unwrap(), "Hello world");
    assert_eq!(*sink.played.lock().unwrap(), vec![(0, 64), (1, 32)]);

    let first: serde_json::Value = serde_json::from_str(&first_rx.await.unwrap()).unwrap();
    assert_eq!(first, serde_json::json!({"prompt": "say hi", "json": true}));
}

#[tokio::test]
async fn wrong_token_is_an_auth_error() {
    let addr = serve_one(|_ws| async {}).await;

    match WsConnector.open(&request(addr, "wrong")).await {
        Err(ConnectError::Auth(msg)) => assert!(msg.contains("401"), "{}", msg),
        Err(other) => panic!("expected auth error, got {:?}", other),
        Ok(_) => panic!("handshake should have been rejected"),
    }
}

#[tokio::test]
async fn wrong_token_fails_the_session_without_retry() {
    let addr = serve_one(|_ws| async {}).await;

    let mut config = PipelineConfig::default();
    config.backend.url = format!("ws://{}", addr);
    config.backend.token = Some("wrong".to_string());

    let controller = PipelineController::new(
        Arc::new(WsConnector),
        Arc::new(RecordingSink::default()),
        config,
    );
    controller.start(SessionParams::new("x")).await.unwrap();
    let status = tokio::time::timeout(Duration::from_secs(10), controller.wait_settled())
        .await
        .expect("session did not settle");

    match status.state {
        PipelineState::Failed(reason) => assert!(reason.starts_with("Authentication rejected"), "{}", reason),
        other => panic!("expected Failed, got {:?}", other),
    }
}

#[tokio::test]
async fn channel_moves_text_and_reports_close() {
    let addr = serve_one(|mut ws| async move {
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Text(t) if t.as_str() == "bye" => break,
                Message::Text(t) => ws.send(Message::Text(t)).await.unwrap(),
                _ => {}
            }
        }
        let _ = ws.close(None).await;
    })
    .await;

    let mut channel = WsConnector.open(&request(addr, "secret")).await.ok().unwrap();

    channel.send_text(r#"{"ping":true}"#.to_string()).await.unwrap();
    assert_eq!(
        channel.recv().await.unwrap(),
        ChannelEvent::Frame(RawFrame::text(r#"{"ping":true}"#))
    );

    channel.send_ping().await.unwrap();
    assert_eq!(channel.recv().await.unwrap(), ChannelEvent::Pong);

    channel.send_text("bye".to_string()).await.unwrap();
    match channel.recv().await.unwrap() {
        ChannelEvent::Closed { normal, .. } => assert!(normal),
        other => panic!("expected close, got {:?}", other),
    }
}

#[tokio::test]
async fn refused_connection_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    match WsConnector.open(&request(addr, "secret")).await {
        Err(ConnectError::Transport(_)) => {}
        Err(other) => panic!("expected transport error, got {:?}", other),
        Ok(_) => panic!("nothing should be listening"),
    }
}

#[tokio::test]
async fn silent_server_times_out_handshake() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _hold = tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let mut req = request(addr, "secret");
    req.connect_timeout = Duration::from_millis(200);

    match WsConnector.open(&req).await {
        Err(ConnectError::Transport(msg)) => assert!(msg.contains("timed out"), "{}", msg),
        Err(other) => panic!("expected timeout, got {:?}", other),
        Ok(_) => panic!("handshake should not complete"),
    }
}

#[tokio::test]
async fn base64_token_is_encoded_in_the_query() {
    let addr = serve_one_expecting("token=ab%2Bc%2Fd%3D%3D", |mut ws| async move {
        let _ = ws.close(None).await;
    })
    .await;

    let mut channel = match WsConnector.open(&request(addr, "ab+c/d==")).await {
        Ok(channel) => channel,
        Err(e) => panic!("handshake should succeed, got {:?}", e),
    };
    match channel.recv().await.unwrap() {
        ChannelEvent::Closed { normal, .. } => assert!(normal),
        other => panic!("expected close, got {:?}", other),
    }
}
