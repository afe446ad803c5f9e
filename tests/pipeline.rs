//! End-to-end tests: a pipeline served over axum, consumed with a
//! tokio-tungstenite client.

use futures_util::{SinkExt, StreamExt};
use myolink::client::apply_event;
use myolink::{
    router, AppState, ClientStreamBuffer, ControlMessage, Pipeline, PipelineConfig, PipelineMode,
    ReadingSource, ServerEvent, SessionInfo, SourceFactory, StreamError, StreamResult,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn offline_factory() -> SourceFactory {
    Arc::new(|| -> StreamResult<Box<dyn ReadingSource>> {
        Err(StreamError::Network("no hardware attached".to_string()))
    })
}

async fn spawn_server() -> (SocketAddr, Pipeline) {
    let config = PipelineConfig {
        reconnect_delay: Duration::from_millis(200),
        ..Default::default()
    };
    let pipeline = Pipeline::with_source_factory(&config, offline_factory());
    pipeline.start().await.unwrap();

    let app = router(
        AppState {
            pipeline: pipeline.clone(),
        },
        &config.cors_origins,
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, pipeline)
}

async fn connect(addr: SocketAddr) -> WsStream {
    let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    ws
}

async fn send(ws: &mut WsStream, message: &ControlMessage) {
    let json = serde_json::to_string(message).unwrap();
    ws.send(Message::text(json)).await.unwrap();
}

async fn next_event(ws: &mut WsStream) -> ServerEvent {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn test_session_greeting() {
    let (addr, pipeline) = spawn_server().await;
    let mut ws = connect(addr).await;

    assert!(matches!(next_event(&mut ws).await, ServerEvent::Connect { .. }));
    match next_event(&mut ws).await {
        ServerEvent::Status { status } => {
            assert_eq!(status.mode, PipelineMode::Hardware);
            assert_eq!(status.sessions, 1);
        }
        other => panic!("expected status, got {:?}", other),
    }

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_simulated_stream_reaches_client_buffer() {
    let (addr, pipeline) = spawn_server().await;
    let mut ws = connect(addr).await;

    send(&mut ws, &ControlMessage::ToggleSimulation).await;
    send(&mut ws, &ControlMessage::StartSimulation).await;

    let mut buffer = ClientStreamBuffer::default();
    let mut readings = 0;
    while readings < 5 {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for readings")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            if let Some(ServerEvent::SensorData { .. }) = apply_event(&mut buffer, text.as_str()) {
                readings += 1;
            }
        }
    }

    assert_eq!(buffer.tick(), 5);
    assert_eq!(buffer.values().len(), 5);
    let stats = buffer.stats();
    assert!(stats.min > 0.0);
    assert!(stats.max >= stats.min);
    assert_eq!(pipeline.mode(), PipelineMode::SimulatedActive);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_rejected_control_only_answers_sender() {
    let (addr, pipeline) = spawn_server().await;
    let mut ws = connect(addr).await;
    next_event(&mut ws).await;
    next_event(&mut ws).await;

    send(&mut ws, &ControlMessage::StartSimulation).await;
    match next_event(&mut ws).await {
        ServerEvent::Error { code, .. } => assert_eq!(code, "INVALID_STATE"),
        other => panic!("expected error, got {:?}", other),
    }

    ws.send(Message::text("{\"type\":\"reboot\"}")).await.unwrap();
    match next_event(&mut ws).await {
        ServerEvent::Error { code, .. } => assert_eq!(code, "PARSE_ERROR"),
        other => panic!("expected error, got {:?}", other),
    }

    assert_eq!(pipeline.mode(), PipelineMode::Hardware);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_leaves_other_sessions_running() {
    let (addr, pipeline) = spawn_server().await;
    let mut first = connect(addr).await;
    let mut second = connect(addr).await;

    send(&mut first, &ControlMessage::ToggleSimulation).await;
    send(&mut first, &ControlMessage::StartSimulation).await;
    first.close(None).await.unwrap();
    drop(first);

    let mut readings = 0;
    while readings < 3 {
        if let ServerEvent::SensorData { data } = next_event(&mut second).await {
            assert!(data.parse::<f64>().is_ok());
            readings += 1;
        }
    }
    assert_eq!(pipeline.broadcaster().session_count(), 1);

    pipeline.shutdown().await;
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, pipeline) = spawn_server().await;

    let response = http_get(addr, "/health").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with("OK"));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_sessions_endpoint_lists_connected_consumers() {
    let (addr, pipeline) = spawn_server().await;
    let mut ws = connect(addr).await;
    let session_id = match next_event(&mut ws).await {
        ServerEvent::Connect { session_id } => session_id,
        other => panic!("expected connect, got {:?}", other),
    };

    let response = http_get(addr, "/sessions").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let sessions: Vec<SessionInfo> = serde_json::from_str(body).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, session_id);

    pipeline.shutdown().await;
}
