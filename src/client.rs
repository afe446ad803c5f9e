// Monitor consumer
//
// Connects to a running pipeline over WebSocket and feeds every sensorData
// event into a ClientStreamBuffer drained on its own display tick. Window
// statistics are logged periodically; the caller gets the buffer back on
// exit so it can export the window.

use crate::stream_buffer::{ClientStreamBuffer, StreamBufferConfig};
use crate::ticker::Ticker;
use crate::types::{ControlMessage, ServerEvent, StreamError, StreamResult};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_MONITOR_URL: &str = "ws://127.0.0.1:3001/ws";

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub url: String,
    pub buffer: StreamBufferConfig,
    /// How often window statistics are logged
    pub report_interval: Duration,
    /// Control messages sent right after connecting
    pub commands: Vec<ControlMessage>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_MONITOR_URL.to_string(),
            buffer: StreamBufferConfig::default(),
            report_interval: Duration::from_secs(1),
            commands: Vec::new(),
        }
    }
}

/// Run until `cancel` fires or the server closes the connection
pub async fn run_monitor(
    config: MonitorConfig,
    cancel: CancellationToken,
) -> StreamResult<ClientStreamBuffer> {
    let (ws, _) = connect_async(config.url.as_str())
        .await
        .map_err(|e| StreamError::WebSocket(format!("Failed to connect to {}: {}", config.url, e)))?;
    info!("Connected to {}", config.url);

    let (mut write, mut read) = ws.split();

    let mut commands = config.commands.clone();
    commands.push(ControlMessage::Status);
    for command in &commands {
        let json = serde_json::to_string(command)?;
        write
            .send(Message::text(json))
            .await
            .map_err(|e| StreamError::WebSocket(e.to_string()))?;
    }

    let mut buffer = ClientStreamBuffer::new(config.buffer.clone());
    let mut display = Ticker::new(buffer.tick_interval());
    let mut report = Ticker::new(config.report_interval);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }

            _ = display.tick() => {
                buffer.tick();
            }

            _ = report.tick() => {
                let stats = buffer.stats();
                info!(
                    "current={:.1} min={:.1} max={:.1} avg={:.1} level={:.1} grip={:.0}%{} points={}",
                    stats.current,
                    stats.min,
                    stats.max,
                    stats.avg,
                    buffer.level(),
                    buffer.grip_percentage(),
                    if buffer.is_gripping() { " (gripping)" } else { "" },
                    buffer.window().len()
                );
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        apply_event(&mut buffer, text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Server closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(StreamError::WebSocket(e.to_string()));
                    }
                }
            }
        }
    }

    // Flush whatever arrived since the last display tick
    buffer.tick();
    Ok(buffer)
}

/// Decode one server frame and apply it to the buffer.
pub fn apply_event(buffer: &mut ClientStreamBuffer, text: &str) -> Option<ServerEvent> {
    let event = match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            warn!("Ignoring unparsable server frame: {}", e);
            return None;
        }
    };

    match &event {
        ServerEvent::SensorData { data } => {
            buffer.receive_payload(data);
        }
        ServerEvent::Connect { session_id } => info!("Session {}", session_id),
        ServerEvent::Status { status } => {
            info!(
                "Pipeline mode={:?} source={:?} pattern={} noise={}%",
                status.mode, status.source, status.simulation.pattern, status.simulation.noise_percent
            );
        }
        ServerEvent::Error { message, code } => warn!("Server error [{}]: {}", code, message),
    }
    debug!("Applied {:?}", event);
    Some(event)
}
