// Common types for the signal pipeline

use crate::simulator::{SignalPattern, SimulationConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One scalar sample from the signal source. Readings carry no identity
/// beyond their arrival order.
pub type Reading = f64;

/// Identity of a connected consumer session
pub type SessionId = Uuid;

/// Result type for pipeline operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur in the pipeline
///
/// Malformed readings are not represented here: they are dropped at the
/// source adapter and never surface as errors.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Already running")]
    AlreadyRunning,
}

/// Anything that accepts readings without blocking.
pub trait ReadingSink: Send + Sync {
    fn publish(&self, value: Reading);
}

impl ReadingSink for mpsc::UnboundedSender<Reading> {
    fn publish(&self, value: Reading) {
        let _ = self.send(value);
    }
}

/// Connection state of the hardware transport
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Connecting,
    Connected,
    #[default]
    Disconnected,
}

/// Which producer currently feeds the broadcast channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    #[default]
    Hardware,
    SimulatedIdle,
    SimulatedActive,
}

impl PipelineMode {
    pub fn is_simulated(&self) -> bool {
        !matches!(self, PipelineMode::Hardware)
    }
}

/// Snapshot of the pipeline, served on `/status` and pushed to sessions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineStatus {
    pub mode: PipelineMode,
    pub source: SourceStatus,
    pub simulation: SimulationConfig,
    pub sessions: usize,
    pub emitted: u64,
}

/// Events pushed from the server to each consumer session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum ServerEvent {
    /// First message on every new session
    #[serde(rename = "connect")]
    Connect { session_id: SessionId },

    /// One throttled reading, string-encoded
    #[serde(rename = "sensorData")]
    SensorData { data: String },

    /// Source status or mode changed
    #[serde(rename = "status")]
    Status { status: PipelineStatus },

    #[serde(rename = "error")]
    Error { message: String, code: String },
}

impl ServerEvent {
    pub fn sensor_data(value: Reading) -> Self {
        ServerEvent::SensorData {
            data: value.to_string(),
        }
    }

    pub fn error(message: impl Into<String>, code: &str) -> Self {
        ServerEvent::Error {
            message: message.into(),
            code: code.to_string(),
        }
    }
}

/// Control messages a consumer may send to the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Switch between hardware and simulation
    ToggleSimulation,

    StartSimulation,

    StopSimulation,

    /// Adjust the simulator; only honoured while simulation is selected
    ConfigureSimulation {
        #[serde(default)]
        pattern: Option<SignalPattern>,
        #[serde(default)]
        noise: Option<f64>,
    },

    /// Ask for a fresh status event
    Status,
}
