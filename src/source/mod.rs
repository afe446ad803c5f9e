// Pluggable reading sources
//
// A source wraps a byte-oriented transport and forwards parsed readings into
// a sink. New transports are added by implementing `ReadingSource`, adding a
// variant to `SourceConfig` and a match arm in `create_source`.
//
// Current implementations:
// - Serial: USB serial devices (e.g. an Arduino on /dev/ttyACM0 or COM17)
// - TCP: line-delimited readings from a TCP server
// - Stdin: readings piped into the process

mod line;
mod serial;
mod stdin;
mod tcp;

use crate::types::{ReadingSink, StreamError, StreamResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use line::{parse_reading, pump_readings, LineReadings};
pub use serial::SerialReadingSource;
pub use stdin::StdinReadingSource;
pub use tcp::TcpReadingSource;

/// Configuration for the supported transports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SourceConfig {
    #[serde(rename = "serial")]
    Serial { port: String, baud_rate: u32 },

    #[serde(rename = "tcp")]
    Tcp { addr: String },

    #[serde(rename = "stdin")]
    Stdin,
}

/// A hardware-facing source of readings.
///
/// `start` runs until the transport ends or fails; the owner decides
/// whether to reopen it. Malformed lines never end the stream.
#[async_trait]
pub trait ReadingSource: Send {
    /// Open the transport
    async fn connect(&mut self) -> StreamResult<()>;

    /// Forward readings into `sink` until the transport closes.
    /// `Ok` means a clean end of stream, `Err` means the transport was lost.
    async fn start(&mut self, sink: Arc<dyn ReadingSink>) -> StreamResult<()>;

    /// Release the transport
    async fn stop(&mut self) -> StreamResult<()>;

    fn is_connected(&self) -> bool;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Factory used by the pipeline each time it (re)opens the transport
pub type SourceFactory = Arc<dyn Fn() -> StreamResult<Box<dyn ReadingSource>> + Send + Sync>;

pub fn create_source(config: &SourceConfig) -> StreamResult<Box<dyn ReadingSource>> {
    match config {
        SourceConfig::Serial { port, baud_rate } => {
            if port.trim().is_empty() {
                return Err(StreamError::InvalidConfig("serial port is empty".to_string()));
            }
            if *baud_rate == 0 {
                return Err(StreamError::InvalidConfig(format!(
                    "baud rate for {} must be non-zero",
                    port
                )));
            }
            Ok(Box::new(SerialReadingSource::new(port.clone(), *baud_rate)))
        }
        SourceConfig::Tcp { addr } => {
            if addr.trim().is_empty() {
                return Err(StreamError::InvalidConfig("TCP address is empty".to_string()));
            }
            Ok(Box::new(TcpReadingSource::new(addr.clone())))
        }
        SourceConfig::Stdin => Ok(Box::new(StdinReadingSource::new())),
    }
}

/// Factory that builds a fresh source from `config` on every call
pub fn source_factory(config: SourceConfig) -> SourceFactory {
    Arc::new(move || create_source(&config))
}
