// Serial port reading source
//
// Reads newline-delimited ASCII readings from a microcontroller, e.g. an
// Arduino printing one analogRead() value per line at 115200 baud.

use super::{pump_readings, ReadingSource};
use crate::types::{ReadingSink, StreamError, StreamResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{info, warn};

pub struct SerialReadingSource {
    port: String,
    baud_rate: u32,
    stream: Option<SerialStream>,
}

impl SerialReadingSource {
    pub fn new(port: String, baud_rate: u32) -> Self {
        Self {
            port,
            baud_rate,
            stream: None,
        }
    }
}

#[async_trait]
impl ReadingSource for SerialReadingSource {
    async fn connect(&mut self) -> StreamResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        info!("Opening serial port {} at {} baud", self.port, self.baud_rate);

        let stream = tokio_serial::new(&self.port, self.baud_rate)
            .open_native_async()
            .map_err(|e| StreamError::Serial(format!("Failed to open {}: {}", self.port, e)))?;

        self.stream = Some(stream);
        info!("Serial port {} is open", self.port);
        Ok(())
    }

    async fn start(&mut self, sink: Arc<dyn ReadingSink>) -> StreamResult<()> {
        if self.stream.is_none() {
            self.connect().await?;
        }
        let stream = self
            .stream
            .take()
            .ok_or_else(|| StreamError::Serial("Port not open".to_string()))?;

        let result = pump_readings(BufReader::new(stream), sink.as_ref()).await;
        match result {
            Ok(count) => {
                warn!("Serial port {} closed after {} readings", self.port, count);
                Ok(())
            }
            Err(e) => Err(StreamError::Serial(format!("Read failed on {}: {}", self.port, e))),
        }
    }

    async fn stop(&mut self) -> StreamResult<()> {
        if self.stream.take().is_some() {
            info!("Closed serial port {}", self.port);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn describe(&self) -> String {
        format!("serial://{}@{}", self.port, self.baud_rate)
    }
}
