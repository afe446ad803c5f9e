// TCP reading source
//
// Connects to a server that writes one reading per line, such as a
// ser2net bridge in front of the sensor.

use super::{pump_readings, ReadingSource};
use crate::types::{ReadingSink, StreamError, StreamResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::info;

pub struct TcpReadingSource {
    addr: String,
    stream: Option<TcpStream>,
}

impl TcpReadingSource {
    pub fn new(addr: String) -> Self {
        Self { addr, stream: None }
    }
}

#[async_trait]
impl ReadingSource for TcpReadingSource {
    async fn connect(&mut self) -> StreamResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        info!("Connecting to TCP source {}", self.addr);
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| StreamError::Network(format!("TCP connection to {} failed: {}", self.addr, e)))?;

        self.stream = Some(stream);
        info!("TCP source {} connected", self.addr);
        Ok(())
    }

    async fn start(&mut self, sink: Arc<dyn ReadingSink>) -> StreamResult<()> {
        if self.stream.is_none() {
            self.connect().await?;
        }
        let stream = self
            .stream
            .take()
            .ok_or_else(|| StreamError::Network("Not connected".to_string()))?;

        let count = pump_readings(BufReader::new(stream), sink.as_ref())
            .await
            .map_err(|e| StreamError::Network(format!("TCP read from {} failed: {}", self.addr, e)))?;

        info!("TCP source {} closed by peer after {} readings", self.addr, count);
        Ok(())
    }

    async fn stop(&mut self) -> StreamResult<()> {
        self.stream = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}
