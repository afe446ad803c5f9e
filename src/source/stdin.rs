// Standard input reading source, for piping recorded sessions or another
// process's output into the pipeline.

use super::{pump_readings, ReadingSource};
use crate::types::{ReadingSink, StreamResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;

#[derive(Default)]
pub struct StdinReadingSource {
    connected: bool,
}

impl StdinReadingSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadingSource for StdinReadingSource {
    async fn connect(&mut self) -> StreamResult<()> {
        self.connected = true;
        Ok(())
    }

    async fn start(&mut self, sink: Arc<dyn ReadingSink>) -> StreamResult<()> {
        self.connected = true;
        let result = pump_readings(BufReader::new(tokio::io::stdin()), sink.as_ref()).await;
        self.connected = false;
        let count = result?;
        info!("stdin closed after {} readings", count);
        Ok(())
    }

    async fn stop(&mut self) -> StreamResult<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn describe(&self) -> String {
        "stdin".to_string()
    }
}
