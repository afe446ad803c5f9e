pub mod broadcast;
pub mod client;
pub mod config;
pub mod mode;
pub mod pipeline;
pub mod signal;
pub mod simulator;
pub mod source;
pub mod stream_buffer;
pub mod throttle;
pub mod ticker;
pub mod types;
pub mod websocket;
pub mod window;

pub use broadcast::{Broadcaster, SessionHandle, SessionInfo};
pub use client::{run_monitor, MonitorConfig};
pub use config::PipelineConfig;
pub use mode::{ModeSwitch, ProducerKind};
pub use pipeline::Pipeline;
pub use simulator::{SignalPattern, SignalSimulator, SimulationConfig};
pub use source::{create_source, ReadingSource, SourceConfig, SourceFactory};
pub use stream_buffer::{ClientStreamBuffer, StreamBufferConfig};
pub use throttle::IngestThrottler;
pub use types::*;
pub use websocket::{router, AppState};
pub use window::{RollingWindow, Statistics};
