use crate::simulator::{SignalPattern, SimulationConfig};
use crate::source::SourceConfig;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
pub const DEFAULT_EMIT_INTERVAL_MS: i64 = 20;
pub const DEFAULT_RECONNECT_DELAY_MS: i64 = 2000;
pub const DEFAULT_SIM_INTERVAL_MS: i64 = 50;
pub const DEFAULT_SESSION_QUEUE: i64 = 256;
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyACM0";
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_TCP_ADDR: &str = "127.0.0.1:5000";

/// Server-side pipeline configuration loaded from environment variables
///
/// Out-of-range values are clamped and unparsable values fall back to
/// their default, so loading never fails.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Address the WebSocket endpoint binds to
    pub bind_addr: String,
    /// Hardware transport to read readings from
    pub source: SourceConfig,
    /// Ingest throttle interval
    pub emit_interval: Duration,
    /// Delay before reopening a lost transport
    pub reconnect_delay: Duration,
    /// Simulator tick interval
    pub sim_interval: Duration,
    /// Initial simulator settings
    pub simulation: SimulationConfig,
    /// Start in simulation mode instead of hardware
    pub start_simulated: bool,
    /// Outbound queue depth per session
    pub session_queue_depth: usize,
    /// CORS allowed origins
    pub cors_origins: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            source: SourceConfig::Serial {
                port: DEFAULT_SERIAL_PORT.to_string(),
                baud_rate: DEFAULT_BAUD_RATE,
            },
            emit_interval: Duration::from_millis(DEFAULT_EMIT_INTERVAL_MS as u64),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS as u64),
            sim_interval: Duration::from_millis(DEFAULT_SIM_INTERVAL_MS as u64),
            simulation: SimulationConfig::default(),
            start_simulated: false,
            session_queue_depth: DEFAULT_SESSION_QUEUE as usize,
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables (and `.env` if present)
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let source = match env::var("MYOLINK_SOURCE")
            .unwrap_or_else(|_| "serial".to_string())
            .to_lowercase()
            .as_str()
        {
            "tcp" => SourceConfig::Tcp {
                addr: env::var("MYOLINK_TCP_ADDR").unwrap_or_else(|_| DEFAULT_TCP_ADDR.to_string()),
            },
            "stdin" => SourceConfig::Stdin,
            other => {
                if other != "serial" {
                    warn!("Unknown MYOLINK_SOURCE '{}', using serial", other);
                }
                SourceConfig::Serial {
                    port: env::var("MYOLINK_SERIAL_PORT")
                        .unwrap_or_else(|_| DEFAULT_SERIAL_PORT.to_string()),
                    baud_rate: env_or("MYOLINK_BAUD_RATE", DEFAULT_BAUD_RATE),
                }
            }
        };

        let pattern = env_or("MYOLINK_SIM_PATTERN", SignalPattern::Random);
        let noise = env_or("MYOLINK_SIM_NOISE", SimulationConfig::default().noise_percent);

        Self {
            bind_addr: env::var("MYOLINK_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            source,
            emit_interval: millis_from_env("MYOLINK_EMIT_INTERVAL_MS", DEFAULT_EMIT_INTERVAL_MS, 1, 1000),
            reconnect_delay: millis_from_env(
                "MYOLINK_RECONNECT_DELAY_MS",
                DEFAULT_RECONNECT_DELAY_MS,
                100,
                60_000,
            ),
            sim_interval: millis_from_env("MYOLINK_SIM_INTERVAL_MS", DEFAULT_SIM_INTERVAL_MS, 5, 1000),
            simulation: SimulationConfig::new(pattern, noise),
            start_simulated: env::var("MYOLINK_START_SIMULATED")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
            session_queue_depth: clamp_with_warning(
                "MYOLINK_SESSION_QUEUE",
                env_or("MYOLINK_SESSION_QUEUE", DEFAULT_SESSION_QUEUE),
                8,
                4096,
            ) as usize,
            cors_origins: env::var("MYOLINK_CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| vec!["http://localhost:3000".to_string()]),
        }
    }

    /// Override the emit interval, clamping to the valid range
    pub fn set_emit_interval_ms(&mut self, ms: i64) {
        self.emit_interval = clamped_millis("emit interval", ms, 1, 1000);
    }
}

/// Clamp `value` into `[min, max]`, logging when it had to be adjusted.
/// Values with no ordering (NaN) come back as `min`.
pub fn clamp_with_warning<T>(name: &str, value: T, min: T, max: T) -> T
where
    T: PartialOrd + Copy + Display,
{
    if is_unordered(&value) {
        warn!("{} = {} is not a number, clamping to {}", name, value, min);
        min
    } else if value < min {
        warn!("{} = {} is below minimum, clamping to {}", name, value, min);
        min
    } else if value > max {
        warn!("{} = {} is above maximum, clamping to {}", name, value, max);
        max
    } else {
        value
    }
}

/// Like `clamp_with_warning`, but falls back to `default` for NaN.
pub fn clamp_or_default<T>(name: &str, value: T, min: T, max: T, default: T) -> T
where
    T: PartialOrd + Copy + Display,
{
    if is_unordered(&value) {
        warn!("{} = {} is not a number, using default {}", name, value, default);
        return default;
    }
    clamp_with_warning(name, value, min, max)
}

fn is_unordered<T: PartialOrd>(value: &T) -> bool {
    value.partial_cmp(value).is_none()
}

pub(crate) fn clamped_millis(name: &str, ms: i64, min: i64, max: i64) -> Duration {
    Duration::from_millis(clamp_with_warning(name, ms, min, max) as u64)
}

fn millis_from_env(key: &str, default: i64, min: i64, max: i64) -> Duration {
    clamped_millis(key, env_or(key, default), min, max)
}

fn env_or<T: FromStr + Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid value for {}: '{}', using {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
