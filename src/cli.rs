use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "myolink",
    version,
    about = "Real-time EMG signal pipeline",
    long_about = "Read muscle-sensor readings from serial, TCP or stdin, throttle them and\n\
                  broadcast them to WebSocket consumers. A built-in simulator stands in\n\
                  when no hardware is attached."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the pipeline and serve the WebSocket endpoint
    Serve(ServeArgs),
    /// Connect to a running pipeline and log live window statistics
    Monitor(MonitorArgs),
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SourceKind {
    Serial,
    Tcp,
    Stdin,
}

/// Overrides for values otherwise read from the environment
#[derive(Args)]
pub struct ServeArgs {
    /// Address to bind the HTTP/WebSocket server to
    #[arg(long)]
    pub bind: Option<String>,

    /// Hardware transport
    #[arg(long, value_enum)]
    pub source: Option<SourceKind>,

    /// Serial device path
    #[arg(long)]
    pub serial_port: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    pub baud_rate: Option<u32>,

    /// TCP address to read readings from
    #[arg(long)]
    pub tcp_addr: Option<String>,

    /// Ingest throttle interval in milliseconds
    #[arg(long)]
    pub emit_interval_ms: Option<i64>,

    /// Start with the simulator running instead of hardware
    #[arg(long)]
    pub simulate: bool,
}

#[derive(Args)]
pub struct MonitorArgs {
    /// WebSocket URL of the pipeline
    #[arg(long, default_value = myolink::client::DEFAULT_MONITOR_URL)]
    pub url: String,

    /// Rolling window capacity (50-500)
    #[arg(long, default_value_t = 100)]
    pub window: usize,

    /// Display tick in milliseconds
    #[arg(long, default_value_t = 16)]
    pub tick_ms: u64,

    /// EMA smoothing factor
    #[arg(long, default_value_t = myolink::signal::DEFAULT_EMA_ALPHA)]
    pub alpha: f64,

    /// Grip threshold in sensor units
    #[arg(long, default_value_t = myolink::signal::DEFAULT_GRIP_THRESHOLD)]
    pub threshold: f64,

    /// Send toggle_simulation after connecting
    #[arg(long)]
    pub toggle: bool,

    /// Send start_simulation after connecting (after --toggle, if given)
    #[arg(long)]
    pub start: bool,

    /// Write the window to this file on exit, one value per line
    #[arg(long)]
    pub export: Option<PathBuf>,
}
