use anyhow::Context;
use clap::Parser;
use myolink::{
    router, run_monitor, AppState, ControlMessage, MonitorConfig, Pipeline, PipelineConfig,
    SourceConfig, StreamBufferConfig,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use cli::{Cli, Command, MonitorArgs, ServeArgs, SourceKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "myolink=info,tower_http=info",
        1 => "myolink=debug,tower_http=debug",
        _ => "myolink=trace,tower_http=trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Monitor(args) => monitor(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = PipelineConfig::from_env();
    apply_overrides(&mut config, args);

    info!("Starting myolink on {}", config.bind_addr);
    info!("Source: {:?}", config.source);

    let pipeline = Pipeline::new(&config);
    pipeline.start().await.context("failed to start pipeline")?;

    let app = router(
        AppState {
            pipeline: pipeline.clone(),
        },
        &config.cors_origins,
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("Listening on ws://{}/ws", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pipeline.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

fn apply_overrides(config: &mut PipelineConfig, args: ServeArgs) {
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let (mut port, mut baud_rate, mut tcp_addr) = match &config.source {
        SourceConfig::Serial { port, baud_rate } => (port.clone(), *baud_rate, None),
        SourceConfig::Tcp { addr } => (
            myolink::config::DEFAULT_SERIAL_PORT.to_string(),
            myolink::config::DEFAULT_BAUD_RATE,
            Some(addr.clone()),
        ),
        SourceConfig::Stdin => (
            myolink::config::DEFAULT_SERIAL_PORT.to_string(),
            myolink::config::DEFAULT_BAUD_RATE,
            None,
        ),
    };
    if let Some(p) = args.serial_port {
        port = p;
    }
    if let Some(b) = args.baud_rate {
        baud_rate = b;
    }
    if args.tcp_addr.is_some() {
        tcp_addr = args.tcp_addr;
    }

    let kind = args.source.unwrap_or(match config.source {
        SourceConfig::Serial { .. } => SourceKind::Serial,
        SourceConfig::Tcp { .. } => SourceKind::Tcp,
        SourceConfig::Stdin => SourceKind::Stdin,
    });
    config.source = match kind {
        SourceKind::Serial => SourceConfig::Serial { port, baud_rate },
        SourceKind::Tcp => SourceConfig::Tcp {
            addr: tcp_addr.unwrap_or_else(|| myolink::config::DEFAULT_TCP_ADDR.to_string()),
        },
        SourceKind::Stdin => SourceConfig::Stdin,
    };

    if let Some(ms) = args.emit_interval_ms {
        config.set_emit_interval_ms(ms);
    }
    if args.simulate {
        config.start_simulated = true;
    }
}

async fn monitor(args: MonitorArgs) -> anyhow::Result<()> {
    let mut commands = Vec::new();
    if args.toggle {
        commands.push(ControlMessage::ToggleSimulation);
    }
    if args.start {
        commands.push(ControlMessage::StartSimulation);
    }

    let config = MonitorConfig {
        url: args.url,
        buffer: StreamBufferConfig {
            capacity: args.window,
            tick_interval: Duration::from_millis(args.tick_ms),
            ema_alpha: args.alpha,
            grip_threshold: args.threshold,
            ..Default::default()
        },
        commands,
        ..Default::default()
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        });
    }

    let buffer = run_monitor(config, cancel).await?;
    let stats = buffer.stats();
    info!(
        "Final window: {} points, min={} max={} avg={:.2}",
        buffer.window().len(),
        stats.min,
        stats.max,
        stats.avg
    );

    if let Some(path) = args.export {
        tokio::fs::write(&path, buffer.export())
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Exported window to {}", path.display());
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
