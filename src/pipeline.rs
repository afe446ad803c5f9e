// Pipeline owner
//
// One instance per process, created explicitly and started/stopped
// explicitly. It wires the hardware source into the throttler, the
// throttler and the simulator into the broadcaster, and pushes status
// changes to every session.

use crate::broadcast::Broadcaster;
use crate::config::PipelineConfig;
use crate::mode::{ModeSwitch, ModeTiming, ProducerKind};
use crate::simulator::SimulationConfig;
use crate::source::{source_factory, SourceFactory};
use crate::throttle::IngestThrottler;
use crate::types::{
    ControlMessage, PipelineMode, PipelineStatus, ReadingSink, ServerEvent, SourceStatus, StreamResult,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{watch, Mutex as TokioMutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
pub struct Pipeline {
    broadcaster: Broadcaster,
    throttler: Arc<IngestThrottler>,
    mode_switch: Arc<TokioMutex<ModeSwitch>>,
    mode_rx: watch::Receiver<PipelineMode>,
    status_rx: watch::Receiver<SourceStatus>,
    simulation: Arc<RwLock<SimulationConfig>>,
    start_simulated: bool,
    cancel_token: CancellationToken,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self::with_source_factory(config, source_factory(config.source.clone()))
    }

    /// Build a pipeline around a custom hardware source factory
    pub fn with_source_factory(config: &PipelineConfig, factory: SourceFactory) -> Self {
        let broadcaster = Broadcaster::with_queue_depth(config.session_queue_depth);
        let throttler = Arc::new(IngestThrottler::new(config.emit_interval));
        let sim_sink: Arc<dyn ReadingSink> = Arc::new(broadcaster.clone());

        let mode_switch = ModeSwitch::new(
            factory,
            Arc::clone(&throttler),
            sim_sink,
            config.simulation,
            ModeTiming {
                reconnect_delay: config.reconnect_delay,
                sim_interval: config.sim_interval,
            },
        );

        Self {
            mode_rx: mode_switch.subscribe_mode(),
            status_rx: mode_switch.subscribe_status(),
            simulation: mode_switch.shared_simulation(),
            broadcaster,
            throttler,
            mode_switch: Arc::new(TokioMutex::new(mode_switch)),
            start_simulated: config.start_simulated,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Start the throttler, the initial producer and the status forwarder
    pub async fn start(&self) -> StreamResult<()> {
        info!("Starting signal pipeline");
        self.throttler.start(Arc::new(self.broadcaster.clone()))?;

        {
            let mut mode_switch = self.mode_switch.lock().await;
            if self.start_simulated {
                mode_switch.toggle_simulation().await;
                mode_switch.start_simulation().await?;
            } else {
                mode_switch.activate().await;
            }
        }

        self.spawn_status_forwarder();
        Ok(())
    }

    /// Stop every producer and the throttler
    pub async fn shutdown(&self) {
        info!("Shutting down signal pipeline");
        self.cancel_token.cancel();
        self.mode_switch.lock().await.shutdown().await;
        self.throttler.stop().await;
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn throttler(&self) -> &IngestThrottler {
        &self.throttler
    }

    pub fn mode(&self) -> PipelineMode {
        *self.mode_rx.borrow()
    }

    pub fn source_status(&self) -> SourceStatus {
        *self.status_rx.borrow()
    }

    pub async fn active_producer(&self) -> Option<ProducerKind> {
        self.mode_switch.lock().await.active_producer()
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            mode: self.mode(),
            source: self.source_status(),
            simulation: *self.simulation.read(),
            sessions: self.broadcaster.session_count(),
            emitted: self.broadcaster.emitted(),
        }
    }

    pub fn status_event(&self) -> ServerEvent {
        ServerEvent::Status {
            status: self.status(),
        }
    }

    /// Apply a consumer control message. Returns an event for the caller
    /// only when it needs a direct reply; mode changes reach every session
    /// through the status forwarder.
    pub async fn handle_control(&self, message: ControlMessage) -> Option<ServerEvent> {
        let mut mode_switch = self.mode_switch.lock().await;
        let result = match message {
            ControlMessage::ToggleSimulation => {
                mode_switch.toggle_simulation().await;
                Ok(())
            }
            ControlMessage::StartSimulation => mode_switch.start_simulation().await.map(|_| ()),
            ControlMessage::StopSimulation => mode_switch.stop_simulation().await.map(|_| ()),
            ControlMessage::ConfigureSimulation { pattern, noise } => {
                mode_switch.configure_simulation(pattern, noise).map(|_| ())
            }
            ControlMessage::Status => {
                drop(mode_switch);
                return Some(self.status_event());
            }
        };
        drop(mode_switch);

        match result {
            Ok(()) => {
                // Config changes do not move the mode watch, so announce them here
                self.broadcaster.notify(self.status_event());
                None
            }
            Err(e) => {
                warn!("Rejected control message: {}", e);
                Some(ServerEvent::error(e.to_string(), "INVALID_STATE"))
            }
        }
    }

    fn spawn_status_forwarder(&self) {
        let pipeline = self.clone();
        let mut mode_rx = self.mode_rx.clone();
        let mut status_rx = self.status_rx.clone();
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = cancel_token.cancelled() => break,

                    changed = mode_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        info!("Pipeline mode: {:?}", *mode_rx.borrow_and_update());
                    }

                    changed = status_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        info!("Source status: {:?}", *status_rx.borrow_and_update());
                    }
                }
                pipeline.broadcaster.notify(pipeline.status_event());
            }
        });
    }
}
