// Mode switch between the hardware source and the simulator
//
// States: Hardware, SimulatedIdle, SimulatedActive (initial: Hardware).
// There is exactly one producer slot. Every transition tears down and awaits
// the current producer before the next one is spawned, so the hardware task
// and the simulator timer never run at the same time.

use crate::simulator::{SignalPattern, SignalSimulator, SimulationConfig};
use crate::source::SourceFactory;
use crate::throttle::IngestThrottler;
use crate::ticker::spawn_periodic;
use crate::types::{PipelineMode, ReadingSink, SourceStatus, StreamError, StreamResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Which producer currently owns the slot
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProducerKind {
    Hardware,
    Simulator,
}

/// Timing knobs for the producers
#[derive(Debug, Clone, Copy)]
pub struct ModeTiming {
    pub reconnect_delay: Duration,
    pub sim_interval: Duration,
}

impl Default for ModeTiming {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(2),
            sim_interval: Duration::from_millis(50),
        }
    }
}

struct ActiveProducer {
    kind: ProducerKind,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ModeSwitch {
    mode: PipelineMode,
    mode_tx: watch::Sender<PipelineMode>,
    status_tx: Arc<watch::Sender<SourceStatus>>,
    simulation: Arc<RwLock<SimulationConfig>>,
    factory: SourceFactory,
    throttler: Arc<IngestThrottler>,
    sim_sink: Arc<dyn ReadingSink>,
    timing: ModeTiming,
    active: Option<ActiveProducer>,
}

impl ModeSwitch {
    /// Hardware readings go through `throttler`; simulated readings go
    /// straight to `sim_sink`.
    pub fn new(
        factory: SourceFactory,
        throttler: Arc<IngestThrottler>,
        sim_sink: Arc<dyn ReadingSink>,
        simulation: SimulationConfig,
        timing: ModeTiming,
    ) -> Self {
        let (mode_tx, _) = watch::channel(PipelineMode::Hardware);
        let (status_tx, _) = watch::channel(SourceStatus::Disconnected);
        Self {
            mode: PipelineMode::Hardware,
            mode_tx,
            status_tx: Arc::new(status_tx),
            simulation: Arc::new(RwLock::new(SimulationConfig {
                active: false,
                ..simulation
            })),
            factory,
            throttler,
            sim_sink,
            timing,
            active: None,
        }
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn simulation(&self) -> SimulationConfig {
        *self.simulation.read()
    }

    /// Live view of the simulator settings
    pub fn shared_simulation(&self) -> Arc<RwLock<SimulationConfig>> {
        Arc::clone(&self.simulation)
    }

    pub fn source_status(&self) -> SourceStatus {
        *self.status_tx.borrow()
    }

    pub fn active_producer(&self) -> Option<ProducerKind> {
        self.active.as_ref().map(|p| p.kind)
    }

    pub fn subscribe_mode(&self) -> watch::Receiver<PipelineMode> {
        self.mode_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SourceStatus> {
        self.status_tx.subscribe()
    }

    /// Start the producer that belongs to the current state, if any
    pub async fn activate(&mut self) {
        match self.mode {
            PipelineMode::Hardware => self.spawn_hardware().await,
            PipelineMode::SimulatedActive => self.spawn_simulator().await,
            PipelineMode::SimulatedIdle => self.stop_active().await,
        }
    }

    /// Hardware -> SimulatedIdle, or SimulatedIdle/Active -> Hardware
    pub async fn toggle_simulation(&mut self) -> PipelineMode {
        match self.mode {
            PipelineMode::Hardware => {
                info!("Switching to simulation mode");
                self.stop_active().await;
                self.set_mode(PipelineMode::SimulatedIdle);
            }
            PipelineMode::SimulatedIdle | PipelineMode::SimulatedActive => {
                info!("Switching to hardware mode");
                self.stop_active().await;
                self.simulation.write().active = false;
                self.set_mode(PipelineMode::Hardware);
                self.spawn_hardware().await;
            }
        }
        self.mode
    }

    /// SimulatedIdle -> SimulatedActive
    pub async fn start_simulation(&mut self) -> StreamResult<PipelineMode> {
        match self.mode {
            PipelineMode::Hardware => Err(StreamError::InvalidState(
                "simulation mode is not selected".to_string(),
            )),
            PipelineMode::SimulatedActive => Ok(self.mode),
            PipelineMode::SimulatedIdle => {
                self.spawn_simulator().await;
                self.simulation.write().active = true;
                self.set_mode(PipelineMode::SimulatedActive);
                Ok(self.mode)
            }
        }
    }

    /// SimulatedActive -> SimulatedIdle
    pub async fn stop_simulation(&mut self) -> StreamResult<PipelineMode> {
        match self.mode {
            PipelineMode::Hardware => Err(StreamError::InvalidState(
                "simulation mode is not selected".to_string(),
            )),
            PipelineMode::SimulatedIdle => Ok(self.mode),
            PipelineMode::SimulatedActive => {
                self.stop_active().await;
                self.simulation.write().active = false;
                self.set_mode(PipelineMode::SimulatedIdle);
                Ok(self.mode)
            }
        }
    }

    /// Change simulator settings. Rejected unless simulation is selected.
    /// A running simulator picks the change up on its next tick.
    pub fn configure_simulation(
        &mut self,
        pattern: Option<SignalPattern>,
        noise_percent: Option<f64>,
    ) -> StreamResult<SimulationConfig> {
        if !self.mode.is_simulated() {
            return Err(StreamError::InvalidState(
                "simulation settings can only change in simulation mode".to_string(),
            ));
        }

        let mut config = self.simulation.write();
        if let Some(pattern) = pattern {
            config.pattern = pattern;
        }
        if let Some(noise) = noise_percent {
            config.set_noise(noise);
        }
        info!(
            "Simulation configured: pattern={}, noise={}%",
            config.pattern, config.noise_percent
        );
        Ok(*config)
    }

    /// Stop whatever producer is running
    pub async fn shutdown(&mut self) {
        self.stop_active().await;
    }

    fn set_mode(&mut self, mode: PipelineMode) {
        self.mode = mode;
        self.mode_tx.send_replace(mode);
    }

    async fn stop_active(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        active.cancel_token.cancel();
        if let Err(e) = active.handle.await {
            error!("{:?} producer task failed: {}", active.kind, e);
        }

        if active.kind == ProducerKind::Hardware {
            // Anything still in the slot came from the old producer
            self.throttler.clear();
            self.status_tx.send_replace(SourceStatus::Disconnected);
        }
        info!("{:?} producer stopped", active.kind);
    }

    async fn spawn_hardware(&mut self) {
        self.stop_active().await;

        let cancel_token = CancellationToken::new();
        let sink: Arc<dyn ReadingSink> = self.throttler.clone();
        let handle = tokio::spawn(run_hardware(
            Arc::clone(&self.factory),
            sink,
            Arc::clone(&self.status_tx),
            self.timing.reconnect_delay,
            cancel_token.clone(),
        ));

        self.active = Some(ActiveProducer {
            kind: ProducerKind::Hardware,
            cancel_token,
            handle,
        });
    }

    async fn spawn_simulator(&mut self) {
        self.stop_active().await;

        let cancel_token = CancellationToken::new();
        let config = Arc::clone(&self.simulation);
        let sink = Arc::clone(&self.sim_sink);
        let mut simulator = SignalSimulator::new();
        let handle = spawn_periodic(self.timing.sim_interval, cancel_token.clone(), move || {
            let current = *config.read();
            sink.publish(simulator.next_value(&current));
        });

        info!("Simulator started ({:?} interval)", self.timing.sim_interval);
        self.active = Some(ActiveProducer {
            kind: ProducerKind::Simulator,
            cancel_token,
            handle,
        });
    }
}

impl Drop for ModeSwitch {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel_token.cancel();
        }
    }
}

async fn run_hardware(
    factory: SourceFactory,
    sink: Arc<dyn ReadingSink>,
    status: Arc<watch::Sender<SourceStatus>>,
    reconnect_delay: Duration,
    cancel_token: CancellationToken,
) {
    tokio::select! {
        biased;

        _ = cancel_token.cancelled() => {
            info!("Hardware source cancelled");
        }

        _ = hardware_loop(&factory, sink, &status, reconnect_delay) => {}
    }
    status.send_replace(SourceStatus::Disconnected);
}

/// Open, stream, and reopen the transport until cancelled
async fn hardware_loop(
    factory: &SourceFactory,
    sink: Arc<dyn ReadingSink>,
    status: &watch::Sender<SourceStatus>,
    reconnect_delay: Duration,
) {
    loop {
        match factory() {
            Ok(mut source) => {
                let name = source.describe();
                status.send_replace(SourceStatus::Connecting);

                match source.connect().await {
                    Ok(()) => {
                        status.send_replace(SourceStatus::Connected);
                        info!("Hardware source {} connected", name);

                        match source.start(Arc::clone(&sink)).await {
                            Ok(()) => warn!("Hardware source {} closed", name),
                            Err(e) => warn!("Hardware source {} lost: {}", name, e),
                        }
                        if let Err(e) = source.stop().await {
                            warn!("Failed to release {}: {}", name, e);
                        }
                    }
                    Err(e) => warn!("Failed to open {}: {}", name, e),
                }
            }
            Err(e) => error!("Cannot create hardware source: {}", e),
        }

        status.send_replace(SourceStatus::Disconnected);
        info!("Retrying hardware source in {:?}", reconnect_delay);
        tokio::time::sleep(reconnect_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ReadingSource;
    use crate::types::Reading;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Counts live `start` calls; the guard drops when the future is
    /// cancelled or returns.
    struct LiveGuard(Arc<AtomicUsize>);

    impl LiveGuard {
        fn new(live: &Arc<AtomicUsize>) -> Self {
            live.fetch_add(1, Ordering::SeqCst);
            Self(Arc::clone(live))
        }
    }

    impl Drop for LiveGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    struct FakeSource {
        live: Arc<AtomicUsize>,
        /// Number of readings before the transport "unplugs"; None = forever
        limit: Option<usize>,
        connected: bool,
    }

    #[async_trait]
    impl ReadingSource for FakeSource {
        async fn connect(&mut self) -> StreamResult<()> {
            self.connected = true;
            Ok(())
        }

        async fn start(&mut self, sink: Arc<dyn ReadingSink>) -> StreamResult<()> {
            let _guard = LiveGuard::new(&self.live);
            let mut sent = 0;
            loop {
                if self.limit.is_some_and(|limit| sent >= limit) {
                    self.connected = false;
                    return Err(StreamError::Serial("unplugged".to_string()));
                }
                sink.publish(1000.0 + sent as Reading);
                sent += 1;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        async fn stop(&mut self) -> StreamResult<()> {
            self.connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn describe(&self) -> String {
            "fake".to_string()
        }
    }

    struct Harness {
        switch: ModeSwitch,
        throttler: Arc<IngestThrottler>,
        live: Arc<AtomicUsize>,
        opened: Arc<AtomicUsize>,
        sim_rx: mpsc::UnboundedReceiver<Reading>,
    }

    fn harness(limit: Option<usize>) -> Harness {
        let live = Arc::new(AtomicUsize::new(0));
        let opened = Arc::new(AtomicUsize::new(0));
        let factory: SourceFactory = {
            let live = Arc::clone(&live);
            let opened = Arc::clone(&opened);
            Arc::new(move || {
                opened.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(FakeSource {
                    live: Arc::clone(&live),
                    limit,
                    connected: false,
                }) as Box<dyn ReadingSource>)
            })
        };
        let throttler = Arc::new(IngestThrottler::new(Duration::from_millis(20)));
        let (tx, sim_rx) = mpsc::unbounded_channel();
        let switch = ModeSwitch::new(
            factory,
            Arc::clone(&throttler),
            Arc::new(tx),
            SimulationConfig::default(),
            ModeTiming {
                reconnect_delay: Duration::from_millis(100),
                sim_interval: Duration::from_millis(50),
            },
        );
        Harness {
            switch,
            throttler,
            live,
            opened,
            sim_rx,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hardware_and_simulator_never_overlap() {
        let mut h = harness(None);
        assert_eq!(h.switch.mode(), PipelineMode::Hardware);

        h.switch.activate().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.live.load(Ordering::SeqCst), 1);
        assert_eq!(h.switch.active_producer(), Some(ProducerKind::Hardware));
        assert_eq!(h.switch.source_status(), SourceStatus::Connected);
        assert!(h.throttler.metrics().submitted > 0);

        assert_eq!(h.switch.toggle_simulation().await, PipelineMode::SimulatedIdle);
        assert_eq!(h.live.load(Ordering::SeqCst), 0);
        assert_eq!(h.switch.active_producer(), None);
        assert_eq!(h.switch.source_status(), SourceStatus::Disconnected);

        let submitted = h.throttler.metrics().submitted;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.throttler.metrics().submitted, submitted);

        assert_eq!(
            h.switch.start_simulation().await.unwrap(),
            PipelineMode::SimulatedActive
        );
        assert!(h.switch.simulation().active);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(h.live.load(Ordering::SeqCst), 0);
        assert_eq!(h.switch.active_producer(), Some(ProducerKind::Simulator));
        let mut simulated = 0;
        while h.sim_rx.try_recv().is_ok() {
            simulated += 1;
        }
        assert_eq!(simulated, 2);

        assert_eq!(h.switch.toggle_simulation().await, PipelineMode::Hardware);
        assert!(!h.switch.simulation().active);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(h.sim_rx.try_recv().is_err());
        assert_eq!(h.live.load(Ordering::SeqCst), 1);

        h.switch.shutdown().await;
        assert_eq!(h.live.load(Ordering::SeqCst), 0);
        assert_eq!(h.switch.active_producer(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_simulation_clears_timer() {
        let mut h = harness(None);
        h.switch.toggle_simulation().await;
        h.switch.start_simulation().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(
            h.switch.stop_simulation().await.unwrap(),
            PipelineMode::SimulatedIdle
        );
        while h.sim_rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(h.sim_rx.try_recv().is_err());

        // Idempotent from the consumer's point of view
        assert_eq!(
            h.switch.stop_simulation().await.unwrap(),
            PipelineMode::SimulatedIdle
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_transitions_rejected() {
        let mut h = harness(None);
        assert!(matches!(
            h.switch.start_simulation().await,
            Err(StreamError::InvalidState(_))
        ));
        assert!(matches!(
            h.switch.stop_simulation().await,
            Err(StreamError::InvalidState(_))
        ));
        assert!(h
            .switch
            .configure_simulation(Some(SignalPattern::Sine), None)
            .is_err());
        assert_eq!(h.switch.simulation().pattern, SignalPattern::Random);

        h.switch.toggle_simulation().await;
        let config = h
            .switch
            .configure_simulation(Some(SignalPattern::Sine), Some(150.0))
            .unwrap();
        assert_eq!(config.pattern, SignalPattern::Sine);
        assert_eq!(config.noise_percent, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_loss_is_retried() {
        let mut h = harness(Some(3));
        let mut status = h.switch.subscribe_status();
        h.switch.activate().await;

        // Connected, unplugged after 3 readings, then reopened after the delay
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.opened.load(Ordering::SeqCst), 1);
        assert_eq!(*status.borrow_and_update(), SourceStatus::Disconnected);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.opened.load(Ordering::SeqCst), 2);

        h.switch.shutdown().await;
        assert_eq!(h.live.load(Ordering::SeqCst), 0);
        assert_eq!(h.switch.source_status(), SourceStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_changes_are_published() {
        let mut h = harness(None);
        let mut modes = h.switch.subscribe_mode();
        h.switch.toggle_simulation().await;
        assert!(modes.has_changed().unwrap());
        assert_eq!(*modes.borrow_and_update(), PipelineMode::SimulatedIdle);
        h.switch.shutdown().await;
    }
}
