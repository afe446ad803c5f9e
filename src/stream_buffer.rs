// Per-consumer stream buffer
//
// Readings pushed by the broadcast channel arrive at network-jittered times
// and collect in a small micro-buffer. A fixed-rate display tick drains the
// whole micro-buffer in arrival order into the rolling window. While paused,
// drained readings are thrown away so the window stays frozen, but the
// micro-buffer is still drained every tick and never grows.

use crate::config::clamp_with_warning;
use crate::signal::{EmaLevel, GripDetector, SignalScale, DEFAULT_EMA_ALPHA, DEFAULT_GRIP_THRESHOLD};
use crate::types::Reading;
use crate::window::{RollingWindow, Statistics};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

pub const MIN_WINDOW_CAPACITY: usize = 50;
pub const MAX_WINDOW_CAPACITY: usize = 500;
pub const DEFAULT_WINDOW_CAPACITY: usize = 100;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);

/// Consumer-side configuration
#[derive(Debug, Clone)]
pub struct StreamBufferConfig {
    /// Rolling window capacity, clamped to `[50, 500]`
    pub capacity: usize,
    /// Display tick interval
    pub tick_interval: Duration,
    /// EMA smoothing factor for the precision level
    pub ema_alpha: f64,
    pub scale: SignalScale,
    pub grip_threshold: f64,
}

impl Default for StreamBufferConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_WINDOW_CAPACITY,
            tick_interval: DEFAULT_TICK_INTERVAL,
            ema_alpha: DEFAULT_EMA_ALPHA,
            scale: SignalScale::default(),
            grip_threshold: DEFAULT_GRIP_THRESHOLD,
        }
    }
}

/// Everything a chart or exercise needs for one frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamSnapshot {
    pub values: Vec<Reading>,
    pub stats: Statistics,
    pub level: f64,
    pub grip_percentage: f64,
    pub gripping: bool,
    pub paused: bool,
}

/// Counters for one consumer
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamBufferMetrics {
    pub received: u64,
    pub malformed: u64,
    pub applied: u64,
    pub discarded: u64,
    pub ticks: u64,
}

pub struct ClientStreamBuffer {
    pending: Vec<Reading>,
    window: RollingWindow,
    paused: bool,
    ema: EmaLevel,
    scale: SignalScale,
    grip: GripDetector,
    tick_interval: Duration,
    metrics: StreamBufferMetrics,
}

impl ClientStreamBuffer {
    pub fn new(config: StreamBufferConfig) -> Self {
        let capacity = clamp_window_capacity(config.capacity);
        Self {
            pending: Vec::new(),
            window: RollingWindow::new(capacity),
            paused: false,
            ema: EmaLevel::new(config.ema_alpha),
            scale: config.scale,
            grip: GripDetector::new(config.grip_threshold),
            tick_interval: config.tick_interval,
            metrics: StreamBufferMetrics::default(),
        }
    }

    /// Queue a reading for the next tick
    pub fn receive(&mut self, value: Reading) {
        self.metrics.received += 1;
        self.pending.push(value);
    }

    /// Queue a string-encoded reading; non-numeric payloads are dropped
    pub fn receive_payload(&mut self, payload: &str) -> bool {
        match payload.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => {
                self.receive(value);
                true
            }
            _ => {
                self.metrics.malformed += 1;
                trace!("Dropping malformed payload: {:?}", payload);
                false
            }
        }
    }

    /// Drain the micro-buffer. Returns the number of readings applied to
    /// the window (zero while paused).
    pub fn tick(&mut self) -> usize {
        self.metrics.ticks += 1;
        if self.pending.is_empty() {
            return 0;
        }

        let drained = std::mem::take(&mut self.pending);
        for &value in &drained {
            self.ema.update(self.scale.rescale(value));
        }

        if self.paused {
            self.metrics.discarded += drained.len() as u64;
            return 0;
        }

        let applied = drained.len();
        self.window.extend(drained);
        self.metrics.applied += applied as u64;
        applied
    }

    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            debug!("Stream buffer {}", if paused { "paused" } else { "resumed" });
        }
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Empty the window and anything not yet drained
    pub fn clear(&mut self) {
        self.pending.clear();
        self.window.clear();
    }

    /// Window contents as text, one value per line, oldest first
    pub fn export(&self) -> String {
        self.window.export()
    }

    /// Resize the window; clamped to `[50, 500]`
    pub fn set_capacity(&mut self, capacity: usize) {
        self.window.set_capacity(clamp_window_capacity(capacity));
    }

    pub fn capacity(&self) -> usize {
        self.window.capacity()
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    pub fn values(&self) -> Vec<Reading> {
        self.window.to_vec()
    }

    pub fn stats(&self) -> Statistics {
        self.window.stats()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Smoothed precision level (0..=100)
    pub fn level(&self) -> f64 {
        self.ema.level()
    }

    /// Latest reading mapped onto 0..=100
    pub fn grip_percentage(&self) -> f64 {
        self.window
            .last()
            .map(|v| self.scale.rescale(v))
            .unwrap_or(0.0)
    }

    pub fn is_gripping(&self) -> bool {
        self.window
            .last()
            .map(|v| self.grip.is_gripping(v))
            .unwrap_or(false)
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn metrics(&self) -> StreamBufferMetrics {
        self.metrics
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            values: self.values(),
            stats: self.stats(),
            level: self.level(),
            grip_percentage: self.grip_percentage(),
            gripping: self.is_gripping(),
            paused: self.paused,
        }
    }
}

impl Default for ClientStreamBuffer {
    fn default() -> Self {
        Self::new(StreamBufferConfig::default())
    }
}

pub fn clamp_window_capacity(capacity: usize) -> usize {
    clamp_with_warning(
        "window capacity",
        capacity,
        MIN_WINDOW_CAPACITY,
        MAX_WINDOW_CAPACITY,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> ClientStreamBuffer {
        ClientStreamBuffer::default()
    }

    #[test]
    fn test_values_wait_for_tick() {
        let mut buffer = buffer();
        buffer.receive(1.0);
        buffer.receive(2.0);
        assert!(buffer.window().is_empty());
        assert_eq!(buffer.pending_len(), 2);

        assert_eq!(buffer.tick(), 2);
        assert_eq!(buffer.values(), vec![1.0, 2.0]);
        assert_eq!(buffer.pending_len(), 0);
        assert_eq!(buffer.tick(), 0);
    }

    #[test]
    fn test_pause_discards_but_drains() {
        let mut buffer = buffer();
        buffer.receive(1.0);
        buffer.tick();

        buffer.set_paused(true);
        buffer.receive(2.0);
        buffer.receive(3.0);
        assert_eq!(buffer.tick(), 0);
        assert_eq!(buffer.pending_len(), 0);
        assert_eq!(buffer.values(), vec![1.0]);

        buffer.set_paused(false);
        buffer.receive(4.0);
        buffer.tick();
        assert_eq!(buffer.values(), vec![1.0, 4.0]);

        let metrics = buffer.metrics();
        assert_eq!(metrics.discarded, 2);
        assert_eq!(metrics.applied, 2);
    }

    #[test]
    fn test_capacity_clamped() {
        let mut buffer = ClientStreamBuffer::new(StreamBufferConfig {
            capacity: 10,
            ..Default::default()
        });
        assert_eq!(buffer.capacity(), MIN_WINDOW_CAPACITY);

        buffer.set_capacity(10_000);
        assert_eq!(buffer.capacity(), MAX_WINDOW_CAPACITY);

        buffer.set_capacity(250);
        assert_eq!(buffer.capacity(), 250);
    }

    #[test]
    fn test_window_bounded_across_ticks() {
        let mut buffer = buffer();
        for batch in 0..30 {
            for i in 0..7 {
                buffer.receive((batch * 7 + i) as f64);
            }
            buffer.tick();
            assert!(buffer.window().len() <= DEFAULT_WINDOW_CAPACITY);
        }
        let values = buffer.values();
        assert_eq!(values.len(), DEFAULT_WINDOW_CAPACITY);
        assert_eq!(values.first().copied(), Some(110.0));
        assert_eq!(values.last().copied(), Some(209.0));
        assert_eq!(buffer.stats().current, 209.0);
    }

    #[test]
    fn test_malformed_payload_dropped() {
        let mut buffer = buffer();
        assert!(buffer.receive_payload(" 512.5 "));
        assert!(!buffer.receive_payload("hello"));
        assert!(!buffer.receive_payload("NaN"));
        buffer.tick();
        assert_eq!(buffer.values(), vec![512.5]);
        assert_eq!(buffer.metrics().malformed, 2);
    }

    #[test]
    fn test_clear_and_export() {
        let mut buffer = buffer();
        for v in [1.0, 2.0, 3.0] {
            buffer.receive(v);
        }
        buffer.tick();
        assert_eq!(buffer.export(), "1\n2\n3");

        buffer.receive(4.0);
        buffer.clear();
        buffer.tick();
        assert!(buffer.values().is_empty());
        assert_eq!(buffer.stats(), Statistics::default());
        assert_eq!(buffer.export(), "");
    }

    #[test]
    fn test_nan_alpha_keeps_level_usable() {
        let mut buffer = ClientStreamBuffer::new(StreamBufferConfig {
            ema_alpha: f64::NAN,
            ..Default::default()
        });
        buffer.receive(600.0);
        buffer.tick();
        assert!(buffer.level().is_finite());
        assert!(buffer.level() > 0.0);
    }

    #[test]
    fn test_derived_exercise_values() {
        let mut buffer = buffer();
        buffer.receive(700.0);
        buffer.tick();
        assert_eq!(buffer.grip_percentage(), 75.0);
        assert!(buffer.is_gripping());
        assert!(buffer.level() > 0.0 && buffer.level() < 75.0);

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.values, vec![700.0]);
        assert!(!snapshot.paused);
    }
}
