// Ingest throttler
//
// Readings arrive at hardware rate (potentially >1kHz). They land in a
// single-slot mailbox that each new arrival overwrites, and a periodic task
// emits whatever the slot holds once per interval. Superseded readings are
// dropped on purpose: there is no queue and no backpressure.

use crate::ticker::spawn_periodic;
use crate::types::{Reading, ReadingSink, StreamError, StreamResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Holds at most one pending reading. Memory use is O(1) regardless of the
/// arrival rate.
#[derive(Debug, Default)]
pub struct ThrottleSlot {
    pending: Mutex<Option<Reading>>,
}

impl ThrottleSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, returning true if an unsent reading was overwritten
    pub fn put(&self, value: Reading) -> bool {
        self.pending.lock().replace(value).is_some()
    }

    /// Take the pending reading, leaving the slot empty
    pub fn take(&self) -> Option<Reading> {
        self.pending.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_none()
    }

    pub fn clear(&self) {
        self.pending.lock().take();
    }
}

/// Counters for the throttler
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ThrottleMetrics {
    pub submitted: u64,
    pub superseded: u64,
    pub emitted: u64,
}

struct Running {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Rate-limits readings to at most one emission per interval, latest wins.
pub struct IngestThrottler {
    slot: Arc<ThrottleSlot>,
    interval: Duration,
    submitted: AtomicU64,
    superseded: AtomicU64,
    emitted: Arc<AtomicU64>,
    running: Mutex<Option<Running>>,
}

impl IngestThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            slot: Arc::new(ThrottleSlot::new()),
            interval,
            submitted: AtomicU64::new(0),
            superseded: AtomicU64::new(0),
            emitted: Arc::new(AtomicU64::new(0)),
            running: Mutex::new(None),
        }
    }

    /// Store a reading for the next tick, discarding any unsent one
    pub fn submit(&self, value: Reading) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        if self.slot.put(value) {
            self.superseded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Run one tick by hand: take the slot and emit it to `sink` if present
    pub fn tick(&self, sink: &dyn ReadingSink) -> Option<Reading> {
        emit_pending(&self.slot, &self.emitted, sink)
    }

    /// Drop any reading waiting for the next tick
    pub fn clear(&self) {
        self.slot.clear();
    }

    /// Start the periodic emission task
    pub fn start(&self, sink: Arc<dyn ReadingSink>) -> StreamResult<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(StreamError::AlreadyRunning);
        }

        info!("Starting ingest throttler ({:?} interval)", self.interval);

        let cancel_token = CancellationToken::new();
        let slot = Arc::clone(&self.slot);
        let emitted = Arc::clone(&self.emitted);
        let handle = spawn_periodic(self.interval, cancel_token.clone(), move || {
            emit_pending(&slot, &emitted, sink.as_ref());
        });

        *running = Some(Running {
            cancel_token,
            handle,
        });
        Ok(())
    }

    /// Stop the emission task and wait for it to finish
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(running) = running {
            running.cancel_token.cancel();
            let _ = running.handle.await;
            info!("Ingest throttler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn metrics(&self) -> ThrottleMetrics {
        ThrottleMetrics {
            submitted: self.submitted.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
        }
    }
}

impl ReadingSink for IngestThrottler {
    fn publish(&self, value: Reading) {
        self.submit(value);
    }
}

impl Drop for IngestThrottler {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel_token.cancel();
        }
    }
}

fn emit_pending(slot: &ThrottleSlot, emitted: &AtomicU64, sink: &dyn ReadingSink) -> Option<Reading> {
    let value = slot.take()?;
    emitted.fetch_add(1, Ordering::Relaxed);
    debug!("Throttled emit: {}", value);
    sink.publish(value);
    Some(value)
}
