use crate::types::{Reading, ReadingSink, ServerEvent, SessionId};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default outbound queue depth per session
const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Server-side state of one connected consumer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub connected_at: DateTime<Utc>,
    pub last_value: Option<Reading>,
    pub delivered: u64,
    pub dropped: u64,
}

struct SessionEntry {
    info: SessionInfo,
    sender: mpsc::Sender<ServerEvent>,
}

/// Receiving end handed to the connection task that owns a session
pub struct SessionHandle {
    pub id: SessionId,
    pub receiver: mpsc::Receiver<ServerEvent>,
}

/// Fans each throttled reading out to every connected session.
///
/// Each session gets its own bounded FIFO queue, so ordering holds per
/// session and a slow or dead consumer only loses its own events.
#[derive(Clone)]
pub struct Broadcaster {
    sessions: Arc<RwLock<HashMap<SessionId, SessionEntry>>>,
    queue_depth: usize,
    emitted: Arc<AtomicU64>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_queue_depth(DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_queue_depth(queue_depth: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            queue_depth: queue_depth.max(1),
            emitted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a new session
    pub fn connect(&self) -> SessionHandle {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(self.queue_depth);
        let info = SessionInfo {
            session_id: id,
            connected_at: Utc::now(),
            last_value: None,
            delivered: 0,
            dropped: 0,
        };

        let mut sessions = self.sessions.write();
        sessions.insert(id, SessionEntry { info, sender });
        info!("Session {} connected ({} active)", id, sessions.len());

        SessionHandle { id, receiver }
    }

    /// Remove a session. Nothing is queued for it after this returns.
    pub fn disconnect(&self, id: &SessionId) -> bool {
        let mut sessions = self.sessions.write();
        let removed = sessions.remove(id).is_some();
        if removed {
            info!("Session {} disconnected ({} active)", id, sessions.len());
        }
        removed
    }

    /// Deliver a reading to every connected session. Returns how many
    /// sessions accepted it.
    pub fn broadcast(&self, value: Reading) -> usize {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        let event = ServerEvent::sensor_data(value);
        self.fan_out(&event, Some(value))
    }

    /// Deliver a non-reading event (status, error) to every session
    pub fn notify(&self, event: ServerEvent) -> usize {
        self.fan_out(&event, None)
    }

    /// Queue an event for a single session
    pub fn send_to(&self, id: &SessionId, event: ServerEvent) -> bool {
        match self.sessions.read().get(id) {
            Some(entry) => entry.sender.try_send(event).is_ok(),
            None => false,
        }
    }

    fn fan_out(&self, event: &ServerEvent, value: Option<Reading>) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let mut sessions = self.sessions.write();
            for (id, entry) in sessions.iter_mut() {
                match entry.sender.try_send(event.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        entry.info.delivered += 1;
                        if value.is_some() {
                            entry.info.last_value = value;
                        }
                    }
                    Err(TrySendError::Full(_)) => {
                        entry.info.dropped += 1;
                        debug!("Session {} queue full, event dropped", id);
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }

            for id in &closed {
                sessions.remove(id);
            }
        }

        for id in closed {
            warn!("Session {} receiver gone, removed", id);
        }

        delivered
    }

    pub fn is_connected(&self, id: &SessionId) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn session(&self, id: &SessionId) -> Option<SessionInfo> {
        self.sessions.read().get(id).map(|entry| entry.info.clone())
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .values()
            .map(|entry| entry.info.clone())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Total readings broadcast since startup
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingSink for Broadcaster {
    fn publish(&self, value: Reading) {
        self.broadcast(value);
    }
}
