use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// État de l'abonnement MQTT
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl LinkStatus {
    pub fn label(&self) -> &'static str {
        match self {
            LinkStatus::Disconnected => "disconnected",
            LinkStatus::Connecting => "connecting",
            LinkStatus::Connected => "connected",
            LinkStatus::Error(_) => "error",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelayHealth {
    pub uptime_seconds: u64,
    pub mqtt_status: String,
    pub mqtt_error: Option<String>,
    pub mqtt_connects: u32,
    pub mqtt_unexpected_drops: u32,
    pub rejected_payloads: u64,
}

#[derive(Debug)]
struct LinkState {
    status: LinkStatus,
    // incrémentée à chaque connexion/teardown : une tâche de réception
    // périmée ne peut plus modifier le statut
    generation: u64,
}

/// Statut de l'abonnement + compteurs. Le verrou n'est jamais tenu pendant une I/O.
#[derive(Clone)]
pub struct LinkTracker {
    start_time: Instant,
    state: Arc<Mutex<LinkState>>,
    connects: Arc<AtomicU32>,
    unexpected_drops: Arc<AtomicU32>,
    rejected_payloads: Arc<AtomicU64>,
}

impl LinkTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            state: Arc::new(Mutex::new(LinkState { status: LinkStatus::Disconnected, generation: 0 })),
            connects: Arc::new(AtomicU32::new(0)),
            unexpected_drops: Arc::new(AtomicU32::new(0)),
            rejected_payloads: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.state.lock().status.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().status == LinkStatus::Connected
    }

    pub fn mark_connecting(&self) {
        self.state.lock().status = LinkStatus::Connecting;
    }

    /// Retourne la génération de la nouvelle session
    pub fn mark_connected(&self) -> u64 {
        let mut state = self.state.lock();
        state.generation += 1;
        state.status = LinkStatus::Connected;
        self.connects.fetch_add(1, Ordering::Relaxed);
        state.generation
    }

    pub fn mark_failed(&self, error: impl Into<String>) {
        self.state.lock().status = LinkStatus::Error(error.into());
    }

    /// Perte inattendue signalée par la tâche de réception `generation`.
    /// Ignorée si un teardown/reconnect est passé entre-temps.
    pub fn mark_lost(&self, generation: u64, reason: &str) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation || state.status != LinkStatus::Connected {
            return false;
        }
        state.status = LinkStatus::Error(reason.to_string());
        self.unexpected_drops.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// true si le statut a effectivement changé
    pub fn mark_disconnected(&self) -> bool {
        let mut state = self.state.lock();
        state.generation += 1;
        if state.status == LinkStatus::Disconnected {
            return false;
        }
        state.status = LinkStatus::Disconnected;
        true
    }

    pub fn record_rejected_payload(&self) {
        self.rejected_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self) -> RelayHealth {
        let status = self.status();
        RelayHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            mqtt_status: status.label().to_string(),
            mqtt_error: match status {
                LinkStatus::Error(e) => Some(e),
                _ => None,
            },
            mqtt_connects: self.connects.load(Ordering::Relaxed),
            mqtt_unexpected_drops: self.unexpected_drops.load(Ordering::Relaxed),
            rejected_payloads: self.rejected_payloads.load(Ordering::Relaxed),
        }
    }
}

impl Default for LinkTracker {
    fn default() -> Self {
        Self::new()
    }
}
