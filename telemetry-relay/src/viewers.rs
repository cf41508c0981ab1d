/**
 * VIEWERS HUB - Fan-out des événements vers les viewers connectés
 *
 * RÔLE :
 * Chaque viewer (session WebSocket) possède sa propre file bornée.
 * Le relais pousse avec `try_send` : jamais d'attente sur un viewer lent.
 *
 * FONCTIONNEMENT :
 * - File pleine ou fermée → le viewer est élagué (sa session se termine)
 * - `attach` enfile l'état initial sous le verrou d'écriture : aucun broadcast
 *   ne peut passer devant lui
 * - Ordre des verrous : hub puis store/link, jamais l'inverse
 */

use crate::health::LinkStatus;
use crate::models::{DeviceLocation, ScanEvent};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

pub type ViewerId = u64;

/// Événements poussés aux viewers : `{"event": "...", "data": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ViewerEvent {
    InitialState(InitialState),
    GpsUpdate(DeviceLocation),
    RfidScan(ScanEvent),
    MqttStatus(StatusNotice),
    /// Réponse à un `connect_mqtt` raté, envoyée au seul demandeur
    MqttError(ErrorNotice),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialState {
    pub devices: Vec<DeviceLocation>,
    pub rfid_scans: Vec<ScanEvent>,
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusNotice {
    pub status: String, // connected | disconnected | error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusNotice {
    pub fn from_status(status: &LinkStatus) -> Self {
        match status {
            LinkStatus::Connected => Self { status: "connected".into(), error: None },
            LinkStatus::Error(e) => Self { status: "error".into(), error: Some(e.clone()) },
            // Connecting n'est pas annoncé aux viewers
            LinkStatus::Disconnected | LinkStatus::Connecting => {
                Self { status: "disconnected".into(), error: None }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub error: String,
}

/// Commandes envoyées par un viewer, même enveloppe que les événements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ViewerCommand {
    ConnectMqtt(ConnectRequest),
    DisconnectMqtt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub broker: String,
    pub gps_topic: String,
    pub rfid_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Côté réception d'un viewer attaché
#[derive(Debug)]
pub struct ViewerSession {
    pub id: ViewerId,
    pub events: mpsc::Receiver<ViewerEvent>,
}

#[derive(Clone)]
pub struct ViewerHub {
    viewers: Arc<RwLock<HashMap<ViewerId, mpsc::Sender<ViewerEvent>>>>,
    next_id: Arc<AtomicU64>,
    queue_depth: usize,
}

impl ViewerHub {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            viewers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Enregistre un viewer ; `initial` est évalué sous le verrou d'écriture
    pub fn attach(&self, initial: impl FnOnce() -> ViewerEvent) -> ViewerSession {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut viewers = self.viewers.write();
        // file neuve de capacité >= 1 : ne peut pas échouer
        let _ = tx.try_send(initial());
        viewers.insert(id, tx);
        debug!(viewer = id, total = viewers.len(), "viewer attached");

        ViewerSession { id, events: rx }
    }

    pub fn detach(&self, id: ViewerId) {
        if self.viewers.write().remove(&id).is_some() {
            debug!(viewer = id, "viewer detached");
        }
    }

    /// Diffusion best-effort. Retourne le nombre de viewers servis.
    pub fn broadcast(&self, event: ViewerEvent) -> usize {
        let mut stale = Vec::new();
        let mut delivered = 0;
        {
            let viewers = self.viewers.read();
            for (id, tx) in viewers.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => stale.push(*id),
                }
            }
        }
        if !stale.is_empty() {
            self.prune(&stale);
        }
        delivered
    }

    pub fn send_to(&self, id: ViewerId, event: ViewerEvent) -> bool {
        let sent = match self.viewers.read().get(&id) {
            Some(tx) => tx.try_send(event).is_ok(),
            None => return false,
        };
        if !sent {
            self.prune(&[id]);
        }
        sent
    }

    pub fn len(&self) -> usize {
        self.viewers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune(&self, ids: &[ViewerId]) {
        let mut viewers = self.viewers.write();
        for id in ids {
            if viewers.remove(id).is_some() {
                debug!(viewer = id, "viewer pruned (queue full or closed)");
            }
        }
    }
}
