/*!
Bus MQTT simulé pour tester le relais sans broker

`FakeConnector` implémente `BusConnector` : chaque `connect` ouvre un lien en
mémoire alimenté par `publish`. Tous les appels connect/close sont journalisés
dans l'ordre, ce qui permet de vérifier qu'un abonnement est fermé avant le suivant.
*/

use serde_json::Value;
use std::sync::{Arc, Mutex};
use telemetry_relay::{BrokerSettings, BusConnector, BusEvent, BusLink, RelayError};
use tokio::sync::mpsc;

/// Entrée du journal des appels au transport
#[derive(Debug, Clone, PartialEq)]
pub enum BusCall {
    Connect {
        host: String,
        port: u16,
        gps_topic: String,
        rfid_topic: String,
        username: Option<String>,
    },
    Close {
        host: String,
    },
}

#[derive(Default)]
struct FakeState {
    journal: Vec<BusCall>,
    fail_next: Option<String>,
    hang_next: bool,
    active: Option<mpsc::UnboundedSender<BusEvent>>,
}

/// Connecteur en mémoire, clonable (les clones partagent le même bus)
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

pub struct FakeLink {
    events: mpsc::UnboundedReceiver<BusEvent>,
    state: Arc<Mutex<FakeState>>,
    host: String,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Le prochain `connect` échoue avec ce motif
    pub fn fail_next_connect<S: Into<String>>(&self, reason: S) {
        self.state.lock().unwrap().fail_next = Some(reason.into());
    }

    /// Le prochain `connect` ne répond jamais (pour tester le timeout)
    pub fn hang_next_connect(&self) {
        self.state.lock().unwrap().hang_next = true;
    }

    /// Journal des appels connect/close dans l'ordre
    pub fn journal(&self) -> Vec<BusCall> {
        self.state.lock().unwrap().journal.clone()
    }

    pub fn is_linked(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .active
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Simule la réception d'un message ; `false` si aucun lien actif
    pub fn publish<S, V>(&self, topic: S, payload: V) -> bool
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let event = BusEvent::Message { topic: topic.into(), payload: payload.into() };
        self.send(event)
    }

    pub fn publish_json<S: Into<String>>(&self, topic: S, payload: &Value) -> bool {
        self.publish(topic, payload.to_string().into_bytes())
    }

    /// Simule une coupure réseau non sollicitée
    pub fn drop_link<S: Into<String>>(&self, reason: S) -> bool {
        let sent = self.send(BusEvent::Closed { reason: Some(reason.into()) });
        if sent {
            log::info!("🔌 [FAKE] link dropped");
        }
        sent
    }

    fn send(&self, event: BusEvent) -> bool {
        match self.state.lock().unwrap().active.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

impl BusConnector for FakeConnector {
    type Link = FakeLink;

    async fn connect(&self, settings: &BrokerSettings) -> Result<FakeLink, RelayError> {
        let (fail, hang) = {
            let mut state = self.state.lock().unwrap();
            state.journal.push(BusCall::Connect {
                host: settings.host.clone(),
                port: settings.port,
                gps_topic: settings.routes.gps.clone(),
                rfid_topic: settings.routes.rfid.clone(),
                username: settings.credentials.as_ref().map(|c| c.username.clone()),
            });
            (state.fail_next.take(), std::mem::take(&mut state.hang_next))
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(reason) = fail {
            log::info!("❌ [FAKE] connect to {} refused: {}", settings.host, reason);
            return Err(RelayError::Connect(reason));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().active = Some(tx);
        log::info!("📥 [FAKE] connected to {}:{}", settings.host, settings.port);

        Ok(FakeLink { events: rx, state: self.state.clone(), host: settings.host.clone() })
    }
}

impl BusLink for FakeLink {
    async fn next_event(&mut self) -> BusEvent {
        match self.events.recv().await {
            Some(event) => event,
            None => BusEvent::Closed { reason: Some("fake transport gone".into()) },
        }
    }

    async fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.journal.push(BusCall::Close { host: self.host.clone() });
        state.active = None;
        log::info!("📤 [FAKE] closed link to {}", self.host);
    }
}
