/*!
Test Harness pour le relais

Assemble un `RelayController` branché sur le bus simulé et un viewer attaché :
- `connect` / `publish_*` pour piloter le bus
- `next_event` / `drain` pour observer ce que reçoit le viewer
Les attentes sont bornées dans le temps pour ne jamais bloquer un test.
*/

use crate::mqtt_stub::FakeConnector;
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use telemetry_relay::viewers::{ConnectRequest, InitialState};
use telemetry_relay::{RelayController, SharedRelay, TelemetryStore, ViewerEvent, ViewerHub, ViewerSession};
use tokio::time::timeout;

pub const GPS_TOPIC: &str = "devices/gps";
pub const RFID_TOPIC: &str = "devices/rfid";

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TestHarness {
    pub bus: FakeConnector,
    pub relay: SharedRelay<FakeConnector>,
    pub viewer: ViewerSession,
    /// État initial reçu par `viewer` à l'attachement
    pub initial: Option<InitialState>,
}

impl TestHarness {
    /// Harness avec la capacité par défaut (100 scans)
    pub fn new() -> Self {
        Self::with_capacity(telemetry_relay::store::DEFAULT_MAX_SCANS)
    }

    pub fn with_capacity(max_scans: usize) -> Self {
        Self::build(max_scans, Duration::from_secs(10))
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self::build(telemetry_relay::store::DEFAULT_MAX_SCANS, connect_timeout)
    }

    fn build(max_scans: usize, connect_timeout: Duration) -> Self {
        env_logger::try_init().ok(); // Init logging pour tests

        let bus = FakeConnector::new();
        let relay = Arc::new(RelayController::new(
            bus.clone(),
            Arc::new(TelemetryStore::new(max_scans)),
            ViewerHub::new(1024),
            connect_timeout,
        ));
        let mut viewer = relay.attach_viewer();
        let initial = match viewer.events.try_recv() {
            Ok(ViewerEvent::InitialState(state)) => Some(state),
            _ => None,
        };
        Self { bus, relay, viewer, initial }
    }

    /// Requête connect_mqtt vers `broker` sur les topics par défaut
    pub fn request<S: Into<String>>(broker: S) -> ConnectRequest {
        ConnectRequest {
            broker: broker.into(),
            gps_topic: GPS_TOPIC.into(),
            rfid_topic: RFID_TOPIC.into(),
            username: None,
            password: None,
        }
    }

    /// Connecte le relais au bus simulé et consomme le statut `connected`
    pub async fn connect(&mut self) -> Result<()> {
        self.relay.configure(&Self::request("mqtt://fake-broker")).await?;
        match self.next_event().await? {
            ViewerEvent::MqttStatus(notice) if notice.status == "connected" => Ok(()),
            other => anyhow::bail!("expected connected status, got {:?}", other),
        }
    }

    pub fn publish_gps(&self, payload: &Value) -> bool {
        self.bus.publish_json(GPS_TOPIC, payload)
    }

    pub fn publish_rfid(&self, payload: &Value) -> bool {
        self.bus.publish_json(RFID_TOPIC, payload)
    }

    /// Prochain événement du viewer (erreur après 2s)
    pub async fn next_event(&mut self) -> Result<ViewerEvent> {
        match timeout(EVENT_TIMEOUT, self.viewer.events.recv()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => anyhow::bail!("viewer queue closed"),
            Err(_) => anyhow::bail!("no viewer event within {:?}", EVENT_TIMEOUT),
        }
    }

    /// Événements déjà en file, sans attendre
    pub fn drain(&mut self) -> Vec<ViewerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.viewer.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Attache un viewer supplémentaire
    pub fn attach_viewer(&self) -> ViewerSession {
        self.relay.attach_viewer()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
