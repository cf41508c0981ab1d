/**
 * API HTTP + WEBSOCKET - Surface viewers du relais
 *
 * RÔLE :
 * - /ws : session viewer temps réel (initial_state, gps_update, rfid_scan, mqtt_status)
 *   et commandes connect_mqtt / disconnect_mqtt
 * - /api/devices, /api/rfid-scans, /api/stats : lectures ponctuelles du store
 * - /health, /system/health : supervision
 *
 * FONCTIONNEMENT :
 * - Trames JSON `{"event": ..., "data": ...}` dans les deux sens
 * - Par viewer : une tâche d'envoi (file du hub → socket), une tâche de lecture,
 *   et un worker de commandes séquentiel qui survit à la fermeture du socket
 *   (un configure en cours n'est jamais annulé à mi-chemin)
 */

use crate::bus::BusConnector;
use crate::health::RelayHealth;
use crate::models::{DeviceLocation, ScanEvent};
use crate::relay::SharedRelay;
use crate::viewers::{ViewerCommand, ViewerId};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::{routing::get, Json, Router};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct AppState<C: BusConnector> {
    pub relay: SharedRelay<C>,
    pub query_scan_limit: usize,
}

impl<C: BusConnector> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self { relay: self.relay.clone(), query_scan_limit: self.query_scan_limit }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DevicesView {
    pub devices: Vec<DeviceLocation>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScansView {
    pub scans: Vec<ScanEvent>,
    pub count: usize, // taille de la fenêtre complète, pas du préfixe renvoyé
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsView {
    pub active_devices: usize,
    pub total_scans: usize,
    pub connected: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemHealth {
    #[serde(flatten)]
    pub link: RelayHealth,
    pub viewers: usize,
    pub devices_tracked: usize,
    pub scans_held: usize,
    pub scan_capacity: usize,
}

#[derive(Debug, Deserialize, Default)]
pub struct ScansParams {
    pub limit: Option<usize>,
}

pub fn build_router<C: BusConnector>(app_state: AppState<C>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health::<C>))
        .route("/ws", get(ws_handler::<C>))
        .route("/api/devices", get(get_devices::<C>))
        .route("/api/rfid-scans", get(get_rfid_scans::<C>))
        .route("/api/stats", get(get_stats::<C>))
        .with_state(app_state)
}

// GET /api/devices
pub async fn get_devices<C: BusConnector>(State(app): State<AppState<C>>) -> Json<DevicesView> {
    let devices = app.relay.store().snapshot_devices();
    let count = devices.len();
    Json(DevicesView { devices, count })
}

// GET /api/rfid-scans?limit=N
pub async fn get_rfid_scans<C: BusConnector>(
    State(app): State<AppState<C>>,
    Query(params): Query<ScansParams>,
) -> Json<ScansView> {
    let limit = params.limit.unwrap_or(app.query_scan_limit);
    let store = app.relay.store();
    let snapshot = store.snapshot_scans();
    let count = snapshot.len();
    let scans = snapshot.into_iter().take(limit).collect();
    Json(ScansView { scans, count })
}

// GET /api/stats
pub async fn get_stats<C: BusConnector>(State(app): State<AppState<C>>) -> Json<StatsView> {
    let store = app.relay.store();
    Json(StatsView {
        active_devices: store.device_count(),
        total_scans: store.scan_count(),
        connected: app.relay.is_connected(),
    })
}

// GET /system/health
pub async fn get_system_health<C: BusConnector>(State(app): State<AppState<C>>) -> Json<SystemHealth> {
    let store = app.relay.store();
    Json(SystemHealth {
        link: app.relay.link().get_health(),
        viewers: app.relay.hub().len(),
        devices_tracked: store.device_count(),
        scans_held: store.scan_count(),
        scan_capacity: store.max_scans(),
    })
}

async fn ws_handler<C: BusConnector>(ws: WebSocketUpgrade, State(app): State<AppState<C>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

async fn handle_socket<C: BusConnector>(socket: WebSocket, app: AppState<C>) {
    let (mut sender, mut receiver) = socket.split();
    let session = app.relay.attach_viewer();
    let viewer_id = session.id;
    let mut events = session.events;
    info!(viewer = viewer_id, "✅ [WebSocket] viewer connected");

    // file du hub → socket ; se termine quand le hub élague ce viewer
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!("failed to encode viewer event: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                debug!("WebSocket send failed, viewer gone");
                break;
            }
        }
    });

    let (cmd_tx, cmd_rx) = mpsc::channel::<ViewerCommand>(8);
    tokio::spawn(run_commands(app.relay.clone(), viewer_id, cmd_rx));

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ViewerCommand>(text.as_str()) {
                    Ok(command) => {
                        if cmd_tx.send(command).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("ignoring viewer frame: {e}"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    app.relay.hub().detach(viewer_id);
    info!(viewer = viewer_id, "[WebSocket] viewer disconnected");
}

async fn run_commands<C: BusConnector>(
    relay: SharedRelay<C>,
    viewer: ViewerId,
    mut commands: mpsc::Receiver<ViewerCommand>,
) {
    while let Some(command) = commands.recv().await {
        relay.handle_command(viewer, command).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MqttConf;
    use crate::mqtt::MqttConnector;
    use crate::relay::RelayController;
    use crate::store::TelemetryStore;
    use crate::viewers::ViewerHub;
    use std::sync::Arc;
    use std::time::Duration;

    fn app(max_scans: usize) -> AppState<MqttConnector> {
        let relay = RelayController::new(
            MqttConnector::new(&MqttConf::default()),
            Arc::new(TelemetryStore::new(max_scans)),
            ViewerHub::new(8),
            Duration::from_secs(1),
        );
        AppState { relay: Arc::new(relay), query_scan_limit: 2 }
    }

    #[tokio::test]
    async fn test_scan_query_truncates_but_counts_window() {
        let app = app(3);
        for i in 0..5 {
            app.relay.store().record_scan("device_001", &format!("tag_{i}"), "pkg", 1.0, 2.0, i);
        }

        let Json(view) = get_rfid_scans(State(app.clone()), Query(ScansParams::default())).await;
        assert_eq!(view.count, 3);
        assert_eq!(view.scans.len(), 2);
        assert_eq!(view.scans[0].tag_uid, "tag_4");

        let Json(view) = get_rfid_scans(State(app.clone()), Query(ScansParams { limit: Some(10) })).await;
        assert_eq!(view.scans.len(), 3);

        let Json(health) = get_system_health(State(app)).await;
        assert_eq!((health.scans_held, health.scan_capacity), (3, 3));
        assert_eq!(health.link.mqtt_status, "disconnected");
    }

    #[tokio::test]
    async fn test_stats_and_devices_on_idle_relay() {
        let app = app(10);
        app.relay.store().upsert_device("device_002", 28.6139, 77.2090, 1);

        let Json(stats) = get_stats(State(app.clone())).await;
        assert_eq!((stats.active_devices, stats.total_scans, stats.connected), (1, 0, false));

        let Json(devices) = get_devices(State(app.clone())).await;
        assert_eq!(devices.count, 1);

        let _router = build_router(app);
    }
}
