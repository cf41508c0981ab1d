/**
 * TELEMETRY RELAY - Point d'entrée du serveur
 *
 * RÔLE : Bootstrap config, logs, store, contrôleur MQTT et serveur HTTP/WebSocket.
 * L'abonnement MQTT est ouvert par un viewer (connect_mqtt) ou par `autoconnect`.
 */

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use telemetry_relay::config::load_config;
use telemetry_relay::http::{self, AppState};
use telemetry_relay::mqtt::MqttConnector;
use telemetry_relay::viewers::ConnectRequest;
use telemetry_relay::{RelayController, SharedRelay, TelemetryStore, ViewerHub};
use time::UtcOffset;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("telemetry_relay=info")),
        )
        .init();

    // fuseau local lu avant le démarrage du runtime multi-thread (refusé ensuite par `time`)
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(run(offset))
}

async fn run(offset: UtcOffset) -> Result<()> {
    let cfg = load_config().await;

    let store = Arc::new(TelemetryStore::with_offset(cfg.store.max_scans, offset));
    let hub = ViewerHub::new(cfg.viewers.queue_depth);
    let relay: SharedRelay<MqttConnector> = Arc::new(RelayController::new(
        MqttConnector::new(&cfg.mqtt),
        store,
        hub,
        Duration::from_secs(cfg.mqtt.connect_timeout_secs),
    ));
    info!(max_scans = cfg.store.max_scans, "telemetry store ready");

    if let Some(auto) = cfg.autoconnect.clone() {
        let relay = relay.clone();
        tokio::spawn(async move {
            let request = ConnectRequest {
                broker: auto.broker,
                gps_topic: auto.gps_topic,
                rfid_topic: auto.rfid_topic,
                username: auto.username,
                password: auto.password,
            };
            if let Err(e) = relay.configure(&request).await {
                error!("autoconnect failed: {e}");
            }
        });
    }

    let app = http::build_router(AppState {
        relay: relay.clone(),
        query_scan_limit: cfg.store.query_scan_limit,
    });

    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    info!("listening on http://{}", cfg.http.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    relay.teardown().await;
    info!("relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
