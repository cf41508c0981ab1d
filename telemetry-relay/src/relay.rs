/**
 * RELAY CONTROLLER - Pont bus MQTT → store télémétrie → viewers
 *
 * RÔLE :
 * Possède le cycle de vie de l'abonnement (configure / teardown), décode les
 * messages entrants, met à jour le store et diffuse aux viewers.
 *
 * FONCTIONNEMENT :
 * - `lifecycle` (Mutex court) : Idle | Connecting(tentative, annulation) | Active
 * - Connect et fermeture s'exécutent hors verrou ; une tentative n'est installée
 *   que si elle est toujours la tentative courante
 * - Le lien est possédé par une tâche de réception qui le *poll* ; arrêt via oneshot
 * - Tout nouveau connect attend la fermeture complète du lien retiré
 * - Aucun verrou store/statut/lifecycle tenu pendant une I/O réseau
 */

use crate::bus::{BrokerSettings, BusConnector, BusEvent, BusLink};
use crate::contracts::{decode, Telemetry, TopicRoutes};
use crate::error::RelayError;
use crate::health::{LinkStatus, LinkTracker};
use crate::store::TelemetryStore;
use crate::viewers::{
    ConnectRequest, ErrorNotice, InitialState, StatusNotice, ViewerCommand, ViewerEvent, ViewerHub, ViewerId,
    ViewerSession,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Abonnement actif : la tâche de réception et son signal d'arrêt
struct Subscription {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
    routes: TopicRoutes,
}

/// Chemin message → store → viewers, partagé avec la tâche de réception
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<TelemetryStore>,
    hub: ViewerHub,
    link: LinkTracker,
}

impl Pipeline {
    pub fn new(store: Arc<TelemetryStore>, hub: ViewerHub, link: LinkTracker) -> Self {
        Self { store, hub, link }
    }

    /// Traite un message du bus. Retourne l'événement diffusé, `None` si ignoré.
    pub fn handle(&self, routes: &TopicRoutes, topic: &str, payload: &[u8]) -> Option<ViewerEvent> {
        let Some(kind) = routes.kind_of(topic) else {
            debug!(topic, "ignoring message on unrouted topic");
            return None;
        };

        let received_at = OffsetDateTime::now_utc().unix_timestamp();
        let event = match decode(kind, payload, received_at) {
            Ok(Telemetry::Gps(fix)) => {
                let location = self.store.upsert_device(&fix.device_id, fix.lat, fix.lon, fix.timestamp);
                debug!("📍 [GPS] {} at ({:.4}, {:.4})", fix.device_id, fix.lat, fix.lon);
                ViewerEvent::GpsUpdate(location)
            }
            Ok(Telemetry::Rfid(read)) => {
                let scan = self.store.record_scan(
                    &read.device_id,
                    &read.tag_uid,
                    &read.message,
                    read.lat,
                    read.lon,
                    read.timestamp,
                );
                debug!("📡 [RFID] {} scanned {} at ({:.4}, {:.4})", read.device_id, read.tag_uid, read.lat, read.lon);
                ViewerEvent::RfidScan(scan)
            }
            Err(e) => {
                warn!(topic, "dropping {kind} payload: {e}");
                self.link.record_rejected_payload();
                return None;
            }
        };

        self.hub.broadcast(event.clone());
        Some(event)
    }

    fn announce(&self, status: &LinkStatus) {
        self.hub.broadcast(ViewerEvent::MqttStatus(StatusNotice::from_status(status)));
    }
}

/// Fermeture d'un lien retiré, observable par plusieurs attentes
type Retiring = Shared<BoxFuture<'static, ()>>;

enum Phase {
    Idle,
    /// Tentative `attempt` en vol ; `cancel` l'interrompt
    Connecting { attempt: u64, cancel: oneshot::Sender<()> },
    Active(Subscription),
}

struct Lifecycle {
    phase: Phase,
    attempts: u64,
    // dernier lien retiré : tout nouveau connect attend sa fermeture complète
    retiring: Option<Retiring>,
}

impl Lifecycle {
    /// Vide le slot : annule la tentative en vol ou retire l'abonnement actif.
    /// `true` si un abonnement était ouvert.
    fn release(&mut self) -> bool {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => false,
            Phase::Connecting { attempt, cancel } => {
                debug!(attempt, "cancelling connection attempt");
                let _ = cancel.send(());
                false
            }
            Phase::Active(sub) => {
                self.retiring = Some(retire(sub));
                true
            }
        }
    }

    fn is_current(&self, attempt: u64) -> bool {
        matches!(self.phase, Phase::Connecting { attempt: current, .. } if current == attempt)
    }
}

/// Arrête la tâche de réception ; elle ferme le lien d'elle-même
fn retire(sub: Subscription) -> Retiring {
    let Subscription { stop, task, .. } = sub;
    // Err si la tâche s'est déjà arrêtée seule (lien perdu)
    let _ = stop.send(());
    async move {
        if let Err(e) = task.await {
            warn!("receive loop ended abnormally: {e}");
        }
        info!("MQTT subscription closed");
    }
    .boxed()
    .shared()
}

/// Tentative préparée sous le verrou, exécutée hors verrou
struct Attempt {
    id: u64,
    settings: BrokerSettings,
    cancel: oneshot::Receiver<()>,
    prior: Option<Retiring>,
}

pub struct RelayController<C: BusConnector> {
    connector: C,
    pipeline: Pipeline,
    connect_timeout: Duration,
    lifecycle: Mutex<Lifecycle>,
}

pub type SharedRelay<C> = Arc<RelayController<C>>;

impl<C: BusConnector> RelayController<C> {
    pub fn new(connector: C, store: Arc<TelemetryStore>, hub: ViewerHub, connect_timeout: Duration) -> Self {
        Self {
            connector,
            pipeline: Pipeline::new(store, hub, LinkTracker::new()),
            connect_timeout,
            lifecycle: Mutex::new(Lifecycle { phase: Phase::Idle, attempts: 0, retiring: None }),
        }
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.pipeline.store
    }

    pub fn hub(&self) -> &ViewerHub {
        &self.pipeline.hub
    }

    pub fn link(&self) -> &LinkTracker {
        &self.pipeline.link
    }

    pub fn is_connected(&self) -> bool {
        self.pipeline.link.is_connected()
    }

    pub fn initial_state(&self) -> InitialState {
        let snapshot = self.pipeline.store.snapshot();
        InitialState {
            devices: snapshot.devices,
            rfid_scans: snapshot.scans,
            connected: self.pipeline.link.is_connected(),
        }
    }

    /// Nouveau viewer : reçoit d'abord l'état courant, puis les diffusions
    pub fn attach_viewer(&self) -> ViewerSession {
        self.pipeline.hub.attach(|| ViewerEvent::InitialState(self.initial_state()))
    }

    pub fn detach_viewer(&self, session: &ViewerSession) {
        self.pipeline.hub.detach(session.id);
    }

    /// Topics de l'abonnement actif
    pub fn current_routes(&self) -> Option<TopicRoutes> {
        match &self.lifecycle.lock().phase {
            Phase::Active(sub) => Some(sub.routes.clone()),
            _ => None,
        }
    }

    /// (Re)configure l'abonnement. L'ancien lien est entièrement fermé avant la connexion.
    /// L'erreur est destinée au seul demandeur ; le changement de statut est diffusé.
    /// Un teardown ou un configure concurrent annule la tentative (`Cancelled`).
    pub async fn configure(&self, request: &ConnectRequest) -> Result<(), RelayError> {
        let Attempt { id, settings, mut cancel, prior } = self.begin(request)?;

        let connect = async {
            if let Some(prior) = prior {
                prior.await;
            }
            info!(host = %settings.host, port = settings.port, "connecting to MQTT broker");
            tokio::time::timeout(self.connect_timeout, self.connector.connect(&settings)).await
        };

        let outcome = tokio::select! {
            biased;
            _ = &mut cancel => None,
            outcome = connect => Some(outcome),
        };

        let link = match outcome {
            None => {
                info!(attempt = id, "connection attempt cancelled");
                return Err(RelayError::Cancelled);
            }
            Some(Ok(Ok(link))) => link,
            Some(Ok(Err(e))) => return Err(self.fail_attempt(id, e)),
            Some(Err(_)) => return Err(self.fail_attempt(id, RelayError::ConnectTimeout(self.connect_timeout))),
        };

        match self.install(id, link, settings.routes) {
            Ok(()) => Ok(()),
            Err(mut stale) => {
                // remplacée entre le connect et l'installation
                stale.close().await;
                Err(RelayError::Cancelled)
            }
        }
    }

    /// Commande reçue d'un viewer ; un échec de connexion n'est renvoyé qu'à lui
    pub async fn handle_command(&self, viewer: ViewerId, command: ViewerCommand) {
        match command {
            ViewerCommand::ConnectMqtt(request) => {
                info!(viewer, broker = %request.broker, "connect MQTT requested");
                if let Err(e) = self.configure(&request).await {
                    self.pipeline.hub.send_to(
                        viewer,
                        ViewerEvent::MqttError(ErrorNotice { error: format!("Failed to connect to broker: {e}") }),
                    );
                }
            }
            ViewerCommand::DisconnectMqtt => {
                info!(viewer, "disconnect MQTT requested");
                self.teardown().await;
            }
        }
    }

    /// Ferme l'abonnement ou annule la tentative en cours. Idempotent ;
    /// `true` si le statut a changé. Retourne une fois le lien fermé.
    pub async fn teardown(&self) -> bool {
        let (changed, retiring) = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.release();
            (self.settle_disconnected(), lifecycle.retiring.clone())
        };
        if let Some(retiring) = retiring {
            retiring.await;
        }
        changed
    }

    // Étapes synchrones sous verrou : jamais d'I/O réseau ici

    fn begin(&self, request: &ConnectRequest) -> Result<Attempt, RelayError> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.release() {
            self.settle_disconnected();
        }

        let routes = TopicRoutes::new(request.gps_topic.clone(), request.rfid_topic.clone());
        let settings = BrokerSettings::parse(
            &request.broker,
            routes,
            request.username.clone(),
            request.password.clone(),
        )
        .map_err(|e| self.fail(e))?;

        lifecycle.attempts += 1;
        let id = lifecycle.attempts;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        lifecycle.phase = Phase::Connecting { attempt: id, cancel: cancel_tx };
        self.pipeline.link.mark_connecting();

        Ok(Attempt { id, settings, cancel: cancel_rx, prior: lifecycle.retiring.clone() })
    }

    /// Publie `connected` et démarre la réception si la tentative est toujours courante.
    /// Sinon rend le lien à l'appelant pour fermeture.
    fn install(&self, attempt: u64, link: C::Link, routes: TopicRoutes) -> Result<(), C::Link> {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.is_current(attempt) {
            return Err(link);
        }

        // statut publié AVANT le démarrage de la tâche : une perte immédiate
        // du lien ne peut pas être écrasée par ce "connected"
        let generation = self.pipeline.link.mark_connected();
        self.pipeline.announce(&LinkStatus::Connected);
        info!(gps = %routes.gps, rfid = %routes.rfid, "✅ MQTT subscribed");

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(receive_loop(link, routes.clone(), self.pipeline.clone(), generation, stop_rx));
        lifecycle.phase = Phase::Active(Subscription { stop: stop_tx, task, routes });
        Ok(())
    }

    fn fail_attempt(&self, attempt: u64, error: RelayError) -> RelayError {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.is_current(attempt) {
            debug!(attempt, "superseded attempt failed: {error}");
            return error;
        }
        lifecycle.phase = Phase::Idle;
        self.fail(error)
    }

    fn settle_disconnected(&self) -> bool {
        if self.pipeline.link.mark_disconnected() {
            self.pipeline.announce(&LinkStatus::Disconnected);
            true
        } else {
            false
        }
    }

    fn fail(&self, error: RelayError) -> RelayError {
        warn!("❌ MQTT connection error: {error}");
        let status = LinkStatus::Error(error.to_string());
        self.pipeline.link.mark_failed(error.to_string());
        self.pipeline.announce(&status);
        error
    }
}

async fn receive_loop<L: BusLink>(
    mut link: L,
    routes: TopicRoutes,
    pipeline: Pipeline,
    generation: u64,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => {
                link.close().await;
                debug!(generation, "receive loop stopped");
                return;
            }
            event = link.next_event() => match event {
                BusEvent::Message { topic, payload } => {
                    pipeline.handle(&routes, &topic, &payload);
                }
                BusEvent::Closed { reason } => {
                    let reason = reason.unwrap_or_else(|| "connection lost".to_string());
                    warn!("⚠️ unexpected MQTT disconnection: {reason}");
                    if pipeline.link.mark_lost(generation, &reason) {
                        pipeline.announce(&LinkStatus::Error(reason));
                    }
                    return;
                }
            }
        }
    }
}
