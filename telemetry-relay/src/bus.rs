//! Interface entre le relais et le transport pub/sub.
//!
//! Le relais ne connaît le broker qu'à travers `BusConnector` / `BusLink` :
//! `mqtt.rs` fournit l'implémentation rumqttc, le devkit une version en mémoire.
//! Le lien est consommé par *polling* (`next_event`) depuis la tâche de réception
//! du contrôleur, jamais via des callbacks.

use crate::contracts::TopicRoutes;
use crate::error::RelayError;
use std::future::Future;

pub const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Paramètres complets d'un abonnement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub routes: TopicRoutes,
    pub credentials: Option<Credentials>,
}

impl BrokerSettings {
    /// `[scheme://]host[:port]` ; le schéma est ignoré, port 1883 par défaut.
    /// Les identifiants ne sont retenus que si les deux sont renseignés.
    pub fn parse(
        address: &str,
        routes: TopicRoutes,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, RelayError> {
        let trimmed = address.trim();
        let without_scheme = match trimmed.split_once("://") {
            Some((_, rest)) => rest,
            None => trimmed,
        };

        let (host, port) = match without_scheme.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| RelayError::InvalidBroker(format!("bad port in `{address}`")))?;
                (host, port)
            }
            None => (without_scheme, DEFAULT_MQTT_PORT),
        };

        if host.is_empty() {
            return Err(RelayError::InvalidBroker(format!("missing host in `{address}`")));
        }

        let credentials = match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Credentials { username, password })
            }
            _ => None,
        };

        Ok(Self { host: host.to_string(), port, routes, credentials })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Message { topic: String, payload: Vec<u8> },
    /// Le transport est tombé sans qu'on l'ait demandé
    Closed { reason: Option<String> },
}

/// Abonnement actif. Détenu exclusivement par la tâche de réception.
pub trait BusLink: Send + 'static {
    /// Doit être annulable (utilisé dans un `select!` avec le signal d'arrêt).
    fn next_event(&mut self) -> impl Future<Output = BusEvent> + Send;

    /// Fermeture volontaire (unsubscribe + fermeture du transport).
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

pub trait BusConnector: Send + Sync + 'static {
    type Link: BusLink;

    /// Connexion + authentification + abonnement aux deux topics.
    fn connect(&self, settings: &BrokerSettings) -> impl Future<Output = Result<Self::Link, RelayError>> + Send;
}
