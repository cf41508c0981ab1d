/**
 * TELEMETRY RELAY - Relais temps réel GPS + RFID
 *
 * RÔLE : Abonnement MQTT piloté par les viewers, état mémoire borné,
 * diffusion WebSocket et API REST de consultation.
 *
 * ARCHITECTURE : bus (trait) → relay (contrôleur) → store + viewers → http.
 * Aucun singleton : tout passe par un `RelayController` construit explicitement.
 */

pub mod bus;
pub mod config;
pub mod contracts;
pub mod error;
pub mod health;
pub mod http;
pub mod models;
pub mod mqtt;
pub mod relay;
pub mod store;
pub mod viewers;

pub use bus::{BrokerSettings, BusConnector, BusEvent, BusLink};
pub use error::{DecodeError, RelayError};
pub use models::{DeviceLocation, ScanEvent};
pub use relay::{RelayController, SharedRelay};
pub use store::TelemetryStore;
pub use viewers::{ConnectRequest, ViewerCommand, ViewerEvent, ViewerHub, ViewerSession};
