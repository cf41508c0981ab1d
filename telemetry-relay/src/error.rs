use crate::contracts::TelemetryKind;
use std::time::Duration;

/// Erreurs du cycle de vie de l'abonnement MQTT
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid broker address: {0}")]
    InvalidBroker(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("Subscribe failed: {0}")]
    Subscribe(String),
    /// Tentative annulée par un teardown ou un configure plus récent
    #[error("Connection attempt cancelled")]
    Cancelled,
}

/// Payload bus rejeté (jamais remonté aux viewers, seulement loggé)
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{kind} payload missing `{field}`")]
    MissingField { kind: TelemetryKind, field: &'static str },
}
