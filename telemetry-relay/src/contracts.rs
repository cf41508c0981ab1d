//! Contrats des payloads publiés par les devices.
//!
//! Routage topic → type de télémétrie, puis validation des champs requis.
//! Un payload invalide produit une `DecodeError` que l'appelant logge et ignore.

use crate::error::DecodeError;
use crate::models::{GpsIn, RfidIn};
use std::fmt;

/// Valeur de `msg` quand le device n'en fournit pas
pub const DEFAULT_SCAN_MESSAGE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryKind {
    Gps,
    Rfid,
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryKind::Gps => f.write_str("GPS"),
            TelemetryKind::Rfid => f.write_str("RFID"),
        }
    }
}

/// Les deux topics configurés au dernier `connect_mqtt`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRoutes {
    pub gps: String,
    pub rfid: String,
}

impl TopicRoutes {
    pub fn new(gps: impl Into<String>, rfid: impl Into<String>) -> Self {
        Self { gps: gps.into(), rfid: rfid.into() }
    }

    /// Correspondance exacte uniquement ; le topic GPS est prioritaire si les deux sont identiques.
    pub fn kind_of(&self, topic: &str) -> Option<TelemetryKind> {
        if topic == self.gps {
            Some(TelemetryKind::Gps)
        } else if topic == self.rfid {
            Some(TelemetryKind::Rfid)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GpsFix {
    pub device_id: String,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RfidRead {
    pub device_id: String,
    pub tag_uid: String,
    pub message: String,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    Gps(GpsFix),
    Rfid(RfidRead),
}

/// Décode et valide un payload. `received_at` remplace un `dTS` absent.
pub fn decode(kind: TelemetryKind, payload: &[u8], received_at: i64) -> Result<Telemetry, DecodeError> {
    match kind {
        TelemetryKind::Gps => {
            let raw: GpsIn = serde_json::from_slice(payload)?;
            let device_id = required_id(raw.device_id, kind, "dID")?;
            let lat = raw.lat.ok_or(DecodeError::MissingField { kind, field: "lat" })?;
            let lon = raw.lon.ok_or(DecodeError::MissingField { kind, field: "lon" })?;
            Ok(Telemetry::Gps(GpsFix {
                device_id,
                lat,
                lon,
                timestamp: raw.timestamp.unwrap_or(received_at),
            }))
        }
        TelemetryKind::Rfid => {
            let raw: RfidIn = serde_json::from_slice(payload)?;
            let device_id = required_id(raw.device_id, kind, "dID")?;
            let tag_uid = required_id(raw.tag_uid, kind, "uID")?;
            let lat = raw.lat.ok_or(DecodeError::MissingField { kind, field: "lat" })?;
            let lon = raw.lon.ok_or(DecodeError::MissingField { kind, field: "lon" })?;
            Ok(Telemetry::Rfid(RfidRead {
                device_id,
                tag_uid,
                message: raw.msg.unwrap_or_else(|| DEFAULT_SCAN_MESSAGE.to_string()),
                lat,
                lon,
                timestamp: raw.timestamp.unwrap_or(received_at),
            }))
        }
    }
}

// Un identifiant vide compte comme absent
fn required_id(value: Option<String>, kind: TelemetryKind, field: &'static str) -> Result<String, DecodeError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(DecodeError::MissingField { kind, field })
}
