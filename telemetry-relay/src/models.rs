use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Dernière position connue d'un device (une entrée par `deviceId`)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLocation {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: i64,      // secondes unix fournies par le device
    pub last_update: String, // "YYYY-MM-DD HH:MM:SS"
}

/// Scan RFID tel que stocké ET diffusé aux viewers
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanEvent {
    pub device_id: String,
    #[serde(rename = "tagUID")]
    pub tag_uid: String,
    pub message: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: i64,
    pub scanned_at: String,
}

// Payloads bruts publiés par les devices sur le bus.
// Tous les champs sont optionnels ici : la validation se fait dans contracts.rs
#[derive(Debug, Deserialize)]
pub struct GpsIn {
    #[serde(rename = "dID")]
    pub device_id: Option<String>,
    #[serde(rename = "dTS")]
    pub timestamp: Option<i64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RfidIn {
    #[serde(rename = "dID")]
    pub device_id: Option<String>,
    #[serde(rename = "uID")]
    pub tag_uid: Option<String>,
    pub msg: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(rename = "dTS")]
    pub timestamp: Option<i64>,
}

pub type DevicesMap = HashMap<String, DeviceLocation>;
