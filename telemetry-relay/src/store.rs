/**
 * TELEMETRY STORE - État mémoire borné des devices et des scans RFID
 *
 * RÔLE :
 * Dernière position par device + historique des scans RFID (plus récent en tête).
 * Aucune connaissance du bus ni des viewers : la diffusion est à la charge de l'appelant.
 *
 * FONCTIONNEMENT :
 * - Un seul Mutex pour les deux collections → snapshots cohérents (initial_state)
 * - Le verrou n'est tenu que le temps de la copie/mise à jour mémoire
 * - Éviction FIFO stricte par ordre d'insertion, jamais par timestamp device
 */

use crate::models::{DeviceLocation, DevicesMap, ScanEvent};
use parking_lot::Mutex;
use std::collections::VecDeque;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

pub const DEFAULT_MAX_SCANS: usize = 100;

const DISPLAY_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

#[derive(Debug, Default)]
struct StoreInner {
    devices: DevicesMap,
    scans: VecDeque<ScanEvent>,
}

/// Copie point-in-time des deux collections
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub devices: Vec<DeviceLocation>,
    pub scans: Vec<ScanEvent>,
}

#[derive(Debug)]
pub struct TelemetryStore {
    inner: Mutex<StoreInner>,
    max_scans: usize,
    /// Fuseau utilisé pour `lastUpdate` / `scannedAt`
    offset: UtcOffset,
}

impl TelemetryStore {
    pub fn new(max_scans: usize) -> Self {
        Self::with_offset(max_scans, UtcOffset::UTC)
    }

    pub fn with_offset(max_scans: usize, offset: UtcOffset) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                devices: DevicesMap::new(),
                scans: VecDeque::with_capacity(max_scans + 1),
            }),
            max_scans,
            offset,
        }
    }

    pub fn max_scans(&self) -> usize {
        self.max_scans
    }

    /// Insère ou remplace entièrement la position d'un device (last-write-wins).
    pub fn upsert_device(&self, device_id: &str, lat: f64, lon: f64, timestamp: i64) -> DeviceLocation {
        let record = DeviceLocation {
            device_id: device_id.to_string(),
            latitude: lat,
            longitude: lon,
            timestamp,
            last_update: display_time(timestamp, self.offset),
        };
        self.inner.lock().devices.insert(record.device_id.clone(), record.clone());
        record
    }

    /// Ajoute un scan en tête et évince les plus anciens au-delà de la capacité.
    /// Retourne exactement la représentation stockée.
    pub fn record_scan(
        &self,
        device_id: &str,
        tag_uid: &str,
        message: &str,
        lat: f64,
        lon: f64,
        timestamp: i64,
    ) -> ScanEvent {
        let scan = ScanEvent {
            device_id: device_id.to_string(),
            tag_uid: tag_uid.to_string(),
            message: message.to_string(),
            latitude: lat,
            longitude: lon,
            timestamp,
            scanned_at: display_time(timestamp, self.offset),
        };

        let mut inner = self.inner.lock();
        inner.scans.push_front(scan.clone());
        while inner.scans.len() > self.max_scans {
            inner.scans.pop_back();
        }
        scan
    }

    /// Ordre non garanti (ordre d'itération de la map)
    pub fn snapshot_devices(&self) -> Vec<DeviceLocation> {
        self.inner.lock().devices.values().cloned().collect()
    }

    /// Fenêtre complète, plus récent en tête
    pub fn snapshot_scans(&self) -> Vec<ScanEvent> {
        self.inner.lock().scans.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.lock();
        StoreSnapshot {
            devices: inner.devices.values().cloned().collect(),
            scans: inner.scans.iter().cloned().collect(),
        }
    }

    pub fn device_count(&self) -> usize {
        self.inner.lock().devices.len()
    }

    pub fn scan_count(&self) -> usize {
        self.inner.lock().scans.len()
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SCANS)
    }
}

/// Timestamp unix → "YYYY-MM-DD HH:MM:SS" dans le fuseau donné.
/// Hors plage : on retombe sur la valeur brute.
pub fn display_time(timestamp: i64, offset: UtcOffset) -> String {
    OffsetDateTime::from_unix_timestamp(timestamp)
        .ok()
        .and_then(|t| t.checked_to_offset(offset))
        .and_then(|t| t.format(DISPLAY_FORMAT).ok())
        .unwrap_or_else(|| timestamp.to_string())
}
