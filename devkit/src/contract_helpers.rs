/*!
Helpers pour construire les payloads publiés par les devices

Formats (JSON) :
- GPS  : `{ dID, dTS, lat, lon }`
- RFID : `{ dID, uID, msg, lat, lon, dTS }`

Partagés par les tests du relais et par le simulateur.
*/

use serde_json::Value;

/// Device simulé (position de référence)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimDevice {
    pub id: &'static str,
    pub lat: f64,
    pub lon: f64,
    pub name: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimTag {
    pub uid: &'static str,
    pub msg: &'static str,
}

pub const TEST_DEVICES: [SimDevice; 3] = [
    SimDevice { id: "device_001", lat: 12.9352, lon: 77.6245, name: "Bangalore" },
    SimDevice { id: "device_002", lat: 28.6139, lon: 77.2090, name: "Delhi" },
    SimDevice { id: "device_003", lat: 19.0760, lon: 72.8777, name: "Mumbai" },
];

pub const TEST_TAGS: [SimTag; 5] = [
    SimTag { uid: "tag_001", msg: "Package A - Electronics" },
    SimTag { uid: "tag_002", msg: "Package B - Documents" },
    SimTag { uid: "tag_003", msg: "Package C - Medical" },
    SimTag { uid: "tag_004", msg: "Package D - Food" },
    SimTag { uid: "tag_005", msg: "Package E - Fragile" },
];

pub struct TelemetryMessageBuilder;

impl TelemetryMessageBuilder {
    /// Payload GPS complet
    pub fn gps<S: Into<String>>(device_id: S, lat: f64, lon: f64, timestamp: i64) -> Value {
        serde_json::json!({
            "dID": device_id.into(),
            "dTS": timestamp,
            "lat": lat,
            "lon": lon
        })
    }

    /// Payload GPS horodaté maintenant
    pub fn gps_now<S: Into<String>>(device_id: S, lat: f64, lon: f64) -> Value {
        Self::gps(device_id, lat, lon, chrono::Utc::now().timestamp())
    }

    /// Payload GPS sans `dTS` (le relais utilise l'heure de réception)
    pub fn gps_without_timestamp<S: Into<String>>(device_id: S, lat: f64, lon: f64) -> Value {
        serde_json::json!({
            "dID": device_id.into(),
            "lat": lat,
            "lon": lon
        })
    }

    pub fn rfid<S: Into<String>>(device_id: S, tag_uid: S, message: S, lat: f64, lon: f64, timestamp: i64) -> Value {
        serde_json::json!({
            "dID": device_id.into(),
            "uID": tag_uid.into(),
            "msg": message.into(),
            "lat": lat,
            "lon": lon,
            "dTS": timestamp
        })
    }

    pub fn rfid_now<S: Into<String>>(device_id: S, tag_uid: S, message: S, lat: f64, lon: f64) -> Value {
        Self::rfid(device_id, tag_uid, message, lat, lon, chrono::Utc::now().timestamp())
    }

    /// Retire un champ d'un payload (cas invalides)
    pub fn without(mut payload: Value, field: &str) -> Value {
        if let Some(obj) = payload.as_object_mut() {
            obj.remove(field);
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_builders() {
        let gps = TelemetryMessageBuilder::gps("device_001", 12.9352, 77.6245, 1_700_000_000);
        assert_eq!(gps["dID"], "device_001");
        assert_eq!(gps["dTS"], 1_700_000_000);
        assert_eq!(gps["lat"], 12.9352);

        let rfid = TelemetryMessageBuilder::rfid("device_001", "tag_001", "Package A", 1.0, 2.0, 5);
        assert_eq!(rfid["uID"], "tag_001");
        assert_eq!(rfid["msg"], "Package A");

        let stripped = TelemetryMessageBuilder::without(rfid, "msg");
        assert!(stripped.get("msg").is_none());
        assert_eq!(stripped["uID"], "tag_001");
    }

    #[test]
    fn test_gps_without_timestamp() {
        let gps = TelemetryMessageBuilder::gps_without_timestamp("d", 1.0, 2.0);
        assert!(gps.get("dTS").is_none());
        assert!(TelemetryMessageBuilder::gps_now("d", 1.0, 2.0)["dTS"].as_i64().unwrap() > 1_700_000_000);
    }
}
