use crate::store::DEFAULT_MAX_SCANS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RelayConfig {
    pub http: HttpConf,
    pub store: StoreConf,
    pub mqtt: MqttConf,
    pub viewers: ViewersConf,
    /// Abonnement ouvert au démarrage, sans attendre un viewer
    pub autoconnect: Option<AutoconnectConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConf {
    pub max_scans: usize,
    pub query_scan_limit: usize, // troncature par défaut de GET /api/rfid-scans
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub connect_timeout_secs: u64,
    pub keep_alive_secs: u64,
    pub client_id_prefix: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ViewersConf {
    pub queue_depth: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AutoconnectConf {
    pub broker: String,
    pub gps_topic: String,
    pub rfid_topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".into() }
    }
}

impl Default for StoreConf {
    fn default() -> Self {
        Self { max_scans: DEFAULT_MAX_SCANS, query_scan_limit: 50 }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            keep_alive_secs: 60,
            client_id_prefix: "dashboard".into(),
        }
    }
}

impl Default for ViewersConf {
    fn default() -> Self {
        Self { queue_depth: 256 }
    }
}

pub fn parse_config(txt: &str) -> RelayConfig {
    if txt.trim().is_empty() {
        return RelayConfig::default();
    }
    serde_yaml::from_str(txt).unwrap_or_else(|e| {
        warn!("invalid relay config, using defaults: {e}");
        RelayConfig::default()
    })
}

pub async fn load_config() -> RelayConfig {
    let path = std::env::var("TELEMETRY_RELAY_CONFIG").unwrap_or_else(|_| "relay.yaml".into());
    let mut cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt)
    } else {
        info!("no {path}, using default config");
        RelayConfig::default()
    };

    if let Ok(bind) = std::env::var("TELEMETRY_RELAY_BIND") {
        cfg.http.bind = bind;
    }
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let cfg = parse_config("  \n");
        assert_eq!(cfg.http.bind, "0.0.0.0:3000");
        assert_eq!(cfg.store.max_scans, 100);
        assert_eq!(cfg.store.query_scan_limit, 50);
        assert_eq!(cfg.mqtt.connect_timeout_secs, 10);
        assert!(cfg.autoconnect.is_none());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let cfg = parse_config(
            r#"
store:
  max_scans: 20
autoconnect:
  broker: "mqtt://localhost:1883"
  gps_topic: devices/gps
  rfid_topic: devices/rfid
"#,
        );
        assert_eq!(cfg.store.max_scans, 20);
        assert_eq!(cfg.store.query_scan_limit, 50);
        assert_eq!(cfg.viewers.queue_depth, 256);
        let auto = cfg.autoconnect.unwrap();
        assert_eq!(auto.gps_topic, "devices/gps");
        assert!(auto.username.is_none());
    }

    #[test]
    fn test_invalid_config_falls_back() {
        let cfg = parse_config("store: [not, a, map]");
        assert_eq!(cfg.store.max_scans, 100);
    }
}
