// Tests d'intégration du relais : bus simulé (devkit) → store → viewers

use axum::extract::{Query, State};
use std::time::Duration;
use telemetry_devkit::{BusCall, TelemetryMessageBuilder, TestHarness, TEST_DEVICES, TEST_TAGS};
use telemetry_relay::http::{get_devices, get_rfid_scans, get_stats, get_system_health, AppState, ScansParams};
use telemetry_relay::viewers::{ConnectRequest, ErrorNotice, StatusNotice};
use telemetry_relay::{RelayError, ViewerCommand, ViewerEvent};

fn status(name: &str) -> ViewerEvent {
    ViewerEvent::MqttStatus(StatusNotice { status: name.into(), error: None })
}

fn sentinel_gps() -> serde_json::Value {
    TelemetryMessageBuilder::gps("sentinel", 0.5, 0.5, 1)
}

#[tokio::test]
async fn test_gps_update_reaches_store_and_viewer() {
    let mut h = TestHarness::new();
    h.connect().await.unwrap();

    let payload = TelemetryMessageBuilder::gps("device_001", 12.9352, 77.6245, 1_700_000_000);
    assert!(h.publish_gps(&payload));

    let ViewerEvent::GpsUpdate(update) = h.next_event().await.unwrap() else {
        panic!("expected gps_update");
    };
    let devices = h.relay.store().snapshot_devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_id, "device_001");
    assert_eq!(devices[0].latitude, 12.9352);
    assert_eq!(devices[0].longitude, 77.6245);
    assert_eq!(devices[0].timestamp, 1_700_000_000);
    assert_eq!(update, devices[0]);
}

#[tokio::test]
async fn test_second_fix_replaces_first() {
    let mut h = TestHarness::new();
    h.connect().await.unwrap();

    h.publish_gps(&TelemetryMessageBuilder::gps("device_002", 28.6, 77.2, 100));
    h.publish_gps(&TelemetryMessageBuilder::gps("device_002", 19.0, 72.8, 50));
    h.next_event().await.unwrap();
    h.next_event().await.unwrap();

    let devices = h.relay.store().snapshot_devices();
    assert_eq!(devices.len(), 1);
    assert_eq!((devices[0].latitude, devices[0].longitude, devices[0].timestamp), (19.0, 72.8, 50));
}

#[tokio::test]
async fn test_missing_timestamp_defaults_to_receive_time() {
    let mut h = TestHarness::new();
    h.connect().await.unwrap();

    let before = time::OffsetDateTime::now_utc().unix_timestamp();
    h.publish_gps(&TelemetryMessageBuilder::gps_without_timestamp("device_003", 19.076, 72.8777));
    let ViewerEvent::GpsUpdate(update) = h.next_event().await.unwrap() else {
        panic!("expected gps_update");
    };
    assert!(update.timestamp >= before);
    assert!(update.timestamp <= before + 5);
}

#[tokio::test]
async fn test_scan_window_evicts_oldest() {
    let mut h = TestHarness::new();
    h.connect().await.unwrap();

    for i in 1..=101 {
        let tag = format!("tag_{i:03}");
        h.publish_rfid(&TelemetryMessageBuilder::rfid("device_001", tag.as_str(), "pkg", 1.0, 2.0, i));
    }
    for _ in 0..101 {
        assert!(matches!(h.next_event().await.unwrap(), ViewerEvent::RfidScan(_)));
    }

    let scans = h.relay.store().snapshot_scans();
    assert_eq!(scans.len(), 100);
    assert_eq!(scans[0].tag_uid, "tag_101");
    assert_eq!(scans[99].tag_uid, "tag_002");
    assert!(scans.iter().all(|s| s.tag_uid != "tag_001"));
}

#[tokio::test]
async fn test_gps_without_lat_is_dropped() {
    let mut h = TestHarness::new();
    h.connect().await.unwrap();

    let invalid = TelemetryMessageBuilder::without(TelemetryMessageBuilder::gps("device_001", 1.0, 2.0, 3), "lat");
    h.publish_gps(&invalid);
    h.publish_gps(&sentinel_gps());

    // le sentinel est le premier événement : rien n'a été diffusé pour le payload invalide
    let ViewerEvent::GpsUpdate(update) = h.next_event().await.unwrap() else {
        panic!("expected gps_update");
    };
    assert_eq!(update.device_id, "sentinel");
    assert_eq!(h.relay.store().device_count(), 1);
    assert_eq!(h.relay.link().get_health().rejected_payloads, 1);
}

#[tokio::test]
async fn test_rfid_without_msg_defaults_to_na() {
    let mut h = TestHarness::new();
    h.connect().await.unwrap();

    let payload = TelemetryMessageBuilder::without(
        TelemetryMessageBuilder::rfid("device_001", "tag_001", "ignored", 1.0, 2.0, 7),
        "msg",
    );
    h.publish_rfid(&payload);

    let ViewerEvent::RfidScan(scan) = h.next_event().await.unwrap() else {
        panic!("expected rfid_scan");
    };
    assert_eq!(scan.message, "N/A");
    assert_eq!(h.relay.store().snapshot_scans(), vec![scan]);
}

#[tokio::test]
async fn test_other_topics_are_ignored() {
    let mut h = TestHarness::new();
    h.connect().await.unwrap();

    h.bus.publish_json("devices/other", &TelemetryMessageBuilder::gps("device_001", 1.0, 2.0, 3));
    h.publish_gps(&sentinel_gps());

    let ViewerEvent::GpsUpdate(update) = h.next_event().await.unwrap() else {
        panic!("expected gps_update");
    };
    assert_eq!(update.device_id, "sentinel");
    assert_eq!(h.relay.link().get_health().rejected_payloads, 0);
}

#[tokio::test]
async fn test_reconfigure_closes_previous_link_first() {
    let mut h = TestHarness::new();
    h.connect().await.unwrap();

    let mut request = TestHarness::request("other-broker:1884");
    request.gps_topic = "sensors/gps".into();
    h.relay.configure(&request).await.unwrap();

    assert_eq!(h.next_event().await.unwrap(), status("disconnected"));
    assert_eq!(h.next_event().await.unwrap(), status("connected"));

    let journal = h.bus.journal();
    assert_eq!(journal.len(), 3);
    assert!(matches!(&journal[0], BusCall::Connect { host, .. } if host == "fake-broker"));
    assert_eq!(journal[1], BusCall::Close { host: "fake-broker".into() });
    assert!(matches!(
        &journal[2],
        BusCall::Connect { host, port: 1884, gps_topic, .. } if host == "other-broker" && gps_topic == "sensors/gps"
    ));

    // seul le nouvel abonnement est actif
    h.bus.publish_json("devices/gps", &TelemetryMessageBuilder::gps("old", 1.0, 1.0, 1));
    h.bus.publish_json("sensors/gps", &TelemetryMessageBuilder::gps("new", 1.0, 1.0, 1));
    let ViewerEvent::GpsUpdate(update) = h.next_event().await.unwrap() else {
        panic!("expected gps_update");
    };
    assert_eq!(update.device_id, "new");
}

#[tokio::test]
async fn test_teardown_is_idempotent() {
    let mut h = TestHarness::new();
    h.connect().await.unwrap();

    assert!(h.relay.teardown().await);
    assert!(!h.relay.teardown().await);

    assert_eq!(h.drain(), vec![status("disconnected")]);
    assert!(!h.relay.is_connected());
    assert!(!h.bus.is_linked());
    assert!(h.relay.current_routes().is_none());
}

#[tokio::test]
async fn test_failed_connect_reports_to_requester_only() {
    let mut h = TestHarness::new();
    let mut other = h.attach_viewer();
    assert!(matches!(other.events.recv().await, Some(ViewerEvent::InitialState(_))));

    h.bus.fail_next_connect("auth rejected");
    h.relay
        .handle_command(h.viewer.id, ViewerCommand::ConnectMqtt(TestHarness::request("mqtt://fake-broker")))
        .await;

    let expected_status = ViewerEvent::MqttStatus(StatusNotice {
        status: "error".into(),
        error: Some("Connection failed: auth rejected".into()),
    });
    assert_eq!(h.next_event().await.unwrap(), expected_status);
    assert_eq!(
        h.next_event().await.unwrap(),
        ViewerEvent::MqttError(ErrorNotice {
            error: "Failed to connect to broker: Connection failed: auth rejected".into()
        })
    );

    assert_eq!(other.events.recv().await, Some(expected_status));
    assert!(other.events.try_recv().is_err());

    // le contrôleur reste utilisable
    h.connect().await.unwrap();
    assert!(h.relay.is_connected());
}

#[tokio::test]
async fn test_connect_timeout() {
    let mut h = TestHarness::with_connect_timeout(Duration::from_millis(100));
    h.bus.hang_next_connect();

    let err = h.relay.configure(&TestHarness::request("fake-broker")).await.unwrap_err();
    assert!(matches!(err, RelayError::ConnectTimeout(d) if d == Duration::from_millis(100)));
    assert_eq!(
        h.next_event().await.unwrap(),
        ViewerEvent::MqttStatus(StatusNotice {
            status: "error".into(),
            error: Some("Connection timed out after 100ms".into()),
        })
    );

    h.connect().await.unwrap();
}

/// Attend que le connect en vol ait atteint le transport
async fn wait_for_connects(h: &TestHarness, count: usize) {
    for _ in 0..200 {
        if h.bus.journal().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("connect never reached the transport");
}

#[tokio::test]
async fn test_teardown_cancels_pending_connect() {
    let mut h = TestHarness::with_connect_timeout(Duration::from_secs(3));
    h.bus.hang_next_connect();

    let relay = h.relay.clone();
    let pending = tokio::spawn(async move { relay.configure(&TestHarness::request("fake-broker")).await });
    wait_for_connects(&h, 1).await;

    let started = std::time::Instant::now();
    assert!(h.relay.teardown().await);
    assert!(started.elapsed() < Duration::from_millis(500));

    let outcome = tokio::time::timeout(Duration::from_millis(500), pending).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(RelayError::Cancelled)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.drain(), vec![status("disconnected")]);
    assert!(!h.relay.is_connected());
    assert!(h.relay.current_routes().is_none());
}

#[tokio::test]
async fn test_newer_configure_supersedes_pending_one() {
    let mut h = TestHarness::with_connect_timeout(Duration::from_secs(3));
    h.bus.hang_next_connect();

    let relay = h.relay.clone();
    let pending = tokio::spawn(async move { relay.configure(&TestHarness::request("stuck-broker")).await });
    wait_for_connects(&h, 1).await;

    h.relay.configure(&TestHarness::request("fake-broker")).await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_millis(500), pending).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(RelayError::Cancelled)));

    assert_eq!(h.next_event().await.unwrap(), status("connected"));
    assert!(h.drain().is_empty());
    assert!(h.relay.is_connected());
    assert_eq!(h.relay.current_routes().map(|r| r.gps), Some("devices/gps".to_string()));

    let journal = h.bus.journal();
    assert_eq!(journal.len(), 2);
    assert!(matches!(&journal[1], BusCall::Connect { host, .. } if host == "fake-broker"));
}

#[tokio::test]
async fn test_invalid_broker_never_reaches_transport() {
    let mut h = TestHarness::new();
    let err = h.relay.configure(&TestHarness::request("mqtt://host:notaport")).await.unwrap_err();
    assert!(matches!(err, RelayError::InvalidBroker(_)));
    assert!(h.bus.journal().is_empty());
    assert!(matches!(h.next_event().await.unwrap(), ViewerEvent::MqttStatus(n) if n.status == "error"));
}

#[tokio::test]
async fn test_credentials_are_forwarded() {
    let h = TestHarness::new();
    let request = ConnectRequest {
        username: Some("alice".into()),
        password: Some("secret".into()),
        ..TestHarness::request("fake-broker")
    };
    h.relay.configure(&request).await.unwrap();
    assert!(matches!(&h.bus.journal()[0], BusCall::Connect { username: Some(u), .. } if u == "alice"));
}

#[tokio::test]
async fn test_unexpected_drop_is_broadcast_and_recoverable() {
    let mut h = TestHarness::new();
    h.connect().await.unwrap();

    assert!(h.bus.drop_link("reset by peer"));
    assert_eq!(
        h.next_event().await.unwrap(),
        ViewerEvent::MqttStatus(StatusNotice { status: "error".into(), error: Some("reset by peer".into()) })
    );
    assert!(!h.relay.is_connected());
    assert_eq!(h.relay.link().get_health().mqtt_unexpected_drops, 1);

    h.relay.configure(&TestHarness::request("fake-broker")).await.unwrap();
    assert_eq!(h.next_event().await.unwrap(), status("disconnected"));
    assert_eq!(h.next_event().await.unwrap(), status("connected"));

    h.publish_gps(&sentinel_gps());
    assert!(matches!(h.next_event().await.unwrap(), ViewerEvent::GpsUpdate(_)));
}

#[tokio::test]
async fn test_disconnect_command() {
    let mut h = TestHarness::new();
    h.connect().await.unwrap();

    h.relay.handle_command(h.viewer.id, ViewerCommand::DisconnectMqtt).await;
    assert_eq!(h.next_event().await.unwrap(), status("disconnected"));
    assert!(matches!(h.bus.journal().last(), Some(BusCall::Close { .. })));
}

#[tokio::test]
async fn test_new_viewer_receives_snapshot() {
    let mut h = TestHarness::new();
    h.connect().await.unwrap();

    let device = &TEST_DEVICES[0];
    let tag = &TEST_TAGS[0];
    h.publish_gps(&TelemetryMessageBuilder::gps(device.id, device.lat, device.lon, 1));
    h.publish_rfid(&TelemetryMessageBuilder::rfid(device.id, tag.uid, tag.msg, device.lat, device.lon, 2));
    h.next_event().await.unwrap();
    h.next_event().await.unwrap();

    let mut late = h.attach_viewer();
    let Some(ViewerEvent::InitialState(state)) = late.events.recv().await else {
        panic!("expected initial_state");
    };
    assert!(state.connected);
    assert_eq!(state.devices.len(), 1);
    assert_eq!(state.rfid_scans.len(), 1);
    assert_eq!(state.rfid_scans[0].message, "Package A - Electronics");

    h.relay.detach_viewer(&late);
    assert_eq!(h.relay.hub().len(), 1);
}

#[tokio::test]
async fn test_query_handlers() {
    let mut h = TestHarness::new();
    h.connect().await.unwrap();

    for (i, device) in TEST_DEVICES.iter().enumerate() {
        h.publish_gps(&TelemetryMessageBuilder::gps(device.id, device.lat, device.lon, i as i64));
    }
    for (i, tag) in TEST_TAGS.iter().enumerate() {
        h.publish_rfid(&TelemetryMessageBuilder::rfid("device_001", tag.uid, tag.msg, 1.0, 2.0, i as i64));
    }
    for _ in 0..(TEST_DEVICES.len() + TEST_TAGS.len()) {
        h.next_event().await.unwrap();
    }

    let app = AppState { relay: h.relay.clone(), query_scan_limit: 50 };

    let stats = get_stats(State(app.clone())).await.0;
    assert_eq!((stats.active_devices, stats.total_scans, stats.connected), (3, 5, true));

    let devices = get_devices(State(app.clone())).await.0;
    assert_eq!(devices.count, 3);

    let scans = get_rfid_scans(State(app.clone()), Query(ScansParams { limit: Some(2) })).await.0;
    assert_eq!(scans.count, 5);
    assert_eq!(scans.scans.len(), 2);
    assert_eq!(scans.scans[0].tag_uid, "tag_005");

    let all = get_rfid_scans(State(app.clone()), Query(ScansParams::default())).await.0;
    assert_eq!(all.scans.len(), 5);

    let health = get_system_health(State(app)).await.0;
    assert_eq!(health.link.mqtt_status, "connected");
    assert_eq!(health.viewers, 1);
    assert_eq!(health.scans_held, 5);
    assert_eq!(health.scan_capacity, 100);
}
