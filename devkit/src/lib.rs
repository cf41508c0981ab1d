/*!
# Telemetry DevKit - Bus simulé et utilitaires de test

Bibliothèque facilitant le test du relais sans broker MQTT :
- Connecteur de bus en mémoire (journal connect/close, pannes scriptées)
- Builders de payloads GPS/RFID conformes aux contrats devices
- Harness : relais + viewer attaché, avec attentes bornées dans le temps
*/

pub mod mqtt_stub;
pub mod contract_helpers;
pub mod test_utils;

pub use mqtt_stub::{BusCall, FakeConnector, FakeLink};
pub use contract_helpers::{SimDevice, SimTag, TelemetryMessageBuilder, TEST_DEVICES, TEST_TAGS};
pub use test_utils::TestHarness;
