/*!
# Thermion DevKit - Utilitaires de test pour le relais

Bibliothèque facilitant les tests du relais sans broker ni navigateur:
- Constructeurs de payloads MQTT tels qu'émis par les sondes
- Collecte et assertions sur les événements du fan-out WebSocket
*/

pub mod collector;
pub mod payloads;

pub use collector::EventCollector;
pub use payloads::ProbeMessageBuilder;

/// Init logging pour tests (idempotent).
pub fn init_test_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}
