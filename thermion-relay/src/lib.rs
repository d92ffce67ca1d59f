//! Thermion Relay - relais de télémétrie pour sondes de température.
//!
//! Chaîne complète : ingestion MQTT -> persistance SQLite -> fan-out
//! WebSocket, avec suivi de présence online/offline par capteur (moteur
//! de liveness + journal des bascules + replay de snapshot aux nouveaux
//! viewers).

pub mod config;
pub mod health;
pub mod http;
pub mod liveness;
pub mod models;
pub mod mqtt;
pub mod state;
pub mod storage;
pub mod transition_log;
pub mod ws;

pub use config::RelayConfig;
pub use health::HealthTracker;
pub use liveness::{LivenessEngine, SharedEngine};
pub use storage::Storage;
pub use transition_log::TransitionLog;
pub use ws::Broadcaster;
