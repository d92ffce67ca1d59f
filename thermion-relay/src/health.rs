use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rumqttc::{AsyncClient, QoS};
use serde::Serialize;

use crate::liveness::SharedEngine;
use crate::state::{shared, Shared};
use crate::storage::Storage;

pub const HEALTH_TOPIC: &str = "thermion/relay/health@v1";

#[derive(Debug, Serialize)]
pub struct RelayHealth {
    pub uptime_seconds: u64,
    pub devices_tracked: u32,
    pub devices_online: u32,
    pub readings_today: i64,
    pub ws_clients: usize,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Shared<String>,
    ws_clients: Arc<AtomicUsize>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: shared("connecting".to_string()),
            ws_clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn ws_client_connected(&self) {
        self.ws_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ws_client_disconnected(&self) {
        self.ws_clients.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get_health(&self, engine: &SharedEngine, storage: &Storage) -> RelayHealth {
        let readings_today = match storage.stats_today() {
            Ok(stats) => stats.count,
            Err(e) => {
                log::warn!("[health] stats query failed: {e}");
                0
            }
        };
        RelayHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            devices_tracked: engine.device_count(),
            devices_online: engine.online_count(),
            readings_today,
            ws_clients: self.ws_clients.load(Ordering::Relaxed),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }

    /// Publication périodique du health sur MQTT, via le client partagé
    /// (la boucle d'ingestion pompe l'event loop).
    pub fn spawn_health_publisher(&self, client: AsyncClient, engine: SharedEngine, storage: Storage) {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                let health = tracker.get_health(&engine, &storage);
                match serde_json::to_string(&health) {
                    Ok(payload) => {
                        if let Err(e) = client
                            .publish(HEALTH_TOPIC, QoS::AtLeastOnce, false, payload)
                            .await
                        {
                            log::warn!("[health] failed to publish: {e:?}");
                        }
                    }
                    Err(e) => log::warn!("[health] serialization failed: {e}"),
                }
            }
        });
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::LivenessEngine;
    use time::macros::datetime;

    #[test]
    fn counters_follow_engine_and_clients() {
        let tracker = HealthTracker::new();
        let engine: SharedEngine = Arc::new(LivenessEngine::new(time::Duration::seconds(45)));
        let storage = Storage::open_in_memory().unwrap();

        engine.record_activity("main-probe", datetime!(2026-08-07 12:00:00 UTC));
        tracker.ws_client_connected();
        tracker.ws_client_connected();
        tracker.ws_client_disconnected();
        tracker.mark_mqtt_connected();

        let health = tracker.get_health(&engine, &storage);
        assert_eq!(health.devices_tracked, 1);
        assert_eq!(health.devices_online, 1);
        assert_eq!(health.ws_clients, 1);
        assert_eq!(health.mqtt_status, "connected");
        assert_eq!(health.mqtt_reconnects, 0);
    }
}
