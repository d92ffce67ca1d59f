use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RelayConfig {
    pub http_port: u16,
    pub database_path: String,
    pub mqtt: MqttConf,
    pub topics: TopicsConf,
    pub liveness: LivenessConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TopicsConf {
    pub temperature: String,
    pub calibration: String,
    /// Identifiant attribué aux messages du topic température (payload sans nom de capteur).
    pub primary_device_id: String,
}

/// Réglages du suivi de présence. Le seuil doit rester nettement au-dessus
/// de la période de sweep : un tick manqué ne doit pas suffire à basculer
/// un capteur sain en offline.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LivenessConf {
    pub sweep_period_seconds: u64,
    pub offline_threshold_seconds: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            database_path: "./data/thermion.db".into(),
            mqtt: MqttConf::default(),
            topics: TopicsConf::default(),
            liveness: LivenessConf::default(),
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "thermion-relay".into(),
            username: None,
            password: None,
        }
    }
}

impl Default for TopicsConf {
    fn default() -> Self {
        Self {
            temperature: "thermion/sensors/temperature@v1".into(),
            calibration: "thermion/sensors/calibration@v1".into(),
            primary_device_id: "main-probe".into(),
        }
    }
}

impl Default for LivenessConf {
    fn default() -> Self {
        Self {
            sweep_period_seconds: 15,
            offline_threshold_seconds: 45,
        }
    }
}

impl LivenessConf {
    pub fn sweep_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_period_seconds)
    }

    pub fn offline_threshold(&self) -> time::Duration {
        time::Duration::seconds(self.offline_threshold_seconds as i64)
    }
}

impl RelayConfig {
    fn warn_if_unbalanced(&self) {
        if self.liveness.offline_threshold_seconds <= 2 * self.liveness.sweep_period_seconds {
            log::warn!(
                "[relay] offline threshold ({}s) trop proche de la période de sweep ({}s), risque de flapping",
                self.liveness.offline_threshold_seconds,
                self.liveness.sweep_period_seconds
            );
        }
    }
}

pub async fn load_config() -> RelayConfig {
    let path = std::env::var("THERMION_RELAY_CONFIG").unwrap_or_else(|_| "relay.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return RelayConfig::default();
        }
        match serde_yaml::from_str::<RelayConfig>(&txt) {
            Ok(cfg) => {
                cfg.warn_if_unbalanced();
                cfg
            }
            Err(e) => {
                log::error!("[relay] config invalide: {e}");
                RelayConfig::default()
            }
        }
    } else {
        log::info!("[relay] pas de relay.yaml, usage config par défaut");
        RelayConfig::default()
    }
}
