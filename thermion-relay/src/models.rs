use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Etat de présence d'un capteur, déduit de la date de son dernier message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Online,
    Offline,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Online => "online",
            DeviceState::Offline => "offline",
        }
    }
}

/// Statut courant d'un capteur tel que tenu par le store.
/// `last_seen` est l'instant de réception côté relais, jamais un horodatage embarqué.
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    pub device_id: String,
    pub state: DeviceState,
    pub last_seen: Option<OffsetDateTime>,
}

/// Bascule de statut constatée : fait immuable, journalisé une seule fois.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub device_id: String,
    pub state: DeviceState,
    pub at: OffsetDateTime,
}

/// Lecture de température telle que renvoyée par le stockage (RFC3339).
#[derive(Debug, Clone, Serialize)]
pub struct ReadingRow {
    pub value: f64,
    pub recorded_at: String,
}

/// Echantillon de calibration d'un capteur nommé.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationRow {
    pub sensor: String,
    pub value: f64,
    pub recorded_at: String,
}

/// Entrée du journal de statut.
#[derive(Debug, Clone, Serialize)]
pub struct StatusLogRow {
    pub device_id: String,
    pub status: String,
    pub recorded_at: String,
}
