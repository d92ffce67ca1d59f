/**
 * LIVENESS ENGINE - Suivi de présence des capteurs
 *
 * RÔLE :
 * Déduit l'état online/offline de chaque capteur à partir de la date de
 * réception de son dernier message. L'horloge embarquée des sondes n'est
 * jamais consultée : seule l'horloge du relais fait foi.
 *
 * FONCTIONNEMENT :
 * - record_activity() à chaque message entrant : rafraîchit last_seen et
 *   repasse le capteur online si nécessaire
 * - sweep() périodique : repasse offline les capteurs muets depuis plus de
 *   offline_threshold ; seul l'ingestion peut repasser un capteur online
 * - snapshot() : copie cohérente de l'état courant, rejouée à chaque
 *   nouveau viewer WebSocket et servie par l'API /devices
 *
 * UTILITÉ DANS THERMION :
 * 🎯 Dashboard temps réel : les viewers voient immédiatement quel capteur émet
 * 🎯 Audit : chaque bascule part vers le status_log via le TransitionLog
 * 🎯 Tests : les instants sont fournis par l'appelant, aucun sleep nécessaire
 */

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};

use crate::models::{DeviceState, DeviceStatus, StatusTransition};
use crate::transition_log::TransitionLog;
use crate::ws::Broadcaster;

#[derive(Debug, Clone)]
struct DeviceEntry {
    state: DeviceState,
    last_seen: Option<OffsetDateTime>,
}

/// Table des statuts par capteur. La map ne sort jamais d'ici : toute
/// lecture et toute écriture passent par les méthodes, sous un seul verrou.
/// Un capteur observé une fois reste suivi pour la vie du process.
#[derive(Default)]
pub struct StatusStore {
    devices: Mutex<HashMap<String, DeviceEntry>>,
}

impl StatusStore {
    /// Rafraîchit last_seen et repasse le capteur online.
    /// Retourne la transition si l'état a effectivement changé.
    fn touch(&self, device_id: &str, at: OffsetDateTime) -> Option<StatusTransition> {
        let mut devices = self.devices.lock();
        let entry = devices.entry(device_id.to_string()).or_insert(DeviceEntry {
            state: DeviceState::Offline,
            last_seen: None,
        });
        entry.last_seen = Some(at);
        if entry.state == DeviceState::Online {
            return None;
        }
        entry.state = DeviceState::Online;
        Some(StatusTransition {
            device_id: device_id.to_string(),
            state: DeviceState::Online,
            at,
        })
    }

    /// Repasse offline les capteurs online muets depuis `threshold` ou plus.
    /// Ne touche jamais last_seen, ne repasse jamais un capteur online.
    fn expire_stale(&self, now: OffsetDateTime, threshold: Duration) -> Vec<StatusTransition> {
        let mut transitions = Vec::new();
        let mut devices = self.devices.lock();
        for (device_id, entry) in devices.iter_mut() {
            if entry.state != DeviceState::Online {
                continue;
            }
            // un `now` antérieur à last_seen compte comme un âge nul
            let stale = match entry.last_seen {
                Some(seen) => now - seen >= threshold,
                None => true,
            };
            if stale {
                entry.state = DeviceState::Offline;
                transitions.push(StatusTransition {
                    device_id: device_id.clone(),
                    state: DeviceState::Offline,
                    at: now,
                });
            }
        }
        transitions
    }

    fn snapshot(&self) -> Vec<DeviceStatus> {
        self.devices
            .lock()
            .iter()
            .map(|(device_id, entry)| DeviceStatus {
                device_id: device_id.clone(),
                state: entry.state,
                last_seen: entry.last_seen,
            })
            .collect()
    }

    fn counts(&self) -> (u32, u32) {
        let devices = self.devices.lock();
        let online = devices
            .values()
            .filter(|e| e.state == DeviceState::Online)
            .count() as u32;
        (devices.len() as u32, online)
    }
}

pub struct LivenessEngine {
    store: StatusStore,
    offline_threshold: Duration,
}

pub type SharedEngine = Arc<LivenessEngine>;

impl LivenessEngine {
    pub fn new(offline_threshold: Duration) -> Self {
        Self {
            store: StatusStore::default(),
            offline_threshold,
        }
    }

    /// A appeler pour chaque message accepté d'un capteur. L'instant de
    /// réception est fourni par l'appelant. Un capteur inconnu est créé
    /// silencieusement. Retourne la transition offline→online s'il y en a une.
    pub fn record_activity(
        &self,
        device_id: &str,
        received_at: OffsetDateTime,
    ) -> Option<StatusTransition> {
        self.store.touch(device_id, received_at)
    }

    /// Une passe d'évaluation sur tous les capteurs suivis. Au plus une
    /// transition par capteur et par passe ; idempotent pour les capteurs
    /// qui n'ont pas franchi le seuil.
    pub fn sweep(&self, now: OffsetDateTime) -> Vec<StatusTransition> {
        self.store.expire_stale(now, self.offline_threshold)
    }

    /// Copie cohérente de l'état courant, prise sous le verrou du store.
    pub fn snapshot(&self) -> Vec<DeviceStatus> {
        self.store.snapshot()
    }

    pub fn device_count(&self) -> u32 {
        self.store.counts().0
    }

    pub fn online_count(&self) -> u32 {
        self.store.counts().1
    }
}

/// Propage une transition vers le journal et les viewers. Toujours appelé
/// hors du verrou du store : aucun consommateur lent ne retient l'ingestion.
pub fn publish_transition(
    transition_log: &TransitionLog,
    broadcaster: &Broadcaster,
    t: &StatusTransition,
) {
    transition_log.append(t);
    broadcaster.notify_status(&t.device_id, t.state);
}

/// Lance la passe périodique de présence. Une seule tâche : une passe se
/// termine toujours avant que la suivante ne démarre.
pub fn spawn_sweep_loop(
    engine: SharedEngine,
    transition_log: TransitionLog,
    broadcaster: Broadcaster,
    period: std::time::Duration,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let transitions = engine.sweep(OffsetDateTime::now_utc());
            for t in &transitions {
                log::info!("[liveness] {} -> {}", t.device_id, t.state.as_str());
                publish_transition(&transition_log, &broadcaster, t);
            }
        }
    });
}
