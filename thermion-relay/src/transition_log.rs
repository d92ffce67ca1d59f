use tokio::sync::mpsc;

use crate::models::StatusTransition;
use crate::storage::Storage;

/// Journal d'audit des bascules online/offline.
///
/// File bornée + tâche d'écriture dédiée : une base lente ou en panne ne
/// retient jamais l'ingestion ni la passe de sweep. L'état mémoire et le
/// fan-out temps réel restent la source de vérité du dashboard ; le journal
/// durable est du best-effort.
#[derive(Clone)]
pub struct TransitionLog {
    tx: mpsc::Sender<StatusTransition>,
}

impl TransitionLog {
    const QUEUE_CAPACITY: usize = 256;

    /// Démarre la tâche d'écriture et retourne la poignée d'append.
    pub fn spawn(storage: Storage) -> Self {
        let (tx, mut rx) = mpsc::channel::<StatusTransition>(Self::QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(t) = rx.recv().await {
                match storage.insert_status_event(&t) {
                    Ok(()) => log::info!(
                        "[status-log] {} -> {} at {}",
                        t.device_id,
                        t.state.as_str(),
                        t.at
                    ),
                    Err(e) => log::warn!(
                        "[status-log] write failed for {} -> {}: {e}",
                        t.device_id,
                        t.state.as_str()
                    ),
                }
            }
        });
        Self { tx }
    }

    /// Append fire-and-forget. File pleine ou tâche morte : on trace et on
    /// jette, l'appelant n'attend jamais.
    pub fn append(&self, transition: &StatusTransition) {
        if let Err(e) = self.tx.try_send(transition.clone()) {
            log::warn!(
                "[status-log] dropping {} -> {}: {e}",
                transition.device_id,
                transition.state.as_str()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceState;
    use time::macros::datetime;

    #[tokio::test]
    async fn appended_transitions_reach_the_database() {
        let storage = Storage::open_in_memory().unwrap();
        let log = TransitionLog::spawn(storage.clone());

        log.append(&StatusTransition {
            device_id: "probe-a".into(),
            state: DeviceState::Online,
            at: datetime!(2026-08-07 12:00:00 UTC),
        });
        log.append(&StatusTransition {
            device_id: "probe-a".into(),
            state: DeviceState::Offline,
            at: datetime!(2026-08-07 12:01:00 UTC),
        });

        // la tâche d'écriture draine la file en arrière-plan
        let mut rows = Vec::new();
        for _ in 0..50 {
            rows = storage.recent_status_events(10).unwrap();
            if rows.len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, "offline");
    }
}
