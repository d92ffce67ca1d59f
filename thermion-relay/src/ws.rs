/**
 * FAN-OUT WEBSOCKET - Diffusion temps réel vers les viewers
 *
 * RÔLE :
 * Relaye chaque lecture, calibration et bascule de statut vers tous les
 * navigateurs connectés. A la connexion d'un viewer, rejoue le snapshot
 * complet des statuts : la vue est cohérente sans attendre la prochaine
 * transition ni la prochaine passe de sweep.
 *
 * FONCTIONNEMENT :
 * - Broadcaster = canal tokio::broadcast cloné partout où l'on émet
 * - chaque client WebSocket est une tâche qui pompe le canal vers sa socket
 * - un client lent saute des événements (Lagged) au lieu de bloquer les autres
 */

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::http::AppState;
use crate::models::DeviceState;

/// Evénements poussés aux viewers connectés.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    Reading {
        value: f64,
        timestamp: String,
    },
    Calibration {
        sensor: String,
        value: f64,
        timestamp: String,
    },
    DeviceStatus {
        device_id: String,
        status: DeviceState,
    },
}

#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<WsEvent>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn notify_reading(&self, value: f64, timestamp: &str) {
        // zéro viewer connecté n'est pas une erreur
        let _ = self.tx.send(WsEvent::Reading {
            value,
            timestamp: timestamp.to_string(),
        });
    }

    pub fn notify_calibration(&self, sensor: &str, value: f64, timestamp: &str) {
        let _ = self.tx.send(WsEvent::Calibration {
            sensor: sensor.to_string(),
            value,
            timestamp: timestamp.to_string(),
        });
    }

    pub fn notify_status(&self, device_id: &str, state: DeviceState) {
        let _ = self.tx.send(WsEvent::DeviceStatus {
            device_id: device_id.to_string(),
            status: state,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsEvent> {
        self.tx.subscribe()
    }
}

/// GET /ws - upgrade WebSocket d'un viewer.
pub async fn ws_handler(State(app): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

async fn handle_socket(socket: WebSocket, app: AppState) {
    let client_id = Uuid::new_v4().to_string();
    let mut rx = app.broadcaster.subscribe();
    app.health.ws_client_connected();
    log::info!("[ws] client {client_id} connected");

    let (mut sender, mut receiver) = socket.split();

    let welcome = serde_json::json!({
        "type": "welcome",
        "client_id": client_id,
        "server": "thermion-relay",
        "version": env!("CARGO_PKG_VERSION"),
    });
    if sender
        .send(Message::Text(welcome.to_string().into()))
        .await
        .is_err()
    {
        app.health.ws_client_disconnected();
        return;
    }

    // replay du snapshot : le viewer connaît tous les capteurs suivis,
    // y compris ceux déjà offline
    for status in app.engine.snapshot() {
        let event = WsEvent::DeviceStatus {
            device_id: status.device_id,
            status: status.state,
        };
        if let Ok(txt) = serde_json::to_string(&event) {
            if sender.send(Message::Text(txt.into())).await.is_err() {
                app.health.ws_client_disconnected();
                return;
            }
        }
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("[ws] client {client_id} error: {e}");
                        break;
                    }
                }
            }
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(txt) = serde_json::to_string(&event) else { continue };
                        if sender.send(Message::Text(txt.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("[ws] client {client_id} lagging, {skipped} events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    app.health.ws_client_disconnected();
    log::info!("[ws] client {client_id} disconnected");
}
