/**
 * INGESTION MQTT - Entrée unique des mesures dans le relais
 *
 * RÔLE :
 * S'abonne aux topics des sondes et traite chaque message : persistance de
 * la mesure, diffusion temps réel, puis signalement d'activité au moteur de
 * présence. Un payload invalide est tracé et jeté, la boucle continue.
 *
 * TOPICS :
 * - température : payload nu ("23.75"), attribué au capteur principal
 * - calibration : payload "nom:valeur", attribué au capteur nommé
 */

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::config::RelayConfig;
use crate::health::HealthTracker;
use crate::liveness::{publish_transition, SharedEngine};
use crate::storage::Storage;
use crate::transition_log::TransitionLog;
use crate::ws::Broadcaster;

/// Tout ce qu'un message entrant peut toucher.
#[derive(Clone)]
pub struct IngestContext {
    pub engine: SharedEngine,
    pub storage: Storage,
    pub broadcaster: Broadcaster,
    pub transition_log: TransitionLog,
    pub temperature_topic: String,
    pub calibration_topic: String,
    pub primary_device_id: String,
}

pub fn create_mqtt_client(cfg: &RelayConfig) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(&cfg.mqtt.client_id, &cfg.mqtt.host, cfg.mqtt.port);
    opts.set_keep_alive(std::time::Duration::from_secs(15));
    if let (Some(user), Some(pass)) = (&cfg.mqtt.username, &cfg.mqtt.password) {
        opts.set_credentials(user, pass);
    }
    AsyncClient::new(opts, 10)
}

/// Boucle d'écoute MQTT. Se réabonne à chaque ConnAck pour couvrir les
/// reconnexions du broker.
pub fn spawn_ingest_loop(
    client: AsyncClient,
    mut eventloop: EventLoop,
    ctx: IngestContext,
    health: HealthTracker,
) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    log::info!("[mqtt] connected to broker");
                    for topic in [&ctx.temperature_topic, &ctx.calibration_topic] {
                        if let Err(e) = client.subscribe(topic.as_str(), QoS::AtLeastOnce).await {
                            log::error!("[mqtt] subscribe {topic} failed: {e:?}");
                        }
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    handle_publish(&ctx, &p.topic, &p.payload, OffsetDateTime::now_utc());
                }
                Ok(_) => {}
                Err(e) => {
                    log::error!("[mqtt] connection error: {e:?}");
                    health.increment_reconnects();
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Traite un message entrant. L'instant de réception est fourni par
/// l'appelant, ce qui permet de dérouler des scénarios sans horloge réelle.
pub fn handle_publish(ctx: &IngestContext, topic: &str, payload: &[u8], received_at: OffsetDateTime) {
    let Ok(text) = std::str::from_utf8(payload) else {
        log::warn!("[mqtt] non UTF-8 payload on {topic}, dropped");
        return;
    };
    let text = text.trim();

    let device_id = if topic == ctx.temperature_topic {
        match text.parse::<f64>() {
            Ok(value) => {
                ingest_reading(ctx, value, received_at);
                Some(ctx.primary_device_id.clone())
            }
            Err(_) => {
                log::warn!("[mqtt] payload température invalide: {text}");
                None
            }
        }
    } else if topic == ctx.calibration_topic {
        match parse_calibration(text) {
            Some((sensor, value)) => {
                ingest_calibration(ctx, &sensor, value, received_at);
                Some(sensor)
            }
            None => {
                log::warn!("[mqtt] payload calibration invalide: {text}");
                None
            }
        }
    } else {
        None
    };

    if let Some(device_id) = device_id {
        if let Some(t) = ctx.engine.record_activity(&device_id, received_at) {
            log::info!("[liveness] {} -> online", t.device_id);
            publish_transition(&ctx.transition_log, &ctx.broadcaster, &t);
        }
    }
}

fn ingest_reading(ctx: &IngestContext, value: f64, received_at: OffsetDateTime) {
    let stamp = received_at.format(&Rfc3339).unwrap_or_default();
    // un stockage en panne ne doit pas priver le dashboard de la mesure
    if let Err(e) = ctx.storage.insert_reading(value, received_at) {
        log::warn!("[mqtt] failed to persist reading: {e}");
    }
    ctx.broadcaster.notify_reading(value, &stamp);
}

fn ingest_calibration(ctx: &IngestContext, sensor: &str, value: f64, received_at: OffsetDateTime) {
    let stamp = received_at.format(&Rfc3339).unwrap_or_default();
    if let Err(e) = ctx.storage.insert_calibration(sensor, value, received_at) {
        log::warn!("[mqtt] failed to persist calibration: {e}");
    }
    ctx.broadcaster.notify_calibration(sensor, value, &stamp);
}

/// Format attendu : "sonde3:24.7" (nom du capteur, deux-points, valeur).
fn parse_calibration(text: &str) -> Option<(String, f64)> {
    let (name, raw) = text.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = raw.trim().parse::<f64>().ok()?;
    Some((name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_payload_parsing() {
        assert_eq!(parse_calibration("sonde3:24.7"), Some(("sonde3".into(), 24.7)));
        assert_eq!(
            parse_calibration("  probe one : -3.5 "),
            Some(("probe one".into(), -3.5))
        );
        assert_eq!(parse_calibration("24.7"), None);
        assert_eq!(parse_calibration(":24.7"), None);
        assert_eq!(parse_calibration("sonde3:abc"), None);
        assert_eq!(parse_calibration(""), None);
    }
}
