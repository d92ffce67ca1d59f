/**
 * THERMION RELAY - Point d'entrée du service
 *
 * RÔLE : Orchestration des modules : config, stockage, moteur de présence,
 * ingestion MQTT, sweep périodique, health, API REST + WebSocket.
 */

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;

use thermion_relay::config;
use thermion_relay::health::HealthTracker;
use thermion_relay::http::{self, AppState};
use thermion_relay::liveness::{self, LivenessEngine, SharedEngine};
use thermion_relay::mqtt::{self, IngestContext};
use thermion_relay::storage::Storage;
use thermion_relay::transition_log::TransitionLog;
use thermion_relay::ws::Broadcaster;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // ok si .env absent
    env_logger::init();

    let cfg = config::load_config().await;

    let storage = Storage::open(&cfg.database_path)
        .with_context(|| format!("failed to open database at {}", cfg.database_path))?;

    let engine: SharedEngine = Arc::new(LivenessEngine::new(cfg.liveness.offline_threshold()));
    let broadcaster = Broadcaster::new(1000);
    let transition_log = TransitionLog::spawn(storage.clone());
    let health = HealthTracker::new();

    // ingestion MQTT : remplit le stockage, le fan-out et le moteur de présence
    let (mqtt_client, eventloop) = mqtt::create_mqtt_client(&cfg);
    let ctx = IngestContext {
        engine: engine.clone(),
        storage: storage.clone(),
        broadcaster: broadcaster.clone(),
        transition_log: transition_log.clone(),
        temperature_topic: cfg.topics.temperature.clone(),
        calibration_topic: cfg.topics.calibration.clone(),
        primary_device_id: cfg.topics.primary_device_id.clone(),
    };
    mqtt::spawn_ingest_loop(mqtt_client.clone(), eventloop, ctx, health.clone());

    // passe périodique de présence
    liveness::spawn_sweep_loop(
        engine.clone(),
        transition_log.clone(),
        broadcaster.clone(),
        cfg.liveness.sweep_period(),
    );

    // publication auto du health
    health.spawn_health_publisher(mqtt_client, engine.clone(), storage.clone());

    let app_state = AppState {
        engine,
        storage,
        broadcaster,
        health,
    };
    let app = http::build_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    log::info!("[relay] listening on http://{addr}");
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
