//! Scénarios de bout en bout sur la chaîne d'ingestion : payload MQTT ->
//! stockage + fan-out + moteur de présence, avec des instants synthétiques.

use std::sync::Arc;

use serde_json::json;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

use thermion_devkit::{init_test_logging, EventCollector, ProbeMessageBuilder};
use thermion_relay::liveness::{publish_transition, LivenessEngine};
use thermion_relay::models::DeviceState;
use thermion_relay::mqtt::{handle_publish, IngestContext};
use thermion_relay::storage::Storage;
use thermion_relay::transition_log::TransitionLog;
use thermion_relay::ws::Broadcaster;

const T0: OffsetDateTime = datetime!(2026-08-07 12:00:00 UTC);
const TEMP_TOPIC: &str = "thermion/sensors/temperature@v1";
const CAL_TOPIC: &str = "thermion/sensors/calibration@v1";

fn test_ctx(threshold_seconds: i64) -> IngestContext {
    init_test_logging();
    let storage = Storage::open_in_memory().unwrap();
    IngestContext {
        engine: Arc::new(LivenessEngine::new(Duration::seconds(threshold_seconds))),
        storage: storage.clone(),
        broadcaster: Broadcaster::new(64),
        transition_log: TransitionLog::spawn(storage),
        temperature_topic: TEMP_TOPIC.into(),
        calibration_topic: CAL_TOPIC.into(),
        primary_device_id: "main-probe".into(),
    }
}

async fn wait_for_status_rows(ctx: &IngestContext, expected: usize) -> Vec<thermion_relay::models::StatusLogRow> {
    for _ in 0..100 {
        let rows = ctx.storage.recent_status_events(50).unwrap();
        if rows.len() >= expected {
            return rows;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    ctx.storage.recent_status_events(50).unwrap()
}

#[tokio::test]
async fn temperature_message_persists_broadcasts_and_onlines_primary() {
    let ctx = test_ctx(45);
    let mut rx = ctx.broadcaster.subscribe();

    let payload = ProbeMessageBuilder::temperature_padded(23.5);
    handle_publish(&ctx, TEMP_TOPIC, payload.as_bytes(), T0);

    let events = EventCollector::drain(&mut rx);
    events.assert_count("reading", 1).unwrap();
    events.assert_count("device_status", 1).unwrap();
    events
        .assert_field_equals("reading", 0, "value", &json!(23.5))
        .unwrap();
    events
        .assert_field_equals("device_status", 0, "device_id", &json!("main-probe"))
        .unwrap();
    events
        .assert_field_equals("device_status", 0, "status", &json!("online"))
        .unwrap();

    let readings = ctx.storage.recent_readings(10).unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].value, 23.5);

    let snapshot = ctx.engine.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].state, DeviceState::Online);
}

#[tokio::test]
async fn repeated_messages_emit_no_extra_status_events() {
    let ctx = test_ctx(45);
    let mut rx = ctx.broadcaster.subscribe();

    for i in 0..5 {
        let payload = ProbeMessageBuilder::temperature(20.0 + i as f64);
        handle_publish(&ctx, TEMP_TOPIC, payload.as_bytes(), T0 + Duration::seconds(i * 10));
    }

    let events = EventCollector::drain(&mut rx);
    events.assert_count("reading", 5).unwrap();
    // une seule bascule online, au premier message
    events.assert_count("device_status", 1).unwrap();
    let rows = wait_for_status_rows(&ctx, 1).await;
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn malformed_payloads_are_dropped_without_state_change() {
    let ctx = test_ctx(45);
    let mut rx = ctx.broadcaster.subscribe();

    handle_publish(&ctx, TEMP_TOPIC, ProbeMessageBuilder::garbled().as_bytes(), T0);
    handle_publish(
        &ctx,
        CAL_TOPIC,
        ProbeMessageBuilder::calibration_missing_separator().as_bytes(),
        T0,
    );
    handle_publish(
        &ctx,
        CAL_TOPIC,
        ProbeMessageBuilder::calibration_missing_value().as_bytes(),
        T0,
    );
    handle_publish(&ctx, TEMP_TOPIC, &[0xff, 0xfe], T0);

    let events = EventCollector::drain(&mut rx);
    assert!(events.is_empty());
    assert!(ctx.engine.snapshot().is_empty());
    assert!(ctx.storage.recent_readings(10).unwrap().is_empty());
    assert!(ctx.storage.calibration_recent(10, None).unwrap().is_empty());
}

#[tokio::test]
async fn calibration_message_registers_named_sensor() {
    let ctx = test_ctx(45);
    let mut rx = ctx.broadcaster.subscribe();

    let payload = ProbeMessageBuilder::calibration("sonde-a", 24.7);
    handle_publish(&ctx, CAL_TOPIC, payload.as_bytes(), T0);

    let events = EventCollector::drain(&mut rx);
    events.assert_count("calibration", 1).unwrap();
    events
        .assert_field_equals("calibration", 0, "sensor", &json!("sonde-a"))
        .unwrap();
    events
        .assert_field_equals("device_status", 0, "device_id", &json!("sonde-a"))
        .unwrap();

    let samples = ctx.storage.calibration_recent(10, Some("sonde-a")).unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].value, 24.7);
}

#[tokio::test]
async fn offline_then_back_online_full_cycle() {
    // seuil 30s : envoi à t=0, sweep à 10s (rien), sweep à 35s (offline),
    // nouvel envoi à 40s (online). Trois événements au total.
    let ctx = test_ctx(30);
    let mut rx = ctx.broadcaster.subscribe();

    let payload = ProbeMessageBuilder::temperature(22.0);
    handle_publish(&ctx, TEMP_TOPIC, payload.as_bytes(), T0);

    assert!(ctx.engine.sweep(T0 + Duration::seconds(10)).is_empty());

    let flipped = ctx.engine.sweep(T0 + Duration::seconds(35));
    assert_eq!(flipped.len(), 1);
    for t in &flipped {
        publish_transition(&ctx.transition_log, &ctx.broadcaster, t);
    }

    handle_publish(
        &ctx,
        TEMP_TOPIC,
        ProbeMessageBuilder::temperature(22.5).as_bytes(),
        T0 + Duration::seconds(40),
    );

    let events = EventCollector::drain(&mut rx);
    events.assert_count("device_status", 3).unwrap();
    events
        .assert_field_equals("device_status", 0, "status", &json!("online"))
        .unwrap();
    events
        .assert_field_equals("device_status", 1, "status", &json!("offline"))
        .unwrap();
    events
        .assert_field_equals("device_status", 2, "status", &json!("online"))
        .unwrap();

    // le journal durable voit les mêmes bascules, plus récente d'abord
    let rows = wait_for_status_rows(&ctx, 3).await;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].status, "online");
    assert_eq!(rows[1].status, "offline");
    assert_eq!(rows[2].status, "online");
    assert_eq!(rows[1].recorded_at, "2026-08-07T12:00:35Z");
}

#[tokio::test]
async fn late_joiner_snapshot_includes_offline_devices() {
    // deux capteurs suivis, un online un offline : un viewer qui arrive
    // doit recevoir les deux dans le replay, pas seulement les futures bascules
    let ctx = test_ctx(30);

    handle_publish(
        &ctx,
        CAL_TOPIC,
        ProbeMessageBuilder::calibration("sonde-a", 1.0).as_bytes(),
        T0,
    );
    handle_publish(
        &ctx,
        TEMP_TOPIC,
        ProbeMessageBuilder::temperature(20.0).as_bytes(),
        T0 + Duration::seconds(40),
    );
    // sonde-a est muette depuis 65s, main-probe depuis 25s seulement
    ctx.engine.sweep(T0 + Duration::seconds(65));

    let snapshot = ctx.engine.snapshot();
    assert_eq!(snapshot.len(), 2);
    let state_of = |id: &str| {
        snapshot
            .iter()
            .find(|s| s.device_id == id)
            .map(|s| s.state)
            .unwrap()
    };
    assert_eq!(state_of("sonde-a"), DeviceState::Offline);
    assert_eq!(state_of("main-probe"), DeviceState::Online);
}
