/**
 * API REST THERMION - Surface de consultation du relais
 *
 * RÔLE :
 * Expose en JSON ce que le relais accumule : lectures récentes,
 * statistiques, calibrations, statuts de présence et journal des bascules.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, routes GET uniquement
 * - /ws pour le flux temps réel (voir module ws)
 * - erreurs HTTP standardisées (400 paramètres manquants, 500 stockage)
 */

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::health::{HealthTracker, RelayHealth};
use crate::liveness::SharedEngine;
use crate::models::{DeviceState, DeviceStatus, StatusLogRow};
use crate::storage::{Storage, StorageError, WindowStats};
use crate::ws::Broadcaster;

#[derive(Clone)]
pub struct AppState {
    pub engine: SharedEngine,
    pub storage: Storage,
    pub broadcaster: Broadcaster,
    pub health: HealthTracker,
}

/// Vue API du statut d'un capteur.
#[derive(Debug, serde::Serialize)]
pub struct DeviceStatusView {
    pub device_id: String,
    pub status: DeviceState,
    pub last_seen: Option<String>,
    pub silent_for_seconds: Option<i64>,
}

fn to_view(status: &DeviceStatus, now: OffsetDateTime) -> DeviceStatusView {
    DeviceStatusView {
        device_id: status.device_id.clone(),
        status: status.state,
        last_seen: status
            .last_seen
            .map(|t| t.format(&Rfc3339).unwrap_or_default()),
        silent_for_seconds: status.last_seen.map(|t| (now - t).whole_seconds().max(0)),
    }
}

fn internal_error(e: StorageError) -> StatusCode {
    log::error!("[http] storage error: {e}");
    StatusCode::INTERNAL_SERVER_ERROR
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/readings/initial", get(get_initial_readings))
        .route("/readings/range", get(get_readings_range))
        .route("/stats", get(get_stats))
        .route("/calibration/data", get(get_calibration_data))
        .route("/devices", get(get_devices))
        .route("/status/log", get(get_status_log))
        .route("/ws", get(crate::ws::ws_handler))
        .with_state(app_state)
}

#[derive(Debug, Deserialize)]
struct InitialParams {
    preload: Option<usize>,
    limite: Option<usize>,
}

// GET /readings/initial (préchargement du dashboard)
async fn get_initial_readings(
    State(app): State<AppState>,
    Query(params): Query<InitialParams>,
) -> Result<Json<Value>, StatusCode> {
    let limit = params.preload.or(params.limite).unwrap_or(300);
    let readings = app.storage.recent_readings(limit).map_err(internal_error)?;
    let latest = app.storage.latest_reading().map_err(internal_error)?;
    let stats = app.storage.stats_today().map_err(internal_error)?;
    Ok(Json(json!({
        "readings": readings,
        "latest": latest,
        "today_average": stats.average,
    })))
}

#[derive(Debug, Deserialize)]
struct PeriodParams {
    start: Option<String>,
    end: Option<String>,
    limit: Option<usize>,
}

// GET /stats (journée courante, ou ?start&end pour une période)
async fn get_stats(
    State(app): State<AppState>,
    Query(params): Query<PeriodParams>,
) -> Result<Json<WindowStats>, StatusCode> {
    let stats = match (params.start, params.end) {
        (Some(start), Some(end)) => app.storage.stats_period(&start, &end),
        _ => app.storage.stats_today(),
    };
    stats.map(Json).map_err(internal_error)
}

// GET /readings/range?start=YYYY-MM-DD&end=YYYY-MM-DD
async fn get_readings_range(
    State(app): State<AppState>,
    Query(params): Query<PeriodParams>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let (Some(start), Some(end)) = (params.start, params.end) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "start and end (YYYY-MM-DD) are required"})),
        ));
    };
    let limit = params.limit.unwrap_or(2000);
    let readings = app
        .storage
        .readings_between(&start, &end, limit)
        .map_err(|e| {
            (
                internal_error(e),
                Json(json!({"error": "storage failure"})),
            )
        })?;
    Ok(Json(json!({ "readings": readings })))
}

#[derive(Debug, Deserialize)]
struct CalibrationParams {
    sensor: Option<String>,
    start: Option<String>,
    end: Option<String>,
    limit: Option<usize>,
}

// GET /calibration/data?sensor&start&end&limit
async fn get_calibration_data(
    State(app): State<AppState>,
    Query(params): Query<CalibrationParams>,
) -> Result<Json<Value>, StatusCode> {
    let limit = params.limit.unwrap_or(2000);
    let sensor = params.sensor.as_deref();
    let samples = match (params.start, params.end) {
        (Some(start), Some(end)) => app
            .storage
            .calibration_between(&start, &end, limit, sensor),
        _ => app.storage.calibration_recent(limit, sensor),
    }
    .map_err(internal_error)?;
    Ok(Json(json!({ "samples": samples })))
}

// GET /devices (statuts courants, via le snapshot du moteur de présence)
async fn get_devices(State(app): State<AppState>) -> Json<Vec<DeviceStatusView>> {
    let now = OffsetDateTime::now_utc();
    let list = app
        .engine
        .snapshot()
        .iter()
        .map(|s| to_view(s, now))
        .collect();
    Json(list)
}

#[derive(Debug, Deserialize)]
struct StatusLogParams {
    limit: Option<usize>,
}

// GET /status/log (journal des bascules, plus récent d'abord)
async fn get_status_log(
    State(app): State<AppState>,
    Query(params): Query<StatusLogParams>,
) -> Result<Json<Vec<StatusLogRow>>, StatusCode> {
    app.storage
        .recent_status_events(params.limit.unwrap_or(100))
        .map(Json)
        .map_err(internal_error)
}

// GET /system/health (état du relais)
async fn get_system_health(State(app): State<AppState>) -> Json<RelayHealth> {
    Json(app.health.get_health(&app.engine, &app.storage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn device_view_reports_silence_age() {
        let now = datetime!(2026-08-07 12:01:00 UTC);
        let status = DeviceStatus {
            device_id: "main-probe".into(),
            state: DeviceState::Offline,
            last_seen: Some(datetime!(2026-08-07 12:00:00 UTC)),
        };
        let view = to_view(&status, now);
        assert_eq!(view.silent_for_seconds, Some(60));
        assert_eq!(view.last_seen.as_deref(), Some("2026-08-07T12:00:00Z"));
    }

    #[test]
    fn never_seen_device_has_no_age() {
        let view = to_view(
            &DeviceStatus {
                device_id: "ghost".into(),
                state: DeviceState::Offline,
                last_seen: None,
            },
            datetime!(2026-08-07 12:00:00 UTC),
        );
        assert_eq!(view.silent_for_seconds, None);
        assert_eq!(view.last_seen, None);
    }
}
