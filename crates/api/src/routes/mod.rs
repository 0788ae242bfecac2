pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /alerts/ws?role=&patient_id=                     WebSocket (push delivery)
/// /alerts/stream?role=&patient_id=                 SSE (queue delivery)
/// /alerts/{alert_id}                               current alert state (GET)
/// /alerts/{alert_id}/acknowledge?patient_id=       acknowledge (POST)
///
/// /caregivers/alerts/stream?patient_ids=a,b        SSE for several patients
///
/// /patients/{patient_id}/alerts                    pending alerts (GET)
///
/// /vitals                                          ingest a reading (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/alerts/ws", get(ws::alert_ws_handler))
        .route("/alerts/stream", get(handlers::alerts::stream))
        .route("/alerts/{alert_id}", get(handlers::alerts::get_alert))
        .route(
            "/alerts/{alert_id}/acknowledge",
            post(handlers::alerts::acknowledge),
        )
        .route(
            "/caregivers/alerts/stream",
            get(handlers::alerts::caregiver_stream),
        )
        .route(
            "/patients/{patient_id}/alerts",
            get(handlers::alerts::pending_for_patient),
        )
        .route("/vitals", post(handlers::vitals::ingest))
}
