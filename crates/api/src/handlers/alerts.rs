//! Alert streams (queue delivery) and acknowledgment.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderName;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use vitalwatch_core::alert::Alert;
use vitalwatch_core::error::CoreError;
use vitalwatch_core::roles::Role;
use vitalwatch_events::lifecycle::Acknowledger;
use vitalwatch_events::registry::SubscriptionGuard;
use vitalwatch_events::sink::{QueueSink, SharedEvent};

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::middleware::rbac::{acknowledgment_role, resolve_subscription, RequireCaregiver};
use crate::response::DataResponse;
use crate::state::AppState;

/// Idle time after which an SSE stream emits a keepalive comment.
pub const SSE_KEEPALIVE_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub role: String,
    pub patient_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CaregiverStreamQuery {
    /// Comma-separated patient ids.
    #[serde(default)]
    pub patient_ids: String,
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeQuery {
    pub patient_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AcknowledgeRequest {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// GET /api/v1/alerts/stream?role=&patient_id= -- queue-delivered alert stream.
pub async fn stream(
    user: AuthUser,
    Query(query): Query<StreamQuery>,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let requested: Role = query.role.parse()?;
    let (scope, role) = resolve_subscription(&user, requested, query.patient_id.as_deref())?;

    let (sink, rx) = QueueSink::channel();
    let subscription = state
        .registry
        .subscribe_guarded(scope.clone(), role, Arc::new(sink));

    tracing::info!(
        user_id = %user.user_id,
        role = %role,
        patient_id = %scope,
        "SSE alert stream connected"
    );

    Ok(sse_response(rx, subscription))
}

/// GET /api/v1/caregivers/alerts/stream?patient_ids=a,b -- one stream for
/// every listed patient, delivered as caregiver.
pub async fn caregiver_stream(
    RequireCaregiver(user): RequireCaregiver,
    Query(query): Query<CaregiverStreamQuery>,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let patient_ids: Vec<String> = query
        .patient_ids
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();

    if patient_ids.is_empty() {
        return Err(CoreError::Validation("patient_ids must name at least one patient".into()).into());
    }

    let (sink, rx) = QueueSink::channel();
    let subscription = state.registry.subscribe_many_guarded(
        patient_ids.iter().cloned(),
        Role::Caregiver,
        Arc::new(sink),
    );

    tracing::info!(
        user_id = %user.user_id,
        patient_count = patient_ids.len(),
        "Caregiver SSE alert stream connected"
    );

    Ok(sse_response(rx, subscription))
}

/// Serve queued events as SSE. The subscription is released when the client
/// goes away and the stream is dropped.
fn sse_response(
    rx: mpsc::Receiver<SharedEvent>,
    subscription: SubscriptionGuard,
) -> impl IntoResponse {
    let events = ReceiverStream::new(rx).map(move |event| {
        // The stream owns the subscription.
        let _subscription = &subscription;
        Ok::<_, Infallible>(Event::default().data(event.to_json()))
    });

    (
        [(HeaderName::from_static("x-accel-buffering"), "no")],
        Sse::new(events).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(SSE_KEEPALIVE_SECS))
                .text("keepalive"),
        ),
    )
}

/// POST /api/v1/alerts/{alert_id}/acknowledge?patient_id=
///
/// Patients may only acknowledge their own alerts.
pub async fn acknowledge(
    user: AuthUser,
    Path(alert_id): Path<String>,
    Query(query): Query<AcknowledgeQuery>,
    State(state): State<AppState>,
    Json(body): Json<AcknowledgeRequest>,
) -> AppResult<Json<DataResponse<Alert>>> {
    let role = acknowledgment_role(&user, &query.patient_id)?;
    let by = Acknowledger::new(user.user_id.clone(), role);

    let alert = state
        .lifecycle
        .acknowledge(&alert_id, &query.patient_id, &by, body.status, body.note)
        .await?;

    Ok(Json(DataResponse { data: alert }))
}

/// GET /api/v1/patients/{patient_id}/alerts -- alerts still pending for a
/// patient, for clients catching up after a reconnect.
///
/// Patients may only list their own alerts.
pub async fn pending_for_patient(
    user: AuthUser,
    Path(patient_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Vec<Alert>>>> {
    if user.role == Role::Patient && user.user_id != patient_id {
        return Err(CoreError::Forbidden("Patients may only list their own alerts".into()).into());
    }

    let mut alerts = state.lifecycle.pending_for(&patient_id);
    alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(Json(DataResponse { data: alerts }))
}

/// GET /api/v1/alerts/{alert_id} -- current state of a tracked alert.
pub async fn get_alert(
    _user: AuthUser,
    Path(alert_id): Path<String>,
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Alert>>> {
    let alert = state.lifecycle.get(&alert_id).ok_or(CoreError::NotFound {
        entity: "Alert",
        id: alert_id,
    })?;
    Ok(Json(DataResponse { data: alert }))
}
