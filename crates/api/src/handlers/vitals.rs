//! Vital reading ingestion.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use vitalwatch_core::alert::Alert;
use vitalwatch_core::error::CoreError;
use vitalwatch_core::roles::Role;
use vitalwatch_core::types::Timestamp;
use vitalwatch_core::vitals::VitalReading;
use vitalwatch_events::pipeline::extract_context;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalPayload {
    #[serde(alias = "patient_id")]
    pub patient_id: String,
    #[serde(alias = "vital_type", alias = "type")]
    pub vital_type: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// False when the value was not numeric or the vital type was blank.
    pub accepted: bool,
    /// The alert this reading raised, if any.
    pub alert: Option<Alert>,
}

/// POST /api/v1/vitals -- feed one reading into the alert pipeline.
///
/// Patients may only submit their own readings.
pub async fn ingest(
    user: AuthUser,
    State(state): State<AppState>,
    Json(raw): Json<serde_json::Value>,
) -> AppResult<Json<DataResponse<IngestResponse>>> {
    let payload: VitalPayload = serde_json::from_value(raw.clone())
        .map_err(|e| AppError::BadRequest(format!("Invalid vital reading: {e}")))?;

    if user.role == Role::Patient && user.user_id != payload.patient_id {
        return Err(AppError::Core(CoreError::Forbidden(
            "Patients may only submit their own vitals".into(),
        )));
    }

    let Some(reading) = VitalReading::from_raw(
        payload.patient_id.trim(),
        &payload.vital_type,
        &payload.value,
        payload.unit.as_deref(),
        payload.timestamp,
    ) else {
        tracing::debug!(
            patient_id = %payload.patient_id,
            vital_type = %payload.vital_type,
            "Ignoring unusable vital reading"
        );
        return Ok(Json(DataResponse {
            data: IngestResponse {
                accepted: false,
                alert: None,
            },
        }));
    };

    let alert = state
        .pipeline
        .process_reading(&reading, extract_context(&raw))
        .await;

    Ok(Json(DataResponse {
        data: IngestResponse {
            accepted: true,
            alert,
        },
    }))
}
