use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use vitalwatch_core::roles::Role;
use vitalwatch_events::lifecycle::Acknowledger;
use vitalwatch_events::registry::PatientScope;
use vitalwatch_events::sink::{PushFrame, PushSink};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::middleware::rbac::{acknowledgment_role, resolve_subscription};
use crate::state::AppState;

/// Outbound frames buffered per connection before pushes start waiting.
const PUSH_BUFFER: usize = 32;

#[derive(Debug, Deserialize)]
pub struct AlertSocketQuery {
    pub role: String,
    pub patient_id: Option<String>,
}

/// Inbound client frame. Only `{"event": "ack", ...}` is acted on.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(alias = "type")]
    event: Option<String>,
    #[serde(rename = "alertId", alias = "alert_id")]
    alert_id: Option<String>,
    #[serde(rename = "patientId", alias = "patient_id")]
    patient_id: Option<String>,
    status: Option<String>,
    note: Option<String>,
}

/// GET /api/v1/alerts/ws -- upgrade to a push-delivery alert socket.
///
/// The subscription key is checked before upgrading, so a forbidden scope
/// is rejected with a plain HTTP error.
pub async fn alert_ws_handler(
    ws: WebSocketUpgrade,
    user: AuthUser,
    Query(query): Query<AlertSocketQuery>,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let requested: Role = query.role.parse()?;
    let (scope, role) = resolve_subscription(&user, requested, query.patient_id.as_deref())?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user, scope, role)))
}

/// Manage a single alert WebSocket after upgrade.
///
///   1. Subscribes a push sink for the connection in the registry.
///   2. Spawns a writer task that drains the sink's frames to the socket.
///   3. Processes inbound acknowledgment frames on the current task.
///   4. Unsubscribes and cleans up on disconnect.
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    user: AuthUser,
    scope: PatientScope,
    role: Role,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();

    let (sink, mut frames) = PushSink::channel(PUSH_BUFFER, state.config.push_send_timeout());
    state
        .ws_manager
        .add(conn_id.clone(), sink.sender())
        .await;
    let subscription = state
        .registry
        .subscribe_guarded(scope.clone(), role, Arc::new(sink));

    tracing::info!(
        conn_id = %conn_id,
        user_id = %user.user_id,
        role = %role,
        patient_id = %scope,
        "Alert WebSocket connected"
    );

    let (mut ws_sink, mut stream) = socket.split();

    // Writer task: forward alert events, pings and close frames.
    let writer_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let msg = match frame {
                PushFrame::Event(event) => Message::Text(event.to_json().into()),
                PushFrame::Keepalive => Message::Ping(Bytes::new()),
                PushFrame::Close => {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if ws_sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %writer_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    // Receiver loop: acknowledgments from the client.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_client_frame(&state, &user, &scope, text.as_str()).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    subscription.release();
    state.ws_manager.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "Alert WebSocket disconnected");
}

/// Act on one inbound frame. Acknowledgments follow the same rules as the
/// HTTP endpoint; the subscription scope supplies a missing `patientId`.
async fn handle_client_frame(state: &AppState, user: &AuthUser, scope: &PatientScope, raw: &str) {
    let Ok(frame) = serde_json::from_str::<ClientFrame>(raw) else {
        return;
    };
    if frame.event.as_deref() != Some("ack") {
        return;
    }

    let patient_id = frame.patient_id.or_else(|| match scope {
        PatientScope::Patient(id) => Some(id.clone()),
        PatientScope::All => None,
    });
    let (Some(alert_id), Some(patient_id)) = (frame.alert_id, patient_id) else {
        return;
    };

    let acknowledged = match acknowledgment_role(user, &patient_id) {
        Ok(role) => {
            let by = Acknowledger::new(user.user_id.clone(), role);
            state
                .lifecycle
                .acknowledge(&alert_id, &patient_id, &by, frame.status, frame.note)
                .await
                .map_err(AppError::from)
        }
        Err(e) => Err(e),
    };
    if let Err(e) = acknowledged {
        tracing::debug!(
            alert_id = %alert_id,
            user_id = %user.user_id,
            error = %e,
            "WebSocket acknowledgment rejected"
        );
    }
}
