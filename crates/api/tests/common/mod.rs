#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use vitalwatch_api::config::ServerConfig;
use vitalwatch_api::router::build_app_router;
use vitalwatch_api::state::AppState;
use vitalwatch_core::rules::AlertRules;

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default)
/// and a 30-second request timeout.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        alert_rules_path: "does-not-exist.json".into(),
        alert_source: "vitalwatch-test".to_string(),
        push_send_timeout_ms: 2000,
        resolved_alert_retention_secs: 300,
    }
}

/// Application state with the given rules, for tests that need to reach the
/// services behind the router.
pub fn build_test_state(rules: AlertRules) -> AppState {
    AppState::new(test_config(), rules)
}

/// Build the full application router with the built-in alert rules.
///
/// Uses the same builder as `main.rs` so integration tests exercise the
/// production middleware stack.
pub fn build_test_app() -> (Router, AppState) {
    let state = build_test_state(AlertRules::default());
    let app = build_app_router(state.clone(), &test_config());
    (app, state)
}

/// Caller identity sent with a request.
#[derive(Debug, Clone, Copy)]
pub struct Caller<'a> {
    pub user_id: &'a str,
    pub role: &'a str,
}

pub const fn caller<'a>(user_id: &'a str, role: &'a str) -> Caller<'a> {
    Caller { user_id, role }
}

fn request(method: Method, uri: &str, who: Option<Caller<'_>>, body: Option<serde_json::Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(who) = who {
        builder = builder
            .header("x-user-id", who.user_id)
            .header("x-user-role", who.role);
    }
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Anonymous GET.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(request(Method::GET, uri, None, None)).await.unwrap()
}

/// GET as `who`.
pub async fn get_as(app: Router, uri: &str, who: Caller<'_>) -> Response<Body> {
    app.oneshot(request(Method::GET, uri, Some(who), None))
        .await
        .unwrap()
}

/// POST a JSON body as `who`.
pub async fn post_json_as(
    app: Router,
    uri: &str,
    who: Caller<'_>,
    body: serde_json::Value,
) -> Response<Body> {
    app.oneshot(request(Method::POST, uri, Some(who), Some(body)))
        .await
        .unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Read the next `data:` payload from an SSE response body, skipping
/// keepalive comments.
pub async fn next_sse_event(body: &mut Body) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), body.frame())
            .await
            .expect("timed out waiting for SSE frame")
            .expect("SSE stream ended")
            .unwrap();
        let Ok(data) = frame.into_data() else {
            continue;
        };
        let text = String::from_utf8(data.to_vec()).unwrap();
        if let Some(payload) = text
            .lines()
            .find_map(|line| line.strip_prefix("data:"))
        {
            return serde_json::from_str(payload.trim()).unwrap();
        }
    }
}

/// Post three readings of `value` for `patient_id` as that patient.
pub async fn post_streak(app: &Router, patient_id: &str, value: f64) -> serde_json::Value {
    let mut last = serde_json::Value::Null;
    for _ in 0..3 {
        let response = post_json_as(
            app.clone(),
            "/api/v1/vitals",
            caller(patient_id, "patient"),
            serde_json::json!({
                "patientId": patient_id,
                "vitalType": "heart_rate",
                "value": value,
                "unit": "bpm",
            }),
        )
        .await;
        assert_eq!(response.status(), 200);
        last = body_json(response).await;
    }
    last
}
