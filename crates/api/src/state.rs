use std::sync::Arc;

use vitalwatch_core::rules::AlertRules;
use vitalwatch_events::{AlertLifecycleManager, AlertPipeline, SubscriberRegistry};

use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Who is listening for which patient's alerts.
    pub registry: Arc<SubscriberRegistry>,
    /// Alert table; acknowledgment and escalation.
    pub lifecycle: Arc<AlertLifecycleManager>,
    /// Vital readings in, alerts out.
    pub pipeline: Arc<AlertPipeline>,
    /// Open alert WebSockets (heartbeat and shutdown).
    pub ws_manager: Arc<WsManager>,
}

impl AppState {
    /// Construct every alert service from `config` and `rules`.
    pub fn new(config: ServerConfig, rules: AlertRules) -> Self {
        let registry = Arc::new(SubscriberRegistry::new());
        let lifecycle = Arc::new(AlertLifecycleManager::new(
            Arc::clone(&registry),
            config.lifecycle(),
        ));
        let pipeline = Arc::new(AlertPipeline::new(rules, Arc::clone(&lifecycle)));

        Self {
            config: Arc::new(config),
            registry,
            lifecycle,
            pipeline,
            ws_manager: Arc::new(WsManager::new()),
        }
    }
}
