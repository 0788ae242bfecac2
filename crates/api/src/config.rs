use std::path::PathBuf;
use std::time::Duration;

use vitalwatch_events::lifecycle::{LifecycleConfig, DEFAULT_ALERT_SOURCE};
use vitalwatch_events::sink::DEFAULT_PUSH_TIMEOUT;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`). Not applied to the
    /// streaming endpoints.
    pub request_timeout_secs: u64,
    /// Time allowed for connections to drain on shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Alert rules JSON file. Missing or invalid files fall back to the
    /// built-in rules.
    pub alert_rules_path: PathBuf,
    /// `source` field stamped on every alert.
    pub alert_source: String,
    /// How long a WebSocket push may wait for the connection writer.
    pub push_send_timeout_ms: u64,
    /// How long acknowledged or escalated alerts remain queryable.
    pub resolved_alert_retention_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                  |
    /// |---------------------------------|--------------------------|
    /// | `HOST`                          | `0.0.0.0`                |
    /// | `PORT`                          | `3000`                   |
    /// | `CORS_ORIGINS`                  | `http://localhost:5173`  |
    /// | `REQUEST_TIMEOUT_SECS`          | `30`                     |
    /// | `SHUTDOWN_TIMEOUT_SECS`         | `30`                     |
    /// | `ALERT_RULES_PATH`              | `config/alert_rules.json`|
    /// | `ALERT_SOURCE`                  | `vitalwatch`             |
    /// | `PUSH_SEND_TIMEOUT_MS`          | `2000`                   |
    /// | `RESOLVED_ALERT_RETENTION_SECS` | `300`                    |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let alert_rules_path = std::env::var("ALERT_RULES_PATH")
            .unwrap_or_else(|_| "config/alert_rules.json".into())
            .into();

        let alert_source =
            std::env::var("ALERT_SOURCE").unwrap_or_else(|_| DEFAULT_ALERT_SOURCE.into());

        let push_send_timeout_ms: u64 = std::env::var("PUSH_SEND_TIMEOUT_MS")
            .unwrap_or_else(|_| DEFAULT_PUSH_TIMEOUT.as_millis().to_string())
            .parse()
            .expect("PUSH_SEND_TIMEOUT_MS must be a valid u64");

        let resolved_alert_retention_secs: u64 = std::env::var("RESOLVED_ALERT_RETENTION_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("RESOLVED_ALERT_RETENTION_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            alert_rules_path,
            alert_source,
            push_send_timeout_ms,
            resolved_alert_retention_secs,
        }
    }

    pub fn push_send_timeout(&self) -> Duration {
        Duration::from_millis(self.push_send_timeout_ms)
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            source: self.alert_source.clone(),
            resolved_retention: Duration::from_secs(self.resolved_alert_retention_secs),
        }
    }
}
