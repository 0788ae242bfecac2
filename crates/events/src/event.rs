//! Outbound alert events.
//!
//! [`AlertEvent`] is what observers receive. It serializes to the wire shape
//! clients consume, tagged by an `event` field:
//!
//! ```json
//! { "event": "alert", "alertId": "…", "tier": "critical", "patientId": "…", … }
//! ```

use chrono::Utc;
use serde::Serialize;
use vitalwatch_core::alert::{Acknowledgment, Alert};
use vitalwatch_core::roles::Role;
use vitalwatch_core::rules::Threshold;
use vitalwatch_core::types::{AlertId, PatientId, Timestamp};

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Body of `alert` and `alert_escalated` events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertNotice {
    pub alert_id: AlertId,
    pub tier: String,
    pub patient_id: PatientId,
    pub vital_type: String,
    pub vitals_window: Vec<f64>,
    pub threshold: Threshold,
    pub reasons: Vec<String>,
    /// Roles this particular event was addressed to.
    pub recipients: Vec<Role>,
    pub timestamp: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    pub source: String,
}

/// Body of `alert_acknowledged` events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AckNotice {
    pub alert_id: AlertId,
    pub patient_id: PatientId,
    pub tier: String,
    pub timestamp: Timestamp,
    pub acknowledged_by: Role,
    pub user_id: String,
    pub status: Option<String>,
    pub note: Option<String>,
}

// ---------------------------------------------------------------------------
// AlertEvent
// ---------------------------------------------------------------------------

/// A state change of an alert, as delivered to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AlertEvent {
    /// A new alert, addressed to the tier's initial recipients.
    Alert(AlertNotice),
    /// Nobody acknowledged in time; addressed to the escalation recipients.
    AlertEscalated(AlertNotice),
    /// Someone acknowledged the alert before it escalated.
    AlertAcknowledged(AckNotice),
}

impl AlertEvent {
    /// The initial `alert` event for a freshly raised alert.
    pub fn raised(alert: &Alert) -> Self {
        AlertEvent::Alert(notice(alert, alert.recipients.clone(), alert.timestamp))
    }

    /// The `alert_escalated` event, stamped with the escalation time.
    pub fn escalated(alert: &Alert) -> Self {
        AlertEvent::AlertEscalated(notice(
            alert,
            alert.escalation_recipients.clone(),
            Utc::now(),
        ))
    }

    pub fn acknowledged(alert: &Alert, ack: &Acknowledgment) -> Self {
        AlertEvent::AlertAcknowledged(AckNotice {
            alert_id: alert.alert_id.clone(),
            patient_id: alert.patient_id.clone(),
            tier: alert.tier.clone(),
            timestamp: ack.at,
            acknowledged_by: ack.acknowledged_by,
            user_id: ack.user_id.clone(),
            status: ack.status.clone(),
            note: ack.note.clone(),
        })
    }

    /// Wire name of the event (`"alert"`, `"alert_escalated"`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            AlertEvent::Alert(_) => "alert",
            AlertEvent::AlertEscalated(_) => "alert_escalated",
            AlertEvent::AlertAcknowledged(_) => "alert_acknowledged",
        }
    }

    pub fn alert_id(&self) -> &str {
        match self {
            AlertEvent::Alert(n) | AlertEvent::AlertEscalated(n) => &n.alert_id,
            AlertEvent::AlertAcknowledged(a) => &a.alert_id,
        }
    }

    pub fn patient_id(&self) -> &str {
        match self {
            AlertEvent::Alert(n) | AlertEvent::AlertEscalated(n) => &n.patient_id,
            AlertEvent::AlertAcknowledged(a) => &a.patient_id,
        }
    }

    /// JSON text for transports that write strings.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, event = self.name(), "Failed to serialize alert event");
            String::from("{}")
        })
    }
}

fn notice(alert: &Alert, recipients: Vec<Role>, timestamp: Timestamp) -> AlertNotice {
    AlertNotice {
        alert_id: alert.alert_id.clone(),
        tier: alert.tier.clone(),
        patient_id: alert.patient_id.clone(),
        vital_type: alert.vital_type.clone(),
        vitals_window: alert.vitals_window.clone(),
        threshold: alert.threshold,
        reasons: alert.reasons.clone(),
        recipients,
        timestamp,
        context: alert.context.clone(),
        source: alert.source.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
