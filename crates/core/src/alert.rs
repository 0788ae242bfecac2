//! Vital-sign alert entity and its status state machine.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

use crate::roles::Role;
use crate::rules::Threshold;
use crate::types::{AlertId, PatientId, Timestamp};

/// Where an alert is in its lifecycle.
///
/// `Pending` is the only non-terminal state. Exactly one of acknowledgment
/// or escalation moves an alert out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Pending,
    Acknowledged,
    Escalated,
}

impl AlertStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AlertStatus::Pending)
    }

    fn to_u8(self) -> u8 {
        match self {
            AlertStatus::Pending => 0,
            AlertStatus::Acknowledged => 1,
            AlertStatus::Escalated => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => AlertStatus::Pending,
            1 => AlertStatus::Acknowledged,
            _ => AlertStatus::Escalated,
        }
    }
}

/// An [`AlertStatus`] updated only by compare-and-set.
#[derive(Debug)]
pub struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub fn new(status: AlertStatus) -> Self {
        Self(AtomicU8::new(status.to_u8()))
    }

    pub fn load(&self) -> AlertStatus {
        AlertStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to` in a single atomic step.
    ///
    /// On failure returns the status another caller already set; the
    /// loser must treat its own transition as a no-op.
    pub fn transition(&self, from: AlertStatus, to: AlertStatus) -> Result<(), AlertStatus> {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(AlertStatus::from_u8)
    }
}

/// Who acknowledged an alert, and what they said.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgment {
    pub acknowledged_by: Role,
    pub user_id: String,
    pub status: Option<String>,
    pub note: Option<String>,
    pub at: Timestamp,
    /// Recorded after the alert had already escalated.
    pub late: bool,
}

/// Snapshot of an alert raised for a patient.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub alert_id: AlertId,
    pub patient_id: PatientId,
    pub vital_type: String,
    pub tier: String,
    pub vitals_window: Vec<f64>,
    pub threshold: Threshold,
    pub reasons: Vec<String>,
    pub recipients: Vec<Role>,
    pub escalation_recipients: Vec<Role>,
    pub timestamp: Timestamp,
    pub status: AlertStatus,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledgment: Option<Acknowledgment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_first_transition_out_of_pending_wins() {
        let status = AtomicStatus::new(AlertStatus::Pending);

        assert_eq!(
            status.transition(AlertStatus::Pending, AlertStatus::Acknowledged),
            Ok(())
        );
        assert_eq!(
            status.transition(AlertStatus::Pending, AlertStatus::Escalated),
            Err(AlertStatus::Acknowledged)
        );
        assert_eq!(status.load(), AlertStatus::Acknowledged);
    }

    #[test]
    fn concurrent_transitions_have_one_winner() {
        let status = std::sync::Arc::new(AtomicStatus::new(AlertStatus::Pending));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let status = std::sync::Arc::clone(&status);
                std::thread::spawn(move || {
                    let to = if i % 2 == 0 {
                        AlertStatus::Acknowledged
                    } else {
                        AlertStatus::Escalated
                    };
                    status.transition(AlertStatus::Pending, to).is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(status.load().is_terminal());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&AlertStatus::Escalated).unwrap(),
            "\"escalated\""
        );
    }
}
