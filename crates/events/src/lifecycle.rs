//! Alert lifecycle: raise, acknowledge, escalate.
//!
//! The manager owns the alert table. Every alert starts `pending` and leaves
//! that state exactly once, through [`AtomicStatus::transition`]. Whichever
//! of acknowledgment or the escalation timer wins the compare-and-set does
//! the broadcast; the loser does nothing observable.
//!
//! Terminal alerts stay in the table for a retention window so late
//! acknowledgments can still be answered with the final state.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;
use vitalwatch_core::alert::{Acknowledgment, Alert, AlertStatus, AtomicStatus};
use vitalwatch_core::decision::Decision;
use vitalwatch_core::error::CoreError;
use vitalwatch_core::roles::Role;
use vitalwatch_core::types::AlertId;

use crate::event::AlertEvent;
use crate::registry::SubscriberRegistry;
use crate::scheduler::{EscalationScheduler, TimerHandle};

/// Default `source` stamped on raised alerts.
pub const DEFAULT_ALERT_SOURCE: &str = "vitalwatch";

/// How long acknowledged or escalated alerts remain queryable.
pub const DEFAULT_RESOLVED_RETENTION: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub source: String,
    pub resolved_retention: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            source: DEFAULT_ALERT_SOURCE.to_string(),
            resolved_retention: DEFAULT_RESOLVED_RETENTION,
        }
    }
}

/// The authenticated caller acknowledging an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledger {
    pub user_id: String,
    pub role: Role,
}

impl Acknowledger {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}

// ---------------------------------------------------------------------------
// Alert table entry
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct AlertEntry {
    /// Immutable part of the alert as raised; status and acknowledgment
    /// live in the fields below.
    alert: Alert,
    escalate_after: Duration,
    status: AtomicStatus,
    acknowledgment: Mutex<Option<Acknowledgment>>,
    timer: Mutex<Option<TimerHandle>>,
}

impl AlertEntry {
    fn new(alert: Alert, escalate_after: Duration) -> Self {
        Self {
            status: AtomicStatus::new(alert.status),
            alert,
            escalate_after,
            acknowledgment: Mutex::new(None),
            timer: Mutex::new(None),
        }
    }

    /// Consistent view of the alert. The acknowledgment lock is held while
    /// the status is read, so `acknowledged` always comes with its record.
    fn snapshot(&self) -> Alert {
        let acknowledgment = self.acknowledgment.lock();
        let mut alert = self.alert.clone();
        alert.status = self.status.load();
        alert.acknowledgment = acknowledgment.clone();
        alert
    }

    fn take_timer(&self) -> Option<TimerHandle> {
        self.timer.lock().take()
    }
}

// ---------------------------------------------------------------------------
// AlertLifecycleManager
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AlertLifecycleManager {
    registry: Arc<SubscriberRegistry>,
    scheduler: EscalationScheduler,
    alerts: Arc<DashMap<AlertId, Arc<AlertEntry>>>,
    config: LifecycleConfig,
}

impl AlertLifecycleManager {
    pub fn new(registry: Arc<SubscriberRegistry>, config: LifecycleConfig) -> Self {
        Self {
            registry,
            scheduler: EscalationScheduler::new(),
            alerts: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Create a pending alert from `decision`, send it to the tier's initial
    /// recipients and then arm its escalation timer.
    pub async fn raise(
        self: &Arc<Self>,
        patient_id: &str,
        decision: &Decision,
        context: Option<serde_json::Value>,
    ) -> Alert {
        let tier = &decision.tier;
        let alert = Alert {
            alert_id: Uuid::new_v4().simple().to_string(),
            patient_id: patient_id.to_string(),
            vital_type: decision.vital_type.clone(),
            tier: tier.name.clone(),
            vitals_window: decision.values(),
            threshold: decision.threshold,
            reasons: decision.reasons.clone(),
            recipients: tier.initial_recipients.clone(),
            escalation_recipients: tier.escalation_recipients.clone(),
            timestamp: decision.sample_time,
            status: AlertStatus::Pending,
            source: self.config.source.clone(),
            context,
            acknowledgment: None,
        };

        let entry = Arc::new(AlertEntry::new(
            alert.clone(),
            Duration::from_secs(tier.escalate_after_seconds),
        ));
        self.alerts.insert(alert.alert_id.clone(), Arc::clone(&entry));

        tracing::info!(
            alert_id = %alert.alert_id,
            patient_id = %alert.patient_id,
            tier = %alert.tier,
            vital_type = %alert.vital_type,
            "Alert raised"
        );

        self.registry
            .broadcast(&alert.patient_id, &alert.recipients, AlertEvent::raised(&alert))
            .await;

        self.arm_escalation(&entry);
        entry.snapshot()
    }

    fn arm_escalation(self: &Arc<Self>, entry: &Arc<AlertEntry>) {
        let alert_id = entry.alert.alert_id.clone();
        if entry.alert.escalation_recipients.is_empty() || entry.escalate_after.is_zero() {
            tracing::debug!(alert_id = %alert_id, "No escalation configured for alert");
            return;
        }

        let manager: Weak<Self> = Arc::downgrade(self);
        let timeout_id = alert_id.clone();
        let armed = self.scheduler.arm(&alert_id, entry.escalate_after, async move {
            if let Some(manager) = manager.upgrade() {
                manager.on_escalation_timeout(&timeout_id).await;
            }
        });

        match armed {
            Ok(handle) => {
                *entry.timer.lock() = Some(handle);
                // An acknowledgment that landed before the handle was stored
                // could not cancel it.
                if entry.status.load().is_terminal() {
                    if let Some(handle) = entry.take_timer() {
                        self.scheduler.cancel(&handle);
                    }
                }
            }
            Err(e) => {
                tracing::error!(
                    alert_id = %alert_id,
                    error = %e,
                    "Failed to arm escalation timer, alert stays pending"
                );
            }
        }
    }

    /// Acknowledge a pending alert on behalf of `by`.
    ///
    /// Fails with `NotFound` if the alert is unknown (or already evicted) or
    /// belongs to another patient. When the alert has already left
    /// `pending`, nothing is broadcast and the current state is returned.
    pub async fn acknowledge(
        &self,
        alert_id: &str,
        patient_id: &str,
        by: &Acknowledger,
        status: Option<String>,
        note: Option<String>,
    ) -> Result<Alert, CoreError> {
        let entry = self
            .alerts
            .get(alert_id)
            .map(|e| Arc::clone(e.value()))
            .filter(|e| e.alert.patient_id == patient_id)
            .ok_or_else(|| CoreError::NotFound {
                entity: "Alert",
                id: alert_id.to_string(),
            })?;

        let ack = Acknowledgment {
            acknowledged_by: by.role,
            user_id: by.user_id.clone(),
            status,
            note,
            at: Utc::now(),
            late: false,
        };

        // The status change and its record are made under one lock so no
        // reader sees `acknowledged` without the acknowledgment.
        let outcome = {
            let mut slot = entry.acknowledgment.lock();
            match entry.status.transition(AlertStatus::Pending, AlertStatus::Acknowledged) {
                Ok(()) => {
                    *slot = Some(ack.clone());
                    AckOutcome::Acknowledged
                }
                Err(AlertStatus::Escalated) if slot.is_none() => {
                    *slot = Some(Acknowledgment { late: true, ..ack.clone() });
                    AckOutcome::LateRecorded
                }
                Err(current) => AckOutcome::Ignored(current),
            }
        };

        match outcome {
            AckOutcome::Acknowledged => {
                if let Some(handle) = entry.take_timer() {
                    self.scheduler.cancel(&handle);
                }

                tracing::info!(
                    alert_id = %alert_id,
                    patient_id = %patient_id,
                    user_id = %by.user_id,
                    role = %by.role,
                    "Alert acknowledged"
                );

                let recipients = union_roles(
                    &entry.alert.recipients,
                    &entry.alert.escalation_recipients,
                );
                self.registry
                    .broadcast(
                        &entry.alert.patient_id,
                        &recipients,
                        AlertEvent::acknowledged(&entry.alert, &ack),
                    )
                    .await;
                self.retire(alert_id);
            }
            AckOutcome::LateRecorded => {
                tracing::info!(
                    alert_id = %alert_id,
                    user_id = %by.user_id,
                    "Late acknowledgment recorded for escalated alert"
                );
            }
            AckOutcome::Ignored(current) => {
                tracing::debug!(
                    alert_id = %alert_id,
                    status = ?current,
                    "Alert already resolved, acknowledgment ignored"
                );
            }
        }

        Ok(entry.snapshot())
    }

    /// Escalation timer callback. Broadcasts `alert_escalated` only if the
    /// alert is still pending.
    pub async fn on_escalation_timeout(&self, alert_id: &str) {
        let Some(entry) = self.alerts.get(alert_id).map(|e| Arc::clone(e.value())) else {
            return;
        };

        if let Err(current) = entry.status.transition(AlertStatus::Pending, AlertStatus::Escalated) {
            tracing::debug!(alert_id = %alert_id, status = ?current, "Escalation skipped");
            return;
        }
        entry.take_timer();

        tracing::warn!(
            alert_id = %alert_id,
            patient_id = %entry.alert.patient_id,
            tier = %entry.alert.tier,
            "Alert not acknowledged in time, escalating"
        );

        self.registry
            .broadcast(
                &entry.alert.patient_id,
                &entry.alert.escalation_recipients,
                AlertEvent::escalated(&entry.alert),
            )
            .await;
        self.retire(alert_id);
    }

    /// Evict a terminal alert once its retention window has passed.
    fn retire(&self, alert_id: &str) {
        let retention = self.config.resolved_retention;
        if retention.is_zero() {
            self.alerts.remove(alert_id);
            return;
        }

        let alerts = Arc::clone(&self.alerts);
        let id = alert_id.to_string();
        let evicted = self.scheduler.arm(alert_id, retention, async move {
            alerts.remove(&id);
        });
        if let Err(e) = evicted {
            tracing::debug!(alert_id = %alert_id, error = %e, "Evicting resolved alert immediately");
            self.alerts.remove(alert_id);
        }
    }

    /// Current state of a tracked alert.
    pub fn get(&self, alert_id: &str) -> Option<Alert> {
        self.alerts.get(alert_id).map(|e| e.snapshot())
    }

    /// Alerts still waiting for acknowledgment or escalation.
    pub fn active_count(&self) -> usize {
        self.alerts
            .iter()
            .filter(|e| e.status.load() == AlertStatus::Pending)
            .count()
    }

    /// Pending alerts for one patient.
    pub fn pending_for(&self, patient_id: &str) -> Vec<Alert> {
        self.alerts
            .iter()
            .filter(|e| e.alert.patient_id == patient_id && e.status.load() == AlertStatus::Pending)
            .map(|e| e.snapshot())
            .collect()
    }

    /// Cancel all escalation and eviction timers.
    pub fn shutdown(&self) {
        tracing::info!(pending = self.active_count(), "Shutting down alert lifecycle");
        self.scheduler.shutdown();
    }
}

enum AckOutcome {
    Acknowledged,
    LateRecorded,
    Ignored(AlertStatus),
}

/// `a ∪ b`, keeping first-seen order.
fn union_roles(a: &[Role], b: &[Role]) -> Vec<Role> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    for role in a.iter().chain(b) {
        if !out.contains(role) {
            out.push(*role);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
