//! Subscriber registry.
//!
//! Maps `(patient | *, role)` keys to the sinks listening on them and fans
//! alert events out to the right set of sinks. The map is a [`DashMap`], so
//! subscribe, unsubscribe and broadcast only lock the shard holding the key
//! they touch; there is no registry-wide lock.
//!
//! A single sink may sit under several keys (an aggregate caregiver
//! subscription, or a patient key plus the wildcard). It still receives at
//! most one copy of each broadcast.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use vitalwatch_core::roles::Role;
use vitalwatch_core::types::PatientId;

use crate::event::AlertEvent;
use crate::sink::{AlertSink, SharedEvent, SinkError};

/// Identifier assigned to each registered sink.
pub type SinkId = u64;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Which patients a subscription covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatientScope {
    Patient(PatientId),
    /// Every patient (the `*` wildcard).
    All,
}

impl PatientScope {
    /// Parse a requested scope. Blank, `*` and `all` mean every patient.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") | Some("*") => PatientScope::All,
            Some(id) if id.eq_ignore_ascii_case("all") => PatientScope::All,
            Some(id) => PatientScope::Patient(id.to_string()),
        }
    }

    pub fn patient(id: impl Into<PatientId>) -> Self {
        PatientScope::Patient(id.into())
    }
}

impl fmt::Display for PatientScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatientScope::Patient(id) => f.write_str(id),
            PatientScope::All => f.write_str("*"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub scope: PatientScope,
    pub role: Role,
}

impl SubscriptionKey {
    pub fn new(scope: PatientScope, role: Role) -> Self {
        Self { scope, role }
    }
}

// ---------------------------------------------------------------------------
// Registrations and handles
// ---------------------------------------------------------------------------

/// One sink as stored under each of its keys.
#[derive(Clone)]
struct Registration {
    id: SinkId,
    sink: Arc<dyn AlertSink>,
    active: Arc<AtomicBool>,
    keys: Arc<[SubscriptionKey]>,
}

/// Returned by `subscribe` and `subscribe_many`; owns the full key list of
/// the registration so one `unsubscribe` can sweep all of them.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: SinkId,
    keys: Arc<[SubscriptionKey]>,
    active: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SinkId {
        self.id
    }

    pub fn keys(&self) -> &[SubscriptionKey] {
        &self.keys
    }

    /// False once unsubscribed, or once the registry dropped the sink after
    /// a failed delivery.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// A subscription that releases itself when dropped.
///
/// Transports hold one of these per connection, so a connection that goes
/// away for any reason is always swept from every key.
#[derive(Debug)]
pub struct SubscriptionGuard {
    registry: Arc<SubscriberRegistry>,
    handle: SubscriptionHandle,
}

impl SubscriptionGuard {
    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    pub fn release(&self) -> bool {
        self.registry.unsubscribe(&self.handle)
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Outcome counts for one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Queue sinks that were full; the event was dropped for them.
    pub dropped: usize,
    /// Sinks removed because they were closed or timed out.
    pub removed: usize,
}

// ---------------------------------------------------------------------------
// SubscriberRegistry
// ---------------------------------------------------------------------------

pub struct SubscriberRegistry {
    entries: DashMap<SubscriptionKey, Vec<Registration>>,
    next_id: AtomicU64,
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("keys", &self.entries.len())
            .finish()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `sink` under a single `(scope, role)` key.
    pub fn subscribe(
        &self,
        scope: PatientScope,
        role: Role,
        sink: Arc<dyn AlertSink>,
    ) -> SubscriptionHandle {
        self.register(vec![SubscriptionKey::new(scope, role)], sink)
    }

    /// Register one sink under `(patient, role)` for every patient in
    /// `patient_ids`. Duplicate ids are registered once.
    pub fn subscribe_many<I, P>(&self, patient_ids: I, role: Role, sink: Arc<dyn AlertSink>) -> SubscriptionHandle
    where
        I: IntoIterator<Item = P>,
        P: Into<PatientId>,
    {
        let mut seen = HashSet::new();
        let keys = patient_ids
            .into_iter()
            .map(|id| SubscriptionKey::new(PatientScope::Patient(id.into()), role))
            .filter(|key| seen.insert(key.clone()))
            .collect();
        self.register(keys, sink)
    }

    /// Same as [`subscribe`](Self::subscribe), wrapped in a guard that
    /// unsubscribes on drop.
    pub fn subscribe_guarded(
        self: &Arc<Self>,
        scope: PatientScope,
        role: Role,
        sink: Arc<dyn AlertSink>,
    ) -> SubscriptionGuard {
        SubscriptionGuard {
            registry: Arc::clone(self),
            handle: self.subscribe(scope, role, sink),
        }
    }

    /// Same as [`subscribe_many`](Self::subscribe_many), wrapped in a guard
    /// that unsubscribes on drop.
    pub fn subscribe_many_guarded<I, P>(
        self: &Arc<Self>,
        patient_ids: I,
        role: Role,
        sink: Arc<dyn AlertSink>,
    ) -> SubscriptionGuard
    where
        I: IntoIterator<Item = P>,
        P: Into<PatientId>,
    {
        SubscriptionGuard {
            registry: Arc::clone(self),
            handle: self.subscribe_many(patient_ids, role, sink),
        }
    }

    fn register(&self, keys: Vec<SubscriptionKey>, sink: Arc<dyn AlertSink>) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let keys: Arc<[SubscriptionKey]> = keys.into();
        let active = Arc::new(AtomicBool::new(true));
        let registration = Registration {
            id,
            sink,
            active: Arc::clone(&active),
            keys: Arc::clone(&keys),
        };

        for key in keys.iter() {
            self.entries
                .entry(key.clone())
                .or_default()
                .push(registration.clone());
        }

        tracing::debug!(
            sink_id = id,
            kind = ?registration.sink.kind(),
            keys = keys.len(),
            "Alert sink subscribed"
        );

        SubscriptionHandle { id, keys, active }
    }

    /// Remove the sink from every key it was registered under.
    ///
    /// The handle is deactivated before any key is swept, so broadcasts that
    /// start afterwards skip it even while the sweep is still running.
    /// Returns `true` only for the call that actually released it.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let was_active = handle.active.swap(false, Ordering::AcqRel);
        self.sweep(handle.id, &handle.keys);
        if was_active {
            tracing::debug!(sink_id = handle.id, "Alert sink unsubscribed");
        }
        was_active
    }

    fn sweep(&self, id: SinkId, keys: &[SubscriptionKey]) {
        for key in keys {
            let now_empty = match self.entries.get_mut(key) {
                Some(mut sinks) => {
                    sinks.retain(|r| r.id != id);
                    sinks.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.entries.remove_if(key, |_, sinks| sinks.is_empty());
            }
        }
    }

    /// Deliver `event` to every sink under `(patient_id, role)` and
    /// `(*, role)` for each role in `roles`.
    ///
    /// Each sink gets at most one copy. Deliveries run concurrently. A sink
    /// that is closed or times out is removed; a full queue drops the event
    /// for that sink only. Never fails.
    pub async fn broadcast(&self, patient_id: &str, roles: &[Role], event: AlertEvent) -> BroadcastReport {
        let targets = self.targets(patient_id, roles);
        let mut report = BroadcastReport::default();
        if targets.is_empty() {
            tracing::debug!(
                patient_id,
                event = event.name(),
                alert_id = event.alert_id(),
                "No subscribers for alert event"
            );
            return report;
        }

        let event: SharedEvent = Arc::new(event);
        let outcomes = join_all(targets.iter().map(|registration| {
            let event = Arc::clone(&event);
            async move {
                if !registration.active.load(Ordering::Acquire) {
                    return None;
                }
                Some(registration.sink.deliver(event).await)
            }
        }))
        .await;

        for (registration, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                None => {}
                Some(Ok(())) => report.delivered += 1,
                Some(Err(e @ SinkError::Overflow(_))) => {
                    report.dropped += 1;
                    tracing::warn!(
                        sink_id = registration.id,
                        patient_id,
                        event = event.name(),
                        alert_id = event.alert_id(),
                        error = %e,
                        "Dropping alert event for slow subscriber"
                    );
                }
                Some(Err(e)) => {
                    report.removed += 1;
                    tracing::warn!(
                        sink_id = registration.id,
                        kind = ?registration.sink.kind(),
                        patient_id,
                        event = event.name(),
                        error = %e,
                        "Removing failed alert sink"
                    );
                    registration.active.store(false, Ordering::Release);
                    self.sweep(registration.id, &registration.keys);
                }
            }
        }

        tracing::debug!(
            patient_id,
            event = event.name(),
            alert_id = event.alert_id(),
            delivered = report.delivered,
            dropped = report.dropped,
            removed = report.removed,
            "Alert event broadcast"
        );
        report
    }

    /// Snapshot the distinct active sinks a broadcast should reach.
    ///
    /// Shard guards are released before returning, so no lock is held while
    /// delivering.
    fn targets(&self, patient_id: &str, roles: &[Role]) -> Vec<Registration> {
        let mut seen_ids = HashSet::new();
        let mut seen_sinks = HashSet::new();
        let mut targets = Vec::new();
        let scopes = [PatientScope::patient(patient_id), PatientScope::All];

        for role in roles {
            for scope in &scopes {
                let key = SubscriptionKey::new(scope.clone(), *role);
                if let Some(sinks) = self.entries.get(&key) {
                    for registration in sinks.iter() {
                        if !registration.active.load(Ordering::Acquire) {
                            continue;
                        }
                        // The same sink object may be registered more than once.
                        let sink_ptr = Arc::as_ptr(&registration.sink) as *const () as usize;
                        if seen_ids.insert(registration.id) && seen_sinks.insert(sink_ptr) {
                            targets.push(registration.clone());
                        }
                    }
                }
            }
        }
        targets
    }

    /// Number of distinct sinks currently registered.
    pub fn subscriber_count(&self) -> usize {
        let mut ids = HashSet::new();
        for entry in self.entries.iter() {
            ids.extend(entry.value().iter().map(|r| r.id));
        }
        ids.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
