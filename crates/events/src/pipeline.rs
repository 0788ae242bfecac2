//! Reading ingestion: window, evaluate, raise.

use std::sync::Arc;

use vitalwatch_core::alert::Alert;
use vitalwatch_core::decision::DecisionEngine;
use vitalwatch_core::rules::AlertRules;
use vitalwatch_core::vitals::VitalReading;
use vitalwatch_core::window::VitalWindows;

use crate::lifecycle::AlertLifecycleManager;

/// Turns vital readings into alerts.
#[derive(Debug)]
pub struct AlertPipeline {
    engine: DecisionEngine,
    windows: VitalWindows,
    lifecycle: Arc<AlertLifecycleManager>,
}

impl AlertPipeline {
    pub fn new(rules: AlertRules, lifecycle: Arc<AlertLifecycleManager>) -> Self {
        Self {
            windows: VitalWindows::for_rules(&rules),
            engine: DecisionEngine::new(rules),
            lifecycle,
        }
    }

    /// Add `reading` to its window and raise an alert if a tier is crossed.
    ///
    /// The window is cleared after an alert so the same streak does not fire
    /// again on the next reading.
    pub async fn process_reading(
        &self,
        reading: &VitalReading,
        context: Option<serde_json::Value>,
    ) -> Option<Alert> {
        let decision = self.windows.push_and_take(
            &reading.patient_id,
            &reading.vital_type,
            reading.sample(),
            |window| {
                self.engine
                    .evaluate(&reading.patient_id, &reading.vital_type, window)
            },
        )?;

        Some(self.lifecycle.raise(&reading.patient_id, &decision, context).await)
    }
}

/// Alert context carried by an ingestion payload.
///
/// Merges the `context` and `metadata` objects (later keys win) and copies a
/// top-level `age`. Returns `None` when nothing is present.
pub fn extract_context(payload: &serde_json::Value) -> Option<serde_json::Value> {
    let data = payload.as_object()?;
    let mut context = serde_json::Map::new();

    for key in ["context", "metadata"] {
        if let Some(serde_json::Value::Object(fields)) = data.get(key) {
            context.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }
    if let Some(age) = data.get("age").filter(|v| !v.is_null()) {
        context.insert("age".to_string(), age.clone());
    }

    (!context.is_empty()).then(|| serde_json::Value::Object(context))
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;
    use tokio::sync::mpsc;
    use vitalwatch_core::roles::Role;
    use vitalwatch_core::rules::{Threshold, TierPolicy, VitalRule};

    use super::*;
    use crate::lifecycle::LifecycleConfig;
    use crate::registry::{PatientScope, SubscriberRegistry};
    use crate::sink::{QueueSink, SharedEvent};

    fn pipeline() -> (AlertPipeline, mpsc::Receiver<SharedEvent>) {
        let registry = Arc::new(SubscriberRegistry::new());
        let (sink, rx) = QueueSink::channel();
        registry.subscribe(PatientScope::patient("p1"), Role::Patient, Arc::new(sink));
        let lifecycle = Arc::new(AlertLifecycleManager::new(registry, LifecycleConfig::default()));
        (AlertPipeline::new(AlertRules::default(), lifecycle), rx)
    }

    fn reading(value: serde_json::Value, offset_secs: i64) -> VitalReading {
        VitalReading::from_raw(
            "p1",
            "heart_rate",
            &value,
            Some("bpm"),
            Some(Utc::now() + Duration::seconds(offset_secs)),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_violation_raises_most_severe_tier() {
        let (pipeline, mut rx) = pipeline();

        assert!(pipeline.process_reading(&reading(json!(190), 0), None).await.is_none());
        assert!(pipeline.process_reading(&reading(json!("192"), 1), None).await.is_none());
        let alert = pipeline
            .process_reading(&reading(json!(188.0), 2), Some(json!({"age": 71})))
            .await
            .expect("critical alert");

        assert_eq!(alert.tier, "critical");
        assert_eq!(alert.vitals_window, vec![190.0, 192.0, 188.0]);
        assert_eq!(alert.context, Some(json!({"age": 71})));
        assert_eq!(rx.try_recv().unwrap().name(), "alert");

        // Window restarts after an alert.
        assert!(pipeline.process_reading(&reading(json!(190), 3), None).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn in_range_readings_raise_nothing() {
        let (pipeline, mut rx) = pipeline();
        for i in 0..5 {
            assert!(pipeline.process_reading(&reading(json!(80), i), None).await.is_none());
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn broken_vital_rules_do_not_affect_others() {
        let rules = AlertRules::empty()
            .with_level(TierPolicy::new("critical", 3).with_initial_recipients(vec![Role::Caregiver]))
            .with_vital(
                "heart_rate",
                VitalRule::default().with_level("critical", Threshold::new(Some(40.0), Some(180.0))),
            )
            .with_vital(
                "spo2",
                VitalRule::default().with_level("critical", Threshold::new(Some(95.0), Some(90.0))),
            );
        let registry = Arc::new(SubscriberRegistry::new());
        let lifecycle = Arc::new(AlertLifecycleManager::new(registry, LifecycleConfig::default()));
        let pipeline = AlertPipeline::new(rules, lifecycle);

        for i in 0..3 {
            let spo2 = VitalReading::from_raw("p1", "spo2", &json!(50), None, None).unwrap();
            assert!(pipeline.process_reading(&spo2, None).await.is_none());
            let hr = reading(json!(200), i);
            let raised = pipeline.process_reading(&hr, None).await;
            assert_eq!(raised.is_some(), i == 2);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readings_raise_one_alert_per_streak() {
        let registry = Arc::new(SubscriberRegistry::new());
        let lifecycle = Arc::new(AlertLifecycleManager::new(registry, LifecycleConfig::default()));
        let pipeline = Arc::new(AlertPipeline::new(AlertRules::default(), lifecycle));

        for round in 0..50 {
            // Rounds sit past the stale limit, so each starts with an empty window.
            let base = round * 1000;
            assert!(pipeline.process_reading(&reading(json!(190), base), None).await.is_none());
            assert!(pipeline.process_reading(&reading(json!(190), base + 1), None).await.is_none());

            let tasks: Vec<_> = (0..2)
                .map(|_| {
                    let pipeline = Arc::clone(&pipeline);
                    let next = reading(json!(190), base + 2);
                    tokio::spawn(async move { pipeline.process_reading(&next, None).await })
                })
                .collect();

            let mut raised = 0;
            for task in tasks {
                if task.await.unwrap().is_some() {
                    raised += 1;
                }
            }
            assert_eq!(raised, 1, "round {round}");
        }
    }

    #[test]
    fn context_merges_context_metadata_and_age() {
        let payload = json!({
            "context": {"room": "12", "ward": "A"},
            "metadata": {"ward": "B", "device": "band"},
            "age": 64
        });
        assert_eq!(
            extract_context(&payload),
            Some(json!({"room": "12", "ward": "B", "device": "band", "age": 64}))
        );
        assert_eq!(extract_context(&json!({"value": 1})), None);
        assert_eq!(extract_context(&json!([1, 2])), None);
    }
}
