//! Threshold evaluation engine for vital windows.
//!
//! Pure logic. The caller owns the reading window (see
//! [`crate::window::VitalWindows`]) and passes it in; the engine keeps no
//! per-patient state.

use std::collections::HashMap;

use crate::rules::{AlertRules, Threshold, TierPolicy};
use crate::types::Timestamp;
use crate::vitals::{normalize_vital_key, VitalSample};

/// A tier crossed by a window of readings.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub tier: TierPolicy,
    pub threshold: Threshold,
    /// The samples that satisfied the streak, oldest first.
    pub window: Vec<VitalSample>,
    pub vital_type: String,
    /// Timestamp of the newest sample in the matched window.
    pub sample_time: Timestamp,
    pub reasons: Vec<String>,
}

impl Decision {
    pub fn values(&self) -> Vec<f64> {
        self.window.iter().map(|s| s.value).collect()
    }
}

/// Per vital type: its bands in severity order, or why it cannot be
/// evaluated.
type CompiledVital = Result<Vec<(TierPolicy, Threshold)>, String>;

/// Selects the most severe tier a window crosses.
#[derive(Debug)]
pub struct DecisionEngine {
    vitals: HashMap<String, CompiledVital>,
    max_sample_age: chrono::Duration,
}

impl DecisionEngine {
    /// Compile `rules` into per-vital tier lists.
    ///
    /// A vital type whose configuration is broken is logged here and will
    /// never produce a decision. Other vital types are unaffected.
    pub fn new(rules: AlertRules) -> Self {
        let severity = rules.levels_by_severity();
        let mut vitals = HashMap::with_capacity(rules.vitals.len());

        for (vital_type, rule) in &rules.vitals {
            let compiled = match rules.validate_vital(vital_type) {
                Ok(()) => Ok(severity
                    .iter()
                    .filter_map(|level| {
                        rule.levels
                            .get(&level.name)
                            .map(|threshold| ((*level).clone(), *threshold))
                    })
                    .collect()),
                Err(e) => {
                    tracing::error!(
                        vital_type = %vital_type,
                        error = %e,
                        "Vital type disabled due to invalid alert rules"
                    );
                    Err(e.to_string())
                }
            };
            vitals.insert(vital_type.clone(), compiled);
        }

        let max_sample_age = chrono::Duration::seconds(
            i64::try_from(rules.max_sample_age_seconds).unwrap_or(i64::MAX),
        );

        Self {
            vitals,
            max_sample_age,
        }
    }

    /// Evaluate the newest readings in `window` for one patient.
    ///
    /// Tiers are tried most severe first and the first whose last
    /// `consecutive_samples` readings are all out of band wins. Returns
    /// `None` when nothing matches, the vital type is unknown, or its rules
    /// are broken.
    pub fn evaluate(
        &self,
        patient_id: &str,
        vital_type: &str,
        window: &[VitalSample],
    ) -> Option<Decision> {
        let vital_key = normalize_vital_key(vital_type, None)?;
        let tiers = match self.vitals.get(&vital_key)? {
            Ok(tiers) => tiers,
            Err(reason) => {
                tracing::debug!(
                    patient_id,
                    vital_type = %vital_key,
                    reason = %reason,
                    "Skipping misconfigured vital type"
                );
                return None;
            }
        };

        for (tier, threshold) in tiers {
            let needed = tier.consecutive_samples;
            if needed == 0 || window.len() < needed {
                continue;
            }
            let candidate = &window[window.len() - needed..];
            if self.is_stale(candidate) {
                continue;
            }
            if candidate.iter().all(|s| threshold.is_outside(s.value)) {
                let sample_time = candidate[candidate.len() - 1].timestamp;
                let reason = format!(
                    "{vital_key} outside {} for {needed} samples",
                    threshold.describe()
                );
                return Some(Decision {
                    tier: tier.clone(),
                    threshold: *threshold,
                    window: candidate.to_vec(),
                    vital_type: vital_key,
                    sample_time,
                    reasons: vec![reason],
                });
            }
        }

        None
    }

    fn is_stale(&self, candidate: &[VitalSample]) -> bool {
        match (candidate.first(), candidate.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp > self.max_sample_age,
            _ => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::roles::Role;
    use crate::rules::VitalRule;

    fn samples(values: &[f64]) -> Vec<VitalSample> {
        let start = Utc::now();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| VitalSample::new(*v, start + Duration::seconds(i as i64)))
            .collect()
    }

    /// `critical:(40,180)` and `warning:(50,150)`, three-sample streaks.
    fn two_tier_rules() -> AlertRules {
        AlertRules::empty()
            .with_level(TierPolicy::new("warning", 1))
            .with_level(
                TierPolicy::new("critical", 2).with_escalation(vec![Role::Hospital], 30),
            )
            .with_vital(
                "heart_rate",
                VitalRule::default()
                    .with_level("critical", Threshold::new(Some(40.0), Some(180.0)))
                    .with_level("warning", Threshold::new(Some(50.0), Some(150.0))),
            )
    }

    #[test]
    fn most_severe_matching_tier_wins() {
        let engine = DecisionEngine::new(two_tier_rules());
        let decision = engine
            .evaluate("p1", "heart_rate", &samples(&[190.0, 192.0, 188.0]))
            .expect("should alert");

        assert_eq!(decision.tier.name, "critical");
        assert_eq!(decision.values(), vec![190.0, 192.0, 188.0]);
        assert_eq!(decision.reasons, vec!["heart_rate outside 40-180 for 3 samples"]);
        assert_eq!(decision.threshold, Threshold::new(Some(40.0), Some(180.0)));
    }

    #[test]
    fn falls_through_to_less_severe_tier() {
        let engine = DecisionEngine::new(two_tier_rules());
        let decision = engine
            .evaluate("p1", "heart_rate", &samples(&[160.0, 170.0, 155.0]))
            .expect("should alert");
        assert_eq!(decision.tier.name, "warning");
    }

    #[test]
    fn broken_streak_is_no_decision() {
        let engine = DecisionEngine::new(two_tier_rules());
        assert!(engine
            .evaluate("p1", "heart_rate", &samples(&[190.0, 90.0, 190.0]))
            .is_none());
    }

    #[test]
    fn only_the_newest_samples_count() {
        let engine = DecisionEngine::new(two_tier_rules());
        let decision = engine
            .evaluate("p1", "heart_rate", &samples(&[80.0, 190.0, 191.0, 192.0]))
            .expect("should alert");
        assert_eq!(decision.values(), vec![190.0, 191.0, 192.0]);
    }

    #[test]
    fn short_window_is_no_decision() {
        let engine = DecisionEngine::new(two_tier_rules());
        assert!(engine
            .evaluate("p1", "heart_rate", &samples(&[190.0, 192.0]))
            .is_none());
    }

    #[test]
    fn window_spanning_too_long_is_ignored() {
        let engine = DecisionEngine::new(two_tier_rules());
        let start = Utc::now();
        let window = vec![
            VitalSample::new(190.0, start),
            VitalSample::new(190.0, start + Duration::seconds(60)),
            VitalSample::new(190.0, start + Duration::seconds(121)),
        ];
        assert!(engine.evaluate("p1", "heart_rate", &window).is_none());
    }

    #[test]
    fn vital_type_is_normalized() {
        let engine = DecisionEngine::new(two_tier_rules());
        assert!(engine
            .evaluate("p1", " BPM ", &samples(&[30.0, 31.0, 32.0]))
            .is_some());
    }

    #[test]
    fn unknown_vital_type_is_no_decision() {
        let engine = DecisionEngine::new(two_tier_rules());
        assert!(engine
            .evaluate("p1", "glucose", &samples(&[900.0, 900.0, 900.0]))
            .is_none());
    }

    #[test]
    fn misconfigured_vital_does_not_affect_others() {
        let rules = two_tier_rules().with_vital(
            "spo2",
            VitalRule::default().with_level("critical", Threshold::default()),
        );
        let engine = DecisionEngine::new(rules);

        assert!(engine
            .evaluate("p1", "spo2", &samples(&[10.0, 10.0, 10.0]))
            .is_none());
        assert!(engine
            .evaluate("p1", "heart_rate", &samples(&[190.0, 192.0, 188.0]))
            .is_some());
    }

    #[test]
    fn per_tier_streak_lengths_apply() {
        let rules = AlertRules::empty()
            .with_level(TierPolicy::new("warning", 1).with_consecutive_samples(1))
            .with_level(TierPolicy::new("critical", 2).with_consecutive_samples(5))
            .with_vital(
                "temp",
                VitalRule::default()
                    .with_level("warning", Threshold::new(None, Some(38.0)))
                    .with_level("critical", Threshold::new(None, Some(40.0))),
            );
        let engine = DecisionEngine::new(rules);

        let decision = engine
            .evaluate("p1", "temp", &samples(&[41.0, 41.0, 41.0]))
            .expect("warning needs only one sample");
        assert_eq!(decision.tier.name, "warning");
        assert_eq!(decision.reasons, vec!["temp outside <= 38 for 1 samples"]);
    }
}
