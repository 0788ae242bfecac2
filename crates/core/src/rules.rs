//! Alert rule configuration.
//!
//! Rules are loaded once at startup from a JSON file and are read-only
//! afterwards. A rules document has two halves:
//!
//! - `levels`: the severity tiers and their delivery policy (streak length,
//!   recipients, escalation delay). Higher `priority` is more severe.
//! - `vitals`: per vital type, the `{min, max}` band each tier allows.
//!
//! ```json
//! {
//!   "levels": [
//!     { "name": "warning",  "priority": 1, "escalationRecipients": ["caregiver"] },
//!     { "name": "critical", "priority": 2, "escalationRecipients": ["caregiver", "hospital"] }
//!   ],
//!   "vitals": {
//!     "heart_rate": { "unit": "bpm", "levels": {
//!       "warning":  { "min": 50, "max": 150 },
//!       "critical": { "min": 40, "max": 180 }
//!     } }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::roles::Role;
use crate::vitals::VITAL_HEART_RATE;

const DEFAULT_CONSECUTIVE_SAMPLES: usize = 3;
const DEFAULT_ESCALATE_AFTER_SECS: u64 = 30;
const DEFAULT_STALE_AFTER_SECS: u64 = 120;
const DEFAULT_MAX_SAMPLE_AGE_SECS: u64 = 120;

// ---------------------------------------------------------------------------
// Threshold
// ---------------------------------------------------------------------------

/// Inclusive band a vital must stay within for a tier. A missing bound is
/// not checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl Threshold {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    /// `true` when `value` falls outside the band.
    pub fn is_outside(&self, value: f64) -> bool {
        self.min.is_some_and(|min| value < min) || self.max.is_some_and(|max| value > max)
    }

    /// Human-readable form used in alert reasons, e.g. `40-180` or `>= 90`.
    pub fn describe(&self) -> String {
        match (self.min, self.max) {
            (Some(low), Some(high)) => format!("{low}-{high}"),
            (Some(low), None) => format!(">= {low}"),
            (None, Some(high)) => format!("<= {high}"),
            (None, None) => "custom bounds".to_string(),
        }
    }

    fn check(&self) -> Result<(), String> {
        match (self.min, self.max) {
            (None, None) => Err("threshold has neither min nor max".into()),
            (Some(low), Some(high)) if low > high => {
                Err(format!("threshold min {low} is greater than max {high}"))
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tier policy
// ---------------------------------------------------------------------------

/// A severity tier and how alerts at that tier are delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierPolicy {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    /// Number of most-recent readings that must all be out of band.
    #[serde(default = "default_consecutive_samples")]
    pub consecutive_samples: usize,
    #[serde(default = "default_initial_recipients")]
    pub initial_recipients: Vec<Role>,
    #[serde(default)]
    pub escalation_recipients: Vec<Role>,
    #[serde(default = "default_escalate_after")]
    pub escalate_after_seconds: u64,
}

fn default_consecutive_samples() -> usize {
    DEFAULT_CONSECUTIVE_SAMPLES
}

fn default_initial_recipients() -> Vec<Role> {
    vec![Role::Patient]
}

fn default_escalate_after() -> u64 {
    DEFAULT_ESCALATE_AFTER_SECS
}

impl TierPolicy {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            consecutive_samples: DEFAULT_CONSECUTIVE_SAMPLES,
            initial_recipients: default_initial_recipients(),
            escalation_recipients: Vec::new(),
            escalate_after_seconds: DEFAULT_ESCALATE_AFTER_SECS,
        }
    }

    pub fn with_consecutive_samples(mut self, samples: usize) -> Self {
        self.consecutive_samples = samples;
        self
    }

    pub fn with_initial_recipients(mut self, roles: Vec<Role>) -> Self {
        self.initial_recipients = roles;
        self
    }

    pub fn with_escalation(mut self, roles: Vec<Role>, after_seconds: u64) -> Self {
        self.escalation_recipients = roles;
        self.escalate_after_seconds = after_seconds;
        self
    }
}

// ---------------------------------------------------------------------------
// Vital rule
// ---------------------------------------------------------------------------

/// Per-tier bands for one vital type, keyed by tier name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VitalRule {
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub levels: BTreeMap<String, Threshold>,
}

impl VitalRule {
    pub fn with_level(mut self, tier: impl Into<String>, threshold: Threshold) -> Self {
        self.levels.insert(tier.into(), threshold);
        self
    }
}

// ---------------------------------------------------------------------------
// AlertRules
// ---------------------------------------------------------------------------

/// The complete rules document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRules {
    #[serde(default = "default_version")]
    pub version: String,
    /// A gap longer than this between consecutive readings restarts the window.
    #[serde(default = "default_stale_after")]
    pub stale_after_seconds: u64,
    /// A candidate window spanning more than this is ignored.
    #[serde(default = "default_max_sample_age")]
    pub max_sample_age_seconds: u64,
    #[serde(default)]
    pub levels: Vec<TierPolicy>,
    #[serde(default)]
    pub vitals: BTreeMap<String, VitalRule>,
}

fn default_version() -> String {
    "default-v1".to_string()
}

fn default_stale_after() -> u64 {
    DEFAULT_STALE_AFTER_SECS
}

fn default_max_sample_age() -> u64 {
    DEFAULT_MAX_SAMPLE_AGE_SECS
}

impl AlertRules {
    /// An empty rules document with default timing settings.
    pub fn empty() -> Self {
        Self {
            version: default_version(),
            stale_after_seconds: DEFAULT_STALE_AFTER_SECS,
            max_sample_age_seconds: DEFAULT_MAX_SAMPLE_AGE_SECS,
            levels: Vec::new(),
            vitals: BTreeMap::new(),
        }
    }

    pub fn with_level(mut self, level: TierPolicy) -> Self {
        self.levels.push(level);
        self
    }

    pub fn with_vital(mut self, vital_type: impl Into<String>, rule: VitalRule) -> Self {
        self.vitals.insert(vital_type.into(), rule);
        self
    }

    /// Parse and validate a JSON rules document.
    ///
    /// Only document-wide problems fail here (bad JSON, a tier with a zero
    /// streak length, duplicate tier names). Problems confined to one vital
    /// type are left for the decision engine to isolate.
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let rules: AlertRules =
            serde_json::from_str(raw).map_err(|e| CoreError::Config(e.to_string()))?;
        rules.validate_levels()?;
        Ok(rules)
    }

    /// Load rules from `path`, falling back to [`AlertRules::default`].
    ///
    /// A missing file is normal in development and logged at info. Any other
    /// failure is logged as a warning.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Alert rules file not found, using defaults");
                return Self::default();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Alert rules read failed, using defaults");
                return Self::default();
            }
        };

        match Self::from_json(&raw) {
            Ok(rules) => {
                tracing::info!(
                    path = %path.display(),
                    version = %rules.version,
                    levels = rules.levels.len(),
                    vitals = rules.vitals.len(),
                    "Loaded alert rules"
                );
                rules
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Alert rules load failed, using defaults");
                Self::default()
            }
        }
    }

    /// Tiers ordered most severe first. Equal priorities keep file order.
    pub fn levels_by_severity(&self) -> Vec<&TierPolicy> {
        let mut levels: Vec<&TierPolicy> = self.levels.iter().collect();
        levels.sort_by(|a, b| b.priority.cmp(&a.priority));
        levels
    }

    /// Longest streak any tier needs; this is how many samples a window
    /// has to keep.
    pub fn max_window(&self) -> usize {
        self.levels
            .iter()
            .map(|level| level.consecutive_samples)
            .max()
            .unwrap_or(DEFAULT_CONSECUTIVE_SAMPLES)
    }

    /// Check one vital type's bands against the tier list.
    pub fn validate_vital(&self, vital_type: &str) -> Result<(), CoreError> {
        let rule = self.vitals.get(vital_type).ok_or_else(|| {
            CoreError::Config(format!("no rule configured for vital type {vital_type}"))
        })?;

        for (tier, threshold) in &rule.levels {
            if !self.levels.iter().any(|level| &level.name == tier) {
                return Err(CoreError::Config(format!(
                    "{vital_type}: threshold references unknown tier {tier}"
                )));
            }
            threshold
                .check()
                .map_err(|reason| CoreError::Config(format!("{vital_type}.{tier}: {reason}")))?;
        }
        Ok(())
    }

    fn validate_levels(&self) -> Result<(), CoreError> {
        let mut seen = HashSet::new();
        for level in &self.levels {
            if level.consecutive_samples == 0 {
                return Err(CoreError::Config(format!(
                    "tier {} must require at least one sample",
                    level.name
                )));
            }
            if !seen.insert(level.name.as_str()) {
                return Err(CoreError::Config(format!("duplicate tier {}", level.name)));
            }
        }
        Ok(())
    }
}

impl Default for AlertRules {
    /// Built-in rules: three heart-rate tiers, three-sample streaks, 30 s
    /// escalation.
    fn default() -> Self {
        Self::empty()
            .with_level(
                TierPolicy::new("slight", 1).with_escalation(vec![Role::Caregiver], 30),
            )
            .with_level(TierPolicy::new("moderate", 2).with_escalation(
                vec![Role::Caregiver, Role::Dispatcher],
                30,
            ))
            .with_level(TierPolicy::new("critical", 3).with_escalation(
                vec![Role::Caregiver, Role::Dispatcher, Role::Hospital],
                30,
            ))
            .with_vital(
                VITAL_HEART_RATE,
                VitalRule {
                    unit: Some("bpm".into()),
                    levels: BTreeMap::new(),
                }
                .with_level("slight", Threshold::new(Some(55.0), Some(120.0)))
                .with_level("moderate", Threshold::new(Some(50.0), Some(140.0)))
                .with_level("critical", Threshold::new(Some(40.0), Some(180.0))),
            )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
