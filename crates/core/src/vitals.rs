//! Vital readings as they arrive from ingestion.

use serde::{Deserialize, Serialize};

use crate::types::{PatientId, Timestamp};

/// Canonical key for heart rate, whatever the device called it.
pub const VITAL_HEART_RATE: &str = "heart_rate";

/// One timestamped value inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VitalSample {
    pub value: f64,
    pub timestamp: Timestamp,
}

impl VitalSample {
    pub fn new(value: f64, timestamp: Timestamp) -> Self {
        Self { value, timestamp }
    }
}

/// A single normalized reading for one patient and vital type.
#[derive(Debug, Clone, PartialEq)]
pub struct VitalReading {
    pub patient_id: PatientId,
    /// Normalized vital key (see [`normalize_vital_key`]).
    pub vital_type: String,
    pub value: f64,
    pub unit: Option<String>,
    pub timestamp: Timestamp,
}

impl VitalReading {
    /// Build a reading from raw ingestion fields.
    ///
    /// Returns `None` when the vital type is blank or the value is not
    /// numeric. A missing timestamp means "now".
    pub fn from_raw(
        patient_id: impl Into<PatientId>,
        vital_type: &str,
        value: &serde_json::Value,
        unit: Option<&str>,
        timestamp: Option<Timestamp>,
    ) -> Option<Self> {
        let vital_type = normalize_vital_key(vital_type, unit)?;
        let value = parse_vital_value(value)?;
        Some(Self {
            patient_id: patient_id.into(),
            vital_type,
            value,
            unit: unit.map(str::to_string),
            timestamp: timestamp.unwrap_or_else(chrono::Utc::now),
        })
    }

    pub fn sample(&self) -> VitalSample {
        VitalSample::new(self.value, self.timestamp)
    }
}

/// Map device-specific vital names onto rule keys.
///
/// Keys are trimmed and lower-cased. `bpm` is heart rate, and so is `ecg`
/// when the device reports its value in bpm.
pub fn normalize_vital_key(vital_type: &str, unit: Option<&str>) -> Option<String> {
    let normalized = vital_type.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return None;
    }
    match normalized.as_str() {
        "bpm" | VITAL_HEART_RATE => Some(VITAL_HEART_RATE.to_string()),
        "ecg" if unit.is_some_and(|u| u.trim().eq_ignore_ascii_case("bpm")) => {
            Some(VITAL_HEART_RATE.to_string())
        }
        _ => Some(normalized),
    }
}

/// Accept numbers and numeric strings; anything else is not a reading.
pub fn parse_vital_value(value: &serde_json::Value) -> Option<f64> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}
