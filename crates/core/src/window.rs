//! Recent-reading windows per patient and vital type.
//!
//! This is the ingestion side's buffer: the decision engine only ever sees
//! the window handed out by [`VitalWindows::push_and_take`].

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;

use crate::rules::AlertRules;
use crate::types::PatientId;
use crate::vitals::VitalSample;

type WindowKey = (PatientId, String);

/// Bounded sample buffers keyed by `(patient_id, vital_type)`.
///
/// Each key locks independently, so readings for different patients never
/// contend.
#[derive(Debug)]
pub struct VitalWindows {
    buffers: DashMap<WindowKey, VecDeque<VitalSample>>,
    capacity: usize,
    stale_after: chrono::Duration,
}

impl VitalWindows {
    pub fn new(capacity: usize, stale_after: Duration) -> Self {
        Self {
            buffers: DashMap::new(),
            capacity: capacity.max(1),
            stale_after: chrono::Duration::from_std(stale_after)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Size windows for the longest streak in `rules`.
    pub fn for_rules(rules: &AlertRules) -> Self {
        Self::new(
            rules.max_window(),
            Duration::from_secs(rules.stale_after_seconds),
        )
    }

    /// Append `sample`, hand the window (oldest first) to `evaluate`, and
    /// clear the window if `evaluate` returns `Some`.
    ///
    /// The key stays locked for the whole call, so concurrent readings for
    /// the same patient and vital never evaluate the same streak twice.
    ///
    /// If the previous sample is older than the stale limit the window is
    /// restarted, so a streak never spans a gap in monitoring.
    pub fn push_and_take<T>(
        &self,
        patient_id: &str,
        vital_type: &str,
        sample: VitalSample,
        evaluate: impl FnOnce(&[VitalSample]) -> Option<T>,
    ) -> Option<T> {
        let mut buffer = self
            .buffers
            .entry((patient_id.to_string(), vital_type.to_string()))
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));

        let stale = buffer
            .back()
            .is_some_and(|last| sample.timestamp - last.timestamp > self.stale_after);
        if stale {
            tracing::debug!(patient_id, vital_type, "Vital window stale, restarting");
            buffer.clear();
        }

        buffer.push_back(sample);
        while buffer.len() > self.capacity {
            buffer.pop_front();
        }

        let taken = evaluate(buffer.make_contiguous());
        if taken.is_some() {
            buffer.clear();
        }
        taken
    }

    /// Number of tracked `(patient, vital)` keys.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;

    /// Push without taking; returns the window as evaluated.
    fn push(windows: &VitalWindows, patient_id: &str, vital_type: &str, sample: VitalSample) -> Vec<VitalSample> {
        let mut seen = Vec::new();
        windows.push_and_take(patient_id, vital_type, sample, |window| {
            seen = window.to_vec();
            None::<()>
        });
        seen
    }

    #[test]
    fn keeps_only_capacity_newest_samples() {
        let windows = VitalWindows::new(3, Duration::from_secs(120));
        let now = Utc::now();
        let mut last = Vec::new();
        for i in 0..5i64 {
            last = push(
                &windows,
                "p1",
                "heart_rate",
                VitalSample::new(i as f64, now + chrono::Duration::seconds(i)),
            );
        }
        let values: Vec<f64> = last.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn stale_gap_restarts_window() {
        let windows = VitalWindows::new(3, Duration::from_secs(120));
        let now = Utc::now();
        push(&windows, "p1", "heart_rate", VitalSample::new(190.0, now));
        push(
            &windows,
            "p1",
            "heart_rate",
            VitalSample::new(190.0, now + chrono::Duration::seconds(5)),
        );
        let window = push(
            &windows,
            "p1",
            "heart_rate",
            VitalSample::new(190.0, now + chrono::Duration::seconds(200)),
        );
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn keys_are_independent() {
        let windows = VitalWindows::new(3, Duration::from_secs(120));
        let now = Utc::now();
        push(&windows, "p1", "heart_rate", VitalSample::new(1.0, now));
        push(&windows, "p2", "heart_rate", VitalSample::new(2.0, now));
        let p1 = push(&windows, "p1", "spo2", VitalSample::new(3.0, now));
        assert_eq!(p1.len(), 1);
        assert_eq!(windows.len(), 3);
    }

    #[test]
    fn taken_window_is_cleared() {
        let windows = VitalWindows::new(3, Duration::from_secs(120));
        let now = Utc::now();
        push(&windows, "p1", "heart_rate", VitalSample::new(1.0, now));
        let taken = windows.push_and_take("p1", "heart_rate", VitalSample::new(2.0, now), |w| {
            Some(w.len())
        });
        assert_eq!(taken, Some(2));

        let window = push(&windows, "p1", "heart_rate", VitalSample::new(3.0, now));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn concurrent_pushes_take_a_full_window_once() {
        for _ in 0..200 {
            let windows = Arc::new(VitalWindows::new(3, Duration::from_secs(120)));
            let now = Utc::now();
            push(&windows, "p1", "heart_rate", VitalSample::new(190.0, now));
            push(&windows, "p1", "heart_rate", VitalSample::new(190.0, now));

            let taken = Arc::new(AtomicUsize::new(0));
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let windows = Arc::clone(&windows);
                    let taken = Arc::clone(&taken);
                    std::thread::spawn(move || {
                        let full = windows.push_and_take(
                            "p1",
                            "heart_rate",
                            VitalSample::new(190.0, now),
                            |w| (w.len() == 3).then_some(()),
                        );
                        if full.is_some() {
                            taken.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            // Two samples were waiting, so exactly one of the two readings
            // completes the streak and the other starts a new one.
            assert_eq!(taken.load(Ordering::SeqCst), 1);
        }
    }
}
