//! Process-scoped metrics registry
//!
//! Counters and histograms keyed by name + label string. Explicitly
//! constructed and passed by handle; there is no global registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

/// Snapshot of one histogram
#[derive(Debug, Clone, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
}

/// Bounded reservoir of observed values
#[derive(Debug, Default)]
struct Histogram {
    samples: Mutex<Vec<f64>>,
    count: AtomicU64,
}

const MAX_SAMPLES: usize = 4096;

impl Histogram {
    fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let mut samples = self.samples.lock();
        if samples.len() >= MAX_SAMPLES {
            // Keep the reservoir bounded; overwrite oldest
            let idx = (self.count.load(Ordering::Relaxed) as usize) % MAX_SAMPLES;
            samples[idx] = value;
        } else {
            samples.push(value);
        }
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let mut samples = self.samples.lock().clone();
        samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let count = self.count.load(Ordering::Relaxed);
        if samples.is_empty() {
            return HistogramSnapshot {
                count,
                sum: 0.0,
                min: 0.0,
                max: 0.0,
                p50: 0.0,
                p95: 0.0,
            };
        }

        let percentile = |p: f64| -> f64 {
            let idx = ((samples.len() as f64 - 1.0) * p).round() as usize;
            samples[idx]
        };

        HistogramSnapshot {
            count,
            sum: samples.iter().sum(),
            min: samples[0],
            max: samples[samples.len() - 1],
            p50: percentile(0.50),
            p95: percentile(0.95),
        }
    }
}

/// Registry of counters and histograms
///
/// Keys are `name` plus an optional label suffix, e.g.
/// `("stages_succeeded", "generate_code")`.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: DashMap<String, AtomicU64>,
    histograms: DashMap<String, Histogram>,
}

impl MetricsRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn key(name: &str, label: &str) -> String {
        if label.is_empty() {
            name.to_string()
        } else {
            format!("{name}{{{label}}}")
        }
    }

    /// Increment a counter by 1
    pub fn incr(&self, name: &str, label: &str) {
        self.counters
            .entry(Self::key(name, label))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter value
    pub fn counter(&self, name: &str, label: &str) -> u64 {
        self.counters
            .get(&Self::key(name, label))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record a histogram observation
    pub fn observe(&self, name: &str, label: &str, value: f64) {
        self.histograms
            .entry(Self::key(name, label))
            .or_default()
            .observe(value);
    }

    /// Snapshot a histogram
    pub fn histogram(&self, name: &str, label: &str) -> Option<HistogramSnapshot> {
        self.histograms
            .get(&Self::key(name, label))
            .map(|h| h.snapshot())
    }

    /// All counter values, for the introspection endpoint
    pub fn counters(&self) -> Vec<(String, u64)> {
        let mut out: Vec<(String, u64)> = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_increments() {
        let metrics = MetricsRegistry::new();
        metrics.incr("workflows_submitted", "");
        metrics.incr("workflows_submitted", "");
        assert_eq!(metrics.counter("workflows_submitted", ""), 2);
    }

    #[test]
    fn test_counter_labels_are_distinct() {
        let metrics = MetricsRegistry::new();
        metrics.incr("stages_succeeded", "generate_code");
        metrics.incr("stages_succeeded", "validate_code");
        assert_eq!(metrics.counter("stages_succeeded", "generate_code"), 1);
        assert_eq!(metrics.counter("stages_succeeded", "validate_code"), 1);
        assert_eq!(metrics.counter("stages_succeeded", "missing"), 0);
    }

    #[test]
    fn test_histogram_percentiles() {
        let metrics = MetricsRegistry::new();
        for i in 1..=100 {
            metrics.observe("stage_duration_ms", "generate_code", i as f64);
        }

        let snap = metrics.histogram("stage_duration_ms", "generate_code").unwrap();
        assert_eq!(snap.count, 100);
        assert_eq!(snap.min, 1.0);
        assert_eq!(snap.max, 100.0);
        assert!(snap.p50 >= 45.0 && snap.p50 <= 55.0);
        assert!(snap.p95 >= 90.0 && snap.p95 <= 100.0);
    }

    #[test]
    fn test_missing_histogram() {
        let metrics = MetricsRegistry::new();
        assert!(metrics.histogram("nope", "").is_none());
    }
}
