//! Provider health records
//!
//! Process-wide rolling statistics per (activity, provider). Reads take a
//! shared lock; updates take an exclusive lock held only over a
//! constant-time statistics update.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use qlflow_core::config::CircuitConfig;
use serde::Serialize;

use crate::reliability::{CircuitBreaker, CircuitState};

/// Size of the rolling outcome and latency windows
const WINDOW: usize = 100;

#[derive(Debug, Default)]
struct Rolling {
    /// Outcomes of the last calls, true = success
    outcomes: VecDeque<bool>,

    /// Latencies of the last calls, milliseconds
    latencies: VecDeque<u64>,

    total_calls: u64,
    total_failures: u64,
}

/// Health record for one (activity, provider) pair
pub struct ProviderHealth {
    rolling: RwLock<Rolling>,
    breaker: CircuitBreaker,
}

impl ProviderHealth {
    pub fn new(circuit: CircuitConfig) -> Self {
        Self {
            rolling: RwLock::new(Rolling::default()),
            breaker: CircuitBreaker::new(circuit),
        }
    }

    /// The embedded circuit breaker
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Record one call outcome
    pub fn record(&self, success: bool, latency_ms: u64) {
        let mut rolling = self.rolling.write();
        if rolling.outcomes.len() >= WINDOW {
            rolling.outcomes.pop_front();
        }
        if rolling.latencies.len() >= WINDOW {
            rolling.latencies.pop_front();
        }
        rolling.outcomes.push_back(success);
        rolling.latencies.push_back(latency_ms);
        rolling.total_calls += 1;
        if !success {
            rolling.total_failures += 1;
        }
    }

    /// Failure rate over the rolling window, in [0, 1]
    pub fn error_rate(&self) -> f64 {
        let rolling = self.rolling.read();
        if rolling.outcomes.is_empty() {
            return 0.0;
        }
        let failures = rolling.outcomes.iter().filter(|ok| !**ok).count();
        failures as f64 / rolling.outcomes.len() as f64
    }

    /// p95 latency over the rolling window, milliseconds
    pub fn p95_latency_ms(&self) -> u64 {
        let rolling = self.rolling.read();
        if rolling.latencies.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = rolling.latencies.iter().copied().collect();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64 - 1.0) * 0.95).round() as usize;
        sorted[idx]
    }

    /// Total calls ever recorded
    pub fn total_calls(&self) -> u64 {
        self.rolling.read().total_calls
    }

    /// Total failures ever recorded
    pub fn total_failures(&self) -> u64 {
        self.rolling.read().total_failures
    }
}

/// Snapshot of one provider's health, for introspection
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub activity: String,
    pub provider: String,
    pub circuit: CircuitState,
    pub error_rate: f64,
    pub p95_latency_ms: u64,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
}

/// Registry of provider health records
///
/// Keyed by (activity, provider); records are created on first use.
pub struct HealthRegistry {
    records: DashMap<(String, String), Arc<ProviderHealth>>,
    circuit: CircuitConfig,
}

impl HealthRegistry {
    pub fn new(circuit: CircuitConfig) -> Self {
        Self {
            records: DashMap::new(),
            circuit,
        }
    }

    /// Health record for an (activity, provider) pair
    pub fn health(&self, activity: &str, provider: &str) -> Arc<ProviderHealth> {
        self.records
            .entry((activity.to_string(), provider.to_string()))
            .or_insert_with(|| Arc::new(ProviderHealth::new(self.circuit.clone())))
            .clone()
    }

    /// Snapshot of every tracked record
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        let mut out: Vec<HealthSnapshot> = self
            .records
            .iter()
            .map(|entry| {
                let (activity, provider) = entry.key();
                let health = entry.value();
                HealthSnapshot {
                    activity: activity.clone(),
                    provider: provider.clone(),
                    circuit: health.breaker().state(),
                    error_rate: health.error_rate(),
                    p95_latency_ms: health.p95_latency_ms(),
                    consecutive_failures: health.breaker().consecutive_failures(),
                    total_calls: health.total_calls(),
                    total_failures: health.total_failures(),
                }
            })
            .collect();
        out.sort_by(|a, b| (&a.activity, &a.provider).cmp(&(&b.activity, &b.provider)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_rate_over_window() {
        let health = ProviderHealth::new(CircuitConfig::default());

        for _ in 0..8 {
            health.record(true, 100);
        }
        for _ in 0..2 {
            health.record(false, 100);
        }
        assert!((health.error_rate() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_window_is_bounded() {
        let health = ProviderHealth::new(CircuitConfig::default());

        // Fill the window with failures, then push successes past it
        for _ in 0..WINDOW {
            health.record(false, 100);
        }
        for _ in 0..WINDOW {
            health.record(true, 100);
        }
        assert_eq!(health.error_rate(), 0.0);
        assert_eq!(health.total_failures(), WINDOW as u64);
    }

    #[test]
    fn test_p95_latency() {
        let health = ProviderHealth::new(CircuitConfig::default());
        for ms in 1..=100u64 {
            health.record(true, ms);
        }
        let p95 = health.p95_latency_ms();
        assert!((90..=100).contains(&p95), "p95 was {p95}");
    }

    #[test]
    fn test_registry_reuses_records() {
        let registry = HealthRegistry::new(CircuitConfig::default());

        registry.health("generate_code", "azure-openai").record(false, 10);
        let again = registry.health("generate_code", "azure-openai");
        assert_eq!(again.total_calls(), 1);

        // Different activity tracks separately
        let other = registry.health("enhance_prompt", "azure-openai");
        assert_eq!(other.total_calls(), 0);
    }

    #[test]
    fn test_snapshot_sorted() {
        let registry = HealthRegistry::new(CircuitConfig::default());
        registry.health("b", "y").record(true, 1);
        registry.health("a", "x").record(true, 1);

        let snap = registry.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].activity, "a");
        assert_eq!(snap[1].activity, "b");
    }
}
