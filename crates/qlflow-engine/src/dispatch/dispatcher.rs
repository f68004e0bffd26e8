//! Provider dispatcher for model-generation activities
//!
//! Selects a provider from a ranked candidate list using circuit state,
//! rolling error rate, cost, and latency; falls back along the ranking on
//! failure; and charges every attempt against the workflow's cost ledger.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use qlflow_core::config::ModelConfig;
use qlflow_core::{ActivityOutcome, EngineError, ErrorKind, MetricsRegistry};
use rand::Rng;
use tracing::{debug, warn};

use super::health::HealthRegistry;
use crate::reliability::Admission;

/// Token usage reported by one model call
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelUsage {
    pub tokens_in: u64,
    pub tokens_out: u64,

    /// Router-returned cost; preferred over the static table when present
    pub cost_usd: Option<f64>,
}

/// One provider attempt made during a dispatch
#[derive(Debug, Clone)]
pub struct ProviderAttempt {
    pub provider: String,
    pub outcome: ActivityOutcome,
    pub error_kind: Option<ErrorKind>,
    pub latency_ms: u64,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
    pub cost_usd: Option<f64>,
}

/// Successful dispatch: the value plus the attempt trail
#[derive(Debug)]
pub struct Dispatched<T> {
    pub value: T,

    /// Provider that produced the value
    pub provider: String,

    /// Every attempt made, in order, including failures
    pub attempts: Vec<ProviderAttempt>,

    /// Total cost charged for this dispatch
    pub cost_usd: f64,
}

/// Per-workflow model cost ledger with a hard ceiling
#[derive(Debug)]
pub struct CostLedger {
    spent: Mutex<f64>,
    ceiling: f64,
}

impl CostLedger {
    /// Ledger with the given USD ceiling
    pub fn new(ceiling: f64) -> Self {
        Self {
            spent: Mutex::new(0.0),
            ceiling,
        }
    }

    /// Seed the ledger with already-spent cost (crash recovery)
    pub fn with_spent(self, spent: f64) -> Self {
        *self.spent.lock() = spent;
        self
    }

    /// Total charged so far
    pub fn spent(&self) -> f64 {
        *self.spent.lock()
    }

    /// Charge a completed attempt
    pub fn charge(&self, cost: f64) {
        *self.spent.lock() += cost;
    }

    /// Fail with `BudgetExhausted` when the ceiling is already reached
    pub fn check(&self) -> Result<(), EngineError> {
        let spent = self.spent();
        if spent >= self.ceiling {
            return Err(EngineError::new(
                ErrorKind::BudgetExhausted,
                format!("model cost {spent:.4} USD reached the ceiling of {:.4} USD", self.ceiling),
            ));
        }
        Ok(())
    }
}

/// Ranked provider dispatcher
///
/// Process-scoped; holds the health registry handle and the static cost
/// table. Selection is lexicographic on (circuit state, rolling error
/// rate bucketed to deciles, static cost bucketed to quartiles, p95
/// latency), with ties broken by provider id.
pub struct ProviderDispatcher {
    config: ModelConfig,
    health: Arc<HealthRegistry>,
    metrics: Arc<MetricsRegistry>,
}

impl ProviderDispatcher {
    pub fn new(
        config: ModelConfig,
        health: Arc<HealthRegistry>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            config,
            health,
            metrics,
        }
    }

    /// The health registry handle
    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    /// Static per-1k-token rate for a provider
    fn static_rate(&self, provider: &str) -> f64 {
        self.config
            .providers
            .iter()
            .find(|p| p.id == provider)
            .map(|p| p.cost_per_1k_tokens_usd)
            .unwrap_or(0.01)
    }

    /// Cost of one attempt: router-returned when present, else the static
    /// table applied to the token counts
    fn attempt_cost(&self, provider: &str, usage: &ModelUsage) -> f64 {
        if let Some(cost) = usage.cost_usd {
            return cost;
        }
        let tokens = usage.tokens_in + usage.tokens_out;
        self.static_rate(provider) * tokens as f64 / 1000.0
    }

    /// Rank selectable providers for an activity
    ///
    /// Open circuits are excluded; half-open circuits are admitted as
    /// probes with the configured probability. A declared affinity moves
    /// that provider to the front when it is selectable.
    pub fn rank(
        &self,
        activity: &str,
        affinity: Option<&str>,
        probe_probability: f64,
    ) -> Vec<String> {
        struct Candidate {
            id: String,
            circuit_rank: u8,
            error_decile: u8,
            cost_quartile: u8,
            p95: u64,
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        let mut costs: Vec<f64> = Vec::new();

        for entry in &self.config.providers {
            let health = self.health.health(activity, &entry.id);
            let circuit_rank = match health.breaker().admit() {
                Admission::Admit => 0,
                Admission::Probe => {
                    let admitted = rand::thread_rng().gen_bool(probe_probability.clamp(0.0, 1.0));
                    if !admitted {
                        continue;
                    }
                    1
                }
                Admission::Reject => continue,
            };

            costs.push(entry.cost_per_1k_tokens_usd);
            candidates.push(Candidate {
                id: entry.id.clone(),
                circuit_rank,
                error_decile: (health.error_rate() * 10.0).floor().min(10.0) as u8,
                cost_quartile: 0,
                p95: health.p95_latency_ms(),
            });
        }

        // Bucket static costs into quartiles across the candidate set
        costs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        for candidate in &mut candidates {
            let cost = self.static_rate(&candidate.id);
            let pos = costs.iter().position(|c| *c >= cost).unwrap_or(0);
            candidate.cost_quartile = (pos * 4 / costs.len().max(1)).min(3) as u8;
        }

        candidates.sort_by(|a, b| {
            (a.circuit_rank, a.error_decile, a.cost_quartile, a.p95, &a.id)
                .cmp(&(b.circuit_rank, b.error_decile, b.cost_quartile, b.p95, &b.id))
        });

        let mut ranked: Vec<String> = candidates.into_iter().map(|c| c.id).collect();

        if let Some(preferred) = affinity {
            if let Some(pos) = ranked.iter().position(|id| id == preferred) {
                let preferred = ranked.remove(pos);
                ranked.insert(0, preferred);
            }
        }

        ranked
    }

    /// Dispatch a model call with provider fallback
    ///
    /// Tries providers in rank order, re-ranking after each failure and
    /// skipping providers already tried. Every attempt updates the target
    /// provider's rolling statistics and circuit state and is charged to
    /// the ledger.
    ///
    /// # Errors
    ///
    /// - `BudgetExhausted` when the ledger ceiling is reached
    /// - `ProviderExhausted` when no selectable provider remains or the
    ///   attempt budget is spent
    pub async fn dispatch<T, F, Fut>(
        &self,
        activity: &str,
        affinity: Option<&str>,
        ledger: &CostLedger,
        max_attempts: u32,
        probe_probability: f64,
        call: F,
    ) -> Result<Dispatched<T>, EngineError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<(T, ModelUsage), EngineError>>,
    {
        let mut attempts: Vec<ProviderAttempt> = Vec::new();
        let mut tried: Vec<String> = Vec::new();
        let mut total_cost = 0.0;
        let mut last_error: Option<EngineError> = None;

        for _ in 0..max_attempts {
            ledger.check()?;

            let ranked = self.rank(activity, affinity, probe_probability);
            let Some(provider) = ranked.into_iter().find(|p| !tried.contains(p)) else {
                break;
            };
            tried.push(provider.clone());

            let health = self.health.health(activity, &provider);
            let started = Instant::now();
            let result = call(provider.clone()).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            self.metrics.incr(
                "activity_attempts",
                &format!("{activity},{provider},{}", if result.is_ok() { "ok" } else { "err" }),
            );
            self.metrics
                .observe("activity_latency_ms", &format!("{activity},{provider}"), latency_ms as f64);

            match result {
                Ok((value, usage)) => {
                    let cost = self.attempt_cost(&provider, &usage);
                    ledger.charge(cost);
                    total_cost += cost;

                    health.record(true, latency_ms);
                    if let Some((from, to)) = health.breaker().on_success() {
                        self.record_circuit_transition(activity, &provider, from, to);
                    }

                    attempts.push(ProviderAttempt {
                        provider: provider.clone(),
                        outcome: ActivityOutcome::Succeeded,
                        error_kind: None,
                        latency_ms,
                        tokens_in: Some(usage.tokens_in),
                        tokens_out: Some(usage.tokens_out),
                        cost_usd: Some(cost),
                    });

                    return Ok(Dispatched {
                        value,
                        provider,
                        attempts,
                        cost_usd: total_cost,
                    });
                }
                Err(err) => {
                    health.record(false, latency_ms);
                    if let Some((from, to)) = health.breaker().on_failure() {
                        self.record_circuit_transition(activity, &provider, from, to);
                    }

                    debug!(
                        activity,
                        provider = %provider,
                        error = %err,
                        "provider attempt failed, falling back"
                    );

                    attempts.push(ProviderAttempt {
                        provider,
                        outcome: ActivityOutcome::Failed,
                        error_kind: Some(err.kind),
                        latency_ms,
                        tokens_in: None,
                        tokens_out: None,
                        cost_usd: None,
                    });

                    // Terminal kinds abort the fallback chain outright
                    if !err.kind.is_retryable() {
                        return Err(err);
                    }
                    last_error = Some(err);
                }
            }
        }

        warn!(activity, tried = ?tried, "all providers in fallback chain failed");
        Err(EngineError::new(
            ErrorKind::ProviderExhausted,
            match last_error {
                Some(err) => format!("all model providers failed; last error: {}", err.message),
                None => "no selectable model provider".to_string(),
            },
        ))
    }

    fn record_circuit_transition(
        &self,
        activity: &str,
        provider: &str,
        from: crate::reliability::CircuitState,
        to: crate::reliability::CircuitState,
    ) {
        warn!(activity, provider, %from, %to, "provider circuit transitioned");
        self.metrics
            .incr("circuit_transitions", &format!("{activity},{provider},{from}->{to}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qlflow_core::config::{CircuitConfig, ProviderEntry};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn model_config(providers: &[(&str, f64)]) -> ModelConfig {
        ModelConfig {
            max_cost_per_workflow: 5.0,
            providers: providers
                .iter()
                .map(|(id, cost)| ProviderEntry {
                    id: id.to_string(),
                    cost_per_1k_tokens_usd: *cost,
                })
                .collect(),
            max_tokens: 1024,
        }
    }

    fn dispatcher(providers: &[(&str, f64)]) -> ProviderDispatcher {
        dispatcher_with_circuit(providers, CircuitConfig::default())
    }

    fn dispatcher_with_circuit(
        providers: &[(&str, f64)],
        circuit: CircuitConfig,
    ) -> ProviderDispatcher {
        ProviderDispatcher::new(
            model_config(providers),
            Arc::new(HealthRegistry::new(circuit)),
            MetricsRegistry::new(),
        )
    }

    fn usage(tokens: u64) -> ModelUsage {
        ModelUsage {
            tokens_in: tokens / 2,
            tokens_out: tokens - tokens / 2,
            cost_usd: None,
        }
    }

    #[test]
    fn test_rank_prefers_cheaper_provider() {
        let dispatcher = dispatcher(&[("expensive", 0.05), ("cheap", 0.005)]);
        let ranked = dispatcher.rank("generate_code", None, 1.0);
        assert_eq!(ranked[0], "cheap");
    }

    #[test]
    fn test_rank_prefers_healthy_provider() {
        let dispatcher = dispatcher(&[("flaky", 0.01), ("steady", 0.01)]);

        let health = dispatcher.health().health("generate_code", "flaky");
        for _ in 0..5 {
            health.record(false, 100);
        }
        // Not enough consecutive failures tracked here to open the circuit
        // (record() feeds the window, breaker is driven by dispatch), so
        // ranking falls to the error-rate decile.
        let ranked = dispatcher.rank("generate_code", None, 1.0);
        assert_eq!(ranked[0], "steady");
    }

    #[test]
    fn test_rank_ties_break_by_id() {
        let dispatcher = dispatcher(&[("beta", 0.01), ("alpha", 0.01)]);
        let ranked = dispatcher.rank("generate_code", None, 1.0);
        assert_eq!(ranked, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn test_affinity_moves_to_front() {
        let dispatcher = dispatcher(&[("cheap", 0.005), ("preferred", 0.05)]);
        let ranked = dispatcher.rank("generate_code", Some("preferred"), 1.0);
        assert_eq!(ranked[0], "preferred");
    }

    #[tokio::test]
    async fn test_dispatch_succeeds_first_provider() {
        let dispatcher = dispatcher(&[("a", 0.01)]);
        let ledger = CostLedger::new(5.0);

        let result = dispatcher
            .dispatch("generate_code", None, &ledger, 5, 1.0, |provider| async move {
                assert_eq!(provider, "a");
                Ok(("code".to_string(), usage(1000)))
            })
            .await
            .unwrap();

        assert_eq!(result.value, "code");
        assert_eq!(result.provider, "a");
        assert_eq!(result.attempts.len(), 1);
        assert!((ledger.spent() - 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_dispatch_falls_back_on_failure() {
        let dispatcher = dispatcher(&[("a", 0.005), ("b", 0.01)]);
        let ledger = CostLedger::new(5.0);

        let result = dispatcher
            .dispatch("generate_code", None, &ledger, 5, 1.0, |provider| async move {
                if provider == "a" {
                    Err(EngineError::dependency_unavailable("a returned 500"))
                } else {
                    Ok(("code".to_string(), usage(100)))
                }
            })
            .await
            .unwrap();

        assert_eq!(result.provider, "b");
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.attempts[0].outcome, ActivityOutcome::Failed);
        assert_eq!(
            result.attempts[0].error_kind,
            Some(ErrorKind::DependencyUnavailable)
        );

        // Health for the failing provider reflects the failure
        let health = dispatcher.health().health("generate_code", "a");
        assert_eq!(health.total_failures(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_exhausts_providers() {
        let dispatcher = dispatcher(&[("a", 0.01), ("b", 0.01)]);
        let ledger = CostLedger::new(5.0);

        let err = dispatcher
            .dispatch("generate_code", None, &ledger, 5, 1.0, |_| async {
                Err::<((), ModelUsage), EngineError>(EngineError::dependency_unavailable("boom"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::ProviderExhausted);
    }

    #[tokio::test]
    async fn test_dispatch_budget_exhausted() {
        let dispatcher = dispatcher(&[("a", 0.01)]);
        let ledger = CostLedger::new(0.01).with_spent(0.01);

        let err = dispatcher
            .dispatch("generate_code", None, &ledger, 5, 1.0, |_| async {
                Ok(((), usage(100)))
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::BudgetExhausted);
    }

    #[tokio::test]
    async fn test_dispatch_prefers_router_cost() {
        let dispatcher = dispatcher(&[("a", 0.01)]);
        let ledger = CostLedger::new(5.0);

        let result = dispatcher
            .dispatch("generate_code", None, &ledger, 5, 1.0, |_| async {
                Ok((
                    (),
                    ModelUsage {
                        tokens_in: 500,
                        tokens_out: 500,
                        cost_usd: Some(0.123),
                    },
                ))
            })
            .await
            .unwrap();

        assert!((result.cost_usd - 0.123).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_threshold() {
        let circuit = CircuitConfig {
            failure_threshold: 5,
            cooldown_ms: 60_000,
            halfopen_successes: 3,
            halfopen_probe_probability: 1.0,
        };
        let dispatcher = dispatcher_with_circuit(&[("a", 0.01), ("b", 0.01)], circuit);
        let calls_to_a = Arc::new(AtomicU32::new(0));

        // Five dispatches that each fail on `a` first, then succeed on `b`
        for _ in 0..5 {
            let ledger = CostLedger::new(5.0);
            let calls_to_a = calls_to_a.clone();
            dispatcher
                .dispatch("generate_code", None, &ledger, 5, 1.0, move |provider| {
                    let calls_to_a = calls_to_a.clone();
                    async move {
                        if provider == "a" {
                            calls_to_a.fetch_add(1, Ordering::SeqCst);
                            Err(EngineError::dependency_unavailable("a down"))
                        } else {
                            Ok(((), usage(10)))
                        }
                    }
                })
                .await
                .unwrap();
        }

        assert_eq!(calls_to_a.load(Ordering::SeqCst), 5);

        // The circuit for `a` is now open: next ranking excludes it
        let ranked = dispatcher.rank("generate_code", None, 1.0);
        assert_eq!(ranked, vec!["b".to_string()]);

        // And a further dispatch never touches `a`
        let ledger = CostLedger::new(5.0);
        let calls_to_a2 = calls_to_a.clone();
        dispatcher
            .dispatch("generate_code", None, &ledger, 5, 1.0, move |provider| {
                let calls_to_a2 = calls_to_a2.clone();
                async move {
                    if provider == "a" {
                        calls_to_a2.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok(((), usage(10)))
                }
            })
            .await
            .unwrap();
        assert_eq!(calls_to_a.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_non_retryable_error_aborts_chain() {
        let dispatcher = dispatcher(&[("a", 0.01), ("b", 0.01)]);
        let ledger = CostLedger::new(5.0);

        let err = dispatcher
            .dispatch("generate_code", None, &ledger, 5, 1.0, |_| async {
                Err::<((), ModelUsage), EngineError>(EngineError::invalid_argument("bad request"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }
}
