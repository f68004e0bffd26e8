//! Engine configuration
//!
//! Typed configuration with serde defaults, overridable from the
//! environment. Deadlines are layered and validated at load: activity <=
//! stage <= workflow.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::workflow::PipelineVariant;

/// Backoff strategy for a retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Fibonacci,
}

/// Parameters of one named retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryParams {
    pub max_attempts: u32,
    pub base_ms: u64,
    pub cap_ms: u64,
    /// Jitter factor in [0, 1]
    pub jitter: f64,
    pub strategy: BackoffStrategy,
    /// Emit a warning-level alert after this many attempts (0 = never)
    #[serde(default)]
    pub alert_after: u32,
}

/// The four named retry policies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub transient: RetryParams,
    pub model: RetryParams,
    pub critical: RetryParams,
    pub interactive: RetryParams,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            transient: RetryParams {
                max_attempts: 3,
                base_ms: 100,
                cap_ms: 5_000,
                jitter: 0.1,
                strategy: BackoffStrategy::Exponential,
                alert_after: 0,
            },
            model: RetryParams {
                max_attempts: 5,
                base_ms: 1_000,
                cap_ms: 30_000,
                jitter: 0.1,
                strategy: BackoffStrategy::Exponential,
                alert_after: 0,
            },
            critical: RetryParams {
                max_attempts: 10,
                base_ms: 1_000,
                cap_ms: 60_000,
                jitter: 0.0,
                strategy: BackoffStrategy::Fibonacci,
                alert_after: 3,
            },
            interactive: RetryParams {
                max_attempts: 2,
                base_ms: 250,
                cap_ms: 1_000,
                jitter: 0.0,
                strategy: BackoffStrategy::Linear,
                alert_after: 0,
            },
        }
    }
}

impl RetryConfig {
    /// Look up a named policy
    pub fn policy(&self, name: &str) -> Option<&RetryParams> {
        match name {
            "transient" => Some(&self.transient),
            "model" => Some(&self.model),
            "critical" => Some(&self.critical),
            "interactive" => Some(&self.interactive),
            _ => None,
        }
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures required to open the circuit
    pub failure_threshold: u32,

    /// Milliseconds to wait before half-opening
    pub cooldown_ms: u64,

    /// Consecutive half-open successes required to close
    pub halfopen_successes: u32,

    /// Probability of admitting a probe while half-open, in [0, 1]
    pub halfopen_probe_probability: f64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
            halfopen_successes: 3,
            halfopen_probe_probability: 0.5,
        }
    }
}

/// Bulkhead sizing for one target service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkheadParams {
    /// Concurrent calls admitted
    pub concurrency: usize,

    /// Queued waiters beyond that; further callers are rejected
    pub queue: usize,
}

impl Default for BulkheadParams {
    fn default() -> Self {
        Self {
            concurrency: 8,
            queue: 16,
        }
    }
}

/// Layered deadlines, inner never exceeding outer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlineConfig {
    pub activity_ms: u64,
    pub stage_ms: u64,
    pub workflow_ms: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            activity_ms: 30_000,
            stage_ms: 120_000,
            workflow_ms: 1_800_000,
        }
    }
}

impl DeadlineConfig {
    /// Enforce activity <= stage <= workflow
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.activity_ms > self.stage_ms {
            return Err(EngineError::invalid_argument(
                "deadlines.activity_ms must not exceed deadlines.stage_ms",
            ));
        }
        if self.stage_ms > self.workflow_ms {
            return Err(EngineError::invalid_argument(
                "deadlines.stage_ms must not exceed deadlines.workflow_ms",
            ));
        }
        Ok(())
    }
}

/// One model provider entry in the ranked candidate list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Provider id as known to the model router
    pub id: String,

    /// Static per-1k-token cost estimate in USD, used for ranking and as
    /// a fallback when the router does not return token counts
    pub cost_per_1k_tokens_usd: f64,
}

/// Model dispatch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Per-workflow cost ceiling in USD
    pub max_cost_per_workflow: f64,

    /// Ranked provider candidates (order is the affinity default)
    pub providers: Vec<ProviderEntry>,

    /// Maximum tokens requested per generation call
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_cost_per_workflow: 5.0,
            providers: vec![
                ProviderEntry {
                    id: "azure-openai".to_string(),
                    cost_per_1k_tokens_usd: 0.01,
                },
                ProviderEntry {
                    id: "anthropic".to_string(),
                    cost_per_1k_tokens_usd: 0.015,
                },
                ProviderEntry {
                    id: "bedrock".to_string(),
                    cost_per_1k_tokens_usd: 0.012,
                },
            ],
            max_tokens: 4096,
        }
    }
}

/// Base URLs of the specialist services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    pub model_router: String,
    pub parser: String,
    pub sandbox: String,
    pub capsule_builder: String,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            model_router: "http://localhost:8090".to_string(),
            parser: "http://localhost:8091".to_string(),
            sandbox: "http://localhost:8092".to_string(),
            capsule_builder: "http://localhost:8093".to_string(),
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub model: ModelConfig,
    pub retry: RetryConfig,
    pub circuit: CircuitConfig,

    /// Bulkhead sizing per target service; unlisted services get defaults
    pub bulkhead: BTreeMap<String, BulkheadParams>,

    pub deadlines: DeadlineConfig,

    /// Variant used when a submission does not choose one
    pub default_pipeline: PipelineVariantConfig,

    pub services: ServiceEndpoints,

    /// Log level filter passed to the subscriber
    pub log_level: LogLevelConfig,
}

/// Newtype so `#[serde(default)]` picks basic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineVariantConfig(pub PipelineVariant);

impl Default for PipelineVariantConfig {
    fn default() -> Self {
        Self(PipelineVariant::Basic)
    }
}

/// Newtype so `#[serde(default)]` picks "info"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogLevelConfig(pub String);

impl Default for LogLevelConfig {
    fn default() -> Self {
        Self("info".to_string())
    }
}

impl EngineConfig {
    /// Load defaults, then apply environment overrides
    ///
    /// Recognized variables: `QLFLOW_MAX_COST_PER_WORKFLOW`,
    /// `QLFLOW_PROVIDERS` (comma-separated ids), `QLFLOW_DEFAULT_PIPELINE`,
    /// `QLFLOW_LOG_LEVEL`, `QLFLOW_MODEL_ROUTER_URL`, `QLFLOW_PARSER_URL`,
    /// `QLFLOW_SANDBOX_URL`, `QLFLOW_CAPSULE_BUILDER_URL`,
    /// `QLFLOW_ACTIVITY_DEADLINE_MS`, `QLFLOW_STAGE_DEADLINE_MS`,
    /// `QLFLOW_WORKFLOW_DEADLINE_MS`.
    pub fn from_env() -> Result<Self, EngineError> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("QLFLOW_MAX_COST_PER_WORKFLOW") {
            config.model.max_cost_per_workflow = v.parse().map_err(|_| {
                EngineError::invalid_argument("QLFLOW_MAX_COST_PER_WORKFLOW must be a number")
            })?;
        }
        if let Ok(v) = std::env::var("QLFLOW_PROVIDERS") {
            let known = config.model.providers.clone();
            config.model.providers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|id| {
                    known
                        .iter()
                        .find(|p| p.id == id)
                        .cloned()
                        .unwrap_or(ProviderEntry {
                            id: id.to_string(),
                            cost_per_1k_tokens_usd: 0.01,
                        })
                })
                .collect();
        }
        if let Ok(v) = std::env::var("QLFLOW_DEFAULT_PIPELINE") {
            config.default_pipeline = PipelineVariantConfig(v.parse()?);
        }
        if let Ok(v) = std::env::var("QLFLOW_LOG_LEVEL") {
            config.log_level = LogLevelConfig(v);
        }
        if let Ok(v) = std::env::var("QLFLOW_MODEL_ROUTER_URL") {
            config.services.model_router = v;
        }
        if let Ok(v) = std::env::var("QLFLOW_PARSER_URL") {
            config.services.parser = v;
        }
        if let Ok(v) = std::env::var("QLFLOW_SANDBOX_URL") {
            config.services.sandbox = v;
        }
        if let Ok(v) = std::env::var("QLFLOW_CAPSULE_BUILDER_URL") {
            config.services.capsule_builder = v;
        }
        for (var, field) in [
            ("QLFLOW_ACTIVITY_DEADLINE_MS", 0usize),
            ("QLFLOW_STAGE_DEADLINE_MS", 1),
            ("QLFLOW_WORKFLOW_DEADLINE_MS", 2),
        ] {
            if let Ok(v) = std::env::var(var) {
                let ms: u64 = v
                    .parse()
                    .map_err(|_| EngineError::invalid_argument(format!("{var} must be an integer")))?;
                match field {
                    0 => config.deadlines.activity_ms = ms,
                    1 => config.deadlines.stage_ms = ms,
                    _ => config.deadlines.workflow_ms = ms,
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants
    pub fn validate(&self) -> Result<(), EngineError> {
        self.deadlines.validate()?;
        if self.model.providers.is_empty() {
            return Err(EngineError::invalid_argument(
                "model.providers must list at least one provider",
            ));
        }
        if self.model.max_cost_per_workflow < 0.0 {
            return Err(EngineError::invalid_argument(
                "model.max_cost_per_workflow must not be negative",
            ));
        }
        Ok(())
    }

    /// Bulkhead sizing for a target service
    pub fn bulkhead_for(&self, service: &str) -> BulkheadParams {
        self.bulkhead.get(service).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_named_retry_policies() {
        let retry = RetryConfig::default();

        let transient = retry.policy("transient").unwrap();
        assert_eq!(transient.max_attempts, 3);
        assert_eq!(transient.strategy, BackoffStrategy::Exponential);

        let model = retry.policy("model").unwrap();
        assert_eq!(model.max_attempts, 5);
        assert_eq!(model.cap_ms, 30_000);

        let critical = retry.policy("critical").unwrap();
        assert_eq!(critical.max_attempts, 10);
        assert_eq!(critical.strategy, BackoffStrategy::Fibonacci);
        assert_eq!(critical.alert_after, 3);

        let interactive = retry.policy("interactive").unwrap();
        assert_eq!(interactive.max_attempts, 2);
        assert_eq!(interactive.strategy, BackoffStrategy::Linear);

        assert!(retry.policy("unknown").is_none());
    }

    #[test]
    fn test_deadline_layering_enforced() {
        let bad = DeadlineConfig {
            activity_ms: 60_000,
            stage_ms: 30_000,
            workflow_ms: 120_000,
        };
        assert!(bad.validate().is_err());

        let bad = DeadlineConfig {
            activity_ms: 10_000,
            stage_ms: 240_000,
            workflow_ms: 120_000,
        };
        assert!(bad.validate().is_err());

        assert!(DeadlineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_provider_list_rejected() {
        let mut config = EngineConfig::default();
        config.model.providers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bulkhead_defaults_for_unknown_service() {
        let config = EngineConfig::default();
        let params = config.bulkhead_for("sandbox");
        assert_eq!(params.concurrency, 8);
        assert_eq!(params.queue, 16);
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }
}
