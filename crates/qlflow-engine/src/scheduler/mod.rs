//! Workflow scheduler
//!
//! Drives a pipeline definition for one workflow to a terminal state:
//! lease-fenced ownership, per-stage retry with backoff, dependency
//! gates, pause/resume/cancel between stages, layered deadlines, durable
//! checkpoints after every stage transition, and event emission with
//! per-workflow sequence numbers.
//!
//! A worker that crashes mid-stage leaves the stage `InProgress`; the
//! next worker to acquire the lease re-runs it from the last durable
//! checkpoint. A replayed stage writes an additional artifact version,
//! never corrupting state.

mod context;

pub use context::{ActivityRegistry, StageActivity, StageContext, StageOutput};

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use qlflow_core::pipeline::{self, FailurePolicy, StageDef};
use qlflow_core::{
    request_digest, ActivityOutcome, ActivityRecord, EngineConfig, EngineError, EngineEvent,
    ErrorKind, EventSink, MetricsRegistry, PipelineVariant, SequencedEvent, StageStatus,
    TracingEventSink, WorkflowInput, WorkflowRecord, WorkflowStatus,
};
use qlflow_store::{ArtifactStore, PutArtifact};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::dispatch::{CostLedger, HealthRegistry, ProviderDispatcher};
use crate::persistence::WorkflowStore;
use crate::reliability::{BulkheadRegistry, RetryPolicy};

/// Default scheduler lease TTL
const LEASE_TTL: Duration = Duration::from_secs(30);

/// Outcome of running one stage
enum StageRun {
    Succeeded,
    Skipped,
    Failed(EngineError),
}

/// The workflow scheduler
///
/// One instance per worker process; workflows are driven concurrently by
/// calling [`Scheduler::run_workflow`] from separate tasks. Within a
/// workflow, stages run strictly sequentially.
pub struct Scheduler {
    store: Arc<dyn WorkflowStore>,
    artifacts: Arc<dyn ArtifactStore>,
    registry: ActivityRegistry,
    dispatcher: Arc<ProviderDispatcher>,
    bulkheads: Arc<BulkheadRegistry>,
    events: Arc<dyn EventSink>,
    metrics: Arc<MetricsRegistry>,
    config: EngineConfig,
    worker_id: String,
    lease_ttl: Duration,
}

impl Scheduler {
    /// Create a scheduler with its own dispatcher, bulkheads, and metrics
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        artifacts: Arc<dyn ArtifactStore>,
        registry: ActivityRegistry,
        config: EngineConfig,
    ) -> Self {
        let metrics = MetricsRegistry::new();
        let health = Arc::new(HealthRegistry::new(config.circuit.clone()));
        let dispatcher = Arc::new(ProviderDispatcher::new(
            config.model.clone(),
            health,
            metrics.clone(),
        ));
        let bulkheads = Arc::new(BulkheadRegistry::new(config.bulkhead.clone(), metrics.clone()));

        Self {
            store,
            artifacts,
            registry,
            dispatcher,
            bulkheads,
            events: Arc::new(TracingEventSink),
            metrics,
            config,
            worker_id: format!("worker-{}", Uuid::now_v7()),
            lease_ttl: LEASE_TTL,
        }
    }

    /// Replace the event sink
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Override the worker id
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Override the lease TTL
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// The metrics registry handle
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// The provider dispatcher handle
    pub fn dispatcher(&self) -> &Arc<ProviderDispatcher> {
        &self.dispatcher
    }

    /// The workflow store handle
    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    /// The artifact store handle
    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    /// The engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate and persist a new workflow
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty or oversized prompt; nothing is
    /// created in that case.
    #[instrument(skip(self, input), fields(variant = %variant))]
    pub async fn submit(
        &self,
        variant: PipelineVariant,
        input: WorkflowInput,
    ) -> Result<WorkflowRecord, EngineError> {
        input.validate()?;

        let names = pipeline::stage_names(variant);
        let mut record = WorkflowRecord::new(variant, input, &names);

        self.emit(
            &mut record,
            EngineEvent::WorkflowSubmitted {
                variant: variant.to_string(),
            },
        );
        self.store.create_workflow(&record).await?;
        self.metrics.incr("workflows_submitted", "");

        info!(workflow_id = %record.id, %variant, "workflow submitted");
        Ok(record)
    }

    /// Drive a workflow until it is terminal, paused, or ownership is lost
    ///
    /// Acquires the scheduler lease first and returns without side
    /// effects when another live worker holds it. A keepalive task renews
    /// the lease; on loss the run ceases side effects before its next
    /// durable write.
    #[instrument(skip(self, shutdown), fields(worker = %self.worker_id))]
    pub async fn run_workflow(
        &self,
        workflow_id: Uuid,
        shutdown: CancellationToken,
    ) -> Result<(), EngineError> {
        let acquired = self
            .store
            .acquire_lease(workflow_id, &self.worker_id, self.lease_ttl)
            .await?;
        if !acquired {
            debug!(%workflow_id, "lease held elsewhere, skipping");
            return Ok(());
        }

        // Lease loss or shutdown cancels this token; side effects stop at
        // the next durable write either way
        let cancel = shutdown.child_token();
        let keepalive = self.spawn_keepalive(workflow_id, cancel.clone());

        let result = self.drive(workflow_id, &cancel).await;

        keepalive.abort();
        self.store
            .release_lease(workflow_id, &self.worker_id)
            .await
            .ok();

        result
    }

    fn spawn_keepalive(
        &self,
        workflow_id: Uuid,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let owner = self.worker_id.clone();
        let ttl = self.lease_ttl;

        tokio::spawn(async move {
            let interval = ttl / 3;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.cancelled() => return,
                }
                match store.renew_lease(workflow_id, &owner, ttl).await {
                    Ok(true) => {}
                    _ => {
                        warn!(%workflow_id, %owner, "scheduler lease lost");
                        cancel.cancel();
                        return;
                    }
                }
            }
        })
    }

    async fn drive(
        &self,
        workflow_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let mut record = self.store.get_workflow(workflow_id).await?;
        if record.status.is_terminal() {
            return Ok(());
        }

        let defs = pipeline::stages(record.variant);

        match record.status {
            WorkflowStatus::Pending => {
                record.started_at = Some(Utc::now());
                self.transition_workflow(&mut record, WorkflowStatus::Running, None)
                    .await?;
            }
            WorkflowStatus::Paused => {
                if self.store.control_flags(workflow_id).await?.pause_requested {
                    return Ok(());
                }
                self.transition_workflow(&mut record, WorkflowStatus::Running, None)
                    .await?;
            }
            _ => {}
        }

        let ledger = Arc::new(
            CostLedger::new(self.config.model.max_cost_per_workflow).with_spent(record.cost_usd),
        );

        while (record.current_stage as usize) < defs.len() {
            // Pause and cancel are honored between stages, never mid-activity
            let flags = self.store.control_flags(workflow_id).await?;
            if flags.cancel_requested {
                self.transition_workflow(&mut record, WorkflowStatus::Cancelled, None)
                    .await?;
                self.metrics.incr("workflows_cancelled", "");
                return Ok(());
            }
            if flags.pause_requested {
                self.transition_workflow(&mut record, WorkflowStatus::Paused, None)
                    .await?;
                return Ok(());
            }

            if self.workflow_deadline_elapsed(&record) {
                let err = EngineError::deadline_exceeded("workflow deadline elapsed");
                self.fail_workflow(&mut record, err).await?;
                return Ok(());
            }

            let def = &defs[record.current_stage as usize];
            match self.run_stage(&mut record, def, &ledger, cancel).await? {
                StageRun::Succeeded | StageRun::Skipped => {
                    record.current_stage += 1;
                    record.cost_usd = ledger.spent();
                    self.checkpoint(&record).await?;
                }
                StageRun::Failed(err) if err.kind == ErrorKind::Cancelled => {
                    // Worker shutdown or lease loss: leave the stage for
                    // the next lease holder, no durable write
                    debug!(workflow_id = %record.id, "run interrupted, leaving workflow for takeover");
                    return Ok(());
                }
                StageRun::Failed(err) => {
                    let fallback_eligible = def.on_failure == FailurePolicy::FallbackArtifact
                        && def.artifact_kind.is_some();
                    if fallback_eligible {
                        self.write_fallback_artifact(&mut record, def, &err).await?;
                        record.current_stage += 1;
                        record.cost_usd = ledger.spent();
                        self.checkpoint(&record).await?;
                    } else {
                        record.cost_usd = ledger.spent();
                        self.fail_workflow(&mut record, err).await?;
                        return Ok(());
                    }
                }
            }
        }

        record.cost_usd = ledger.spent();
        self.transition_workflow(&mut record, WorkflowStatus::Completed, None)
            .await?;
        self.metrics.incr("workflows_completed", "");
        info!(workflow_id = %record.id, "workflow completed");
        Ok(())
    }

    async fn run_stage(
        &self,
        record: &mut WorkflowRecord,
        def: &StageDef,
        ledger: &Arc<CostLedger>,
        cancel: &CancellationToken,
    ) -> Result<StageRun, EngineError> {
        let ord = record.current_stage as usize;

        // Dependency gates: a failed required predecessor propagates
        for gate in def.gates {
            let gate_failed = record
                .stage(gate)
                .map(|s| s.status == StageStatus::Failed)
                .unwrap_or(false);
            if gate_failed {
                let err = EngineError::new(
                    ErrorKind::UpstreamFailed,
                    format!("required predecessor stage {gate} failed"),
                );
                self.finish_stage(record, ord, StageStatus::Failed, Some(&err))
                    .await?;
                return Ok(StageRun::Failed(err));
            }
        }

        if record.stages[ord].status == StageStatus::NotStarted
            && def.skip.applies(&record.input)
        {
            self.finish_stage(record, ord, StageStatus::Skipped, None).await?;
            return Ok(StageRun::Skipped);
        }

        if record.stages[ord].status == StageStatus::NotStarted {
            let from = record.stages[ord].status;
            let attempts = record.stages[ord].attempts;
            record.stages[ord].status = StageStatus::InProgress;
            record.stages[ord].started_at = Some(Utc::now());
            self.emit(
                record,
                EngineEvent::StageTransitioned {
                    stage: def.name.to_string(),
                    from,
                    to: StageStatus::InProgress,
                    attempt: attempts,
                    error_kind: None,
                    duration_ms: None,
                },
            );
            self.checkpoint(record).await?;
        }

        let policy = self
            .config
            .retry
            .policy(def.retry_policy)
            .map(RetryPolicy::from_params)
            .unwrap_or_default();

        loop {
            record.stages[ord].attempts += 1;
            let attempt = record.stages[ord].attempts;

            if policy.should_alert(attempt) {
                warn!(
                    workflow_id = %record.id,
                    stage = def.name,
                    attempt,
                    "stage attempt count above alert threshold"
                );
            }

            let result = self.run_attempt(record, def, ord, attempt, ledger, cancel).await;

            match result {
                Ok(()) => return Ok(StageRun::Succeeded),
                Err(err) if err.kind == ErrorKind::Cancelled => {
                    return Ok(StageRun::Failed(err));
                }
                Err(err) => {
                    if policy.should_retry(err.kind) && policy.has_attempts_remaining(attempt) {
                        debug!(
                            workflow_id = %record.id,
                            stage = def.name,
                            attempt,
                            error = %err,
                            "stage attempt failed, backing off"
                        );
                        if !policy.backoff(attempt + 1, cancel).await {
                            return Ok(StageRun::Failed(EngineError::cancelled(
                                "backoff interrupted by shutdown",
                            )));
                        }
                        continue;
                    }
                    self.finish_stage(record, ord, StageStatus::Failed, Some(&err))
                        .await?;
                    return Ok(StageRun::Failed(err));
                }
            }
        }
    }

    /// One activity attempt: bulkhead admission, layered deadline,
    /// execution, audit records, and artifact persistence on success
    async fn run_attempt(
        &self,
        record: &mut WorkflowRecord,
        def: &StageDef,
        ord: usize,
        attempt: u32,
        ledger: &Arc<CostLedger>,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let activity = self
            .registry
            .get(def.activity)
            .ok_or_else(|| EngineError::internal(format!("no activity registered: {}", def.activity)))?;

        let deadline = self.attempt_deadline(record, ord)?;
        let _permit = self.bulkheads.acquire(def.target).await?;

        let attempt_token = cancel.child_token();
        let ctx = StageContext {
            workflow: record.clone(),
            stage: *def,
            attempt,
            deadline,
            cancel: attempt_token.clone(),
            artifacts: self.artifacts.clone(),
            dispatcher: self.dispatcher.clone(),
            ledger: ledger.clone(),
            model_attempts: self.config.retry.model.max_attempts,
            probe_probability: self.config.circuit.halfopen_probe_probability,
            max_tokens: self.config.model.max_tokens,
        };

        self.emit(
            record,
            EngineEvent::ActivityStarted {
                stage: def.name.to_string(),
                activity: def.activity.to_string(),
                attempt,
                provider: None,
            },
        );

        let started_at = Utc::now();
        let started = Instant::now();
        let result = tokio::select! {
            r = tokio::time::timeout(deadline, activity.execute(&ctx)) => match r {
                Ok(inner) => inner,
                Err(_) => {
                    attempt_token.cancel();
                    Err(EngineError::deadline_exceeded(format!(
                        "activity {} exceeded its {}ms deadline",
                        def.activity,
                        deadline.as_millis()
                    )))
                }
            },
            _ = cancel.cancelled() => Err(EngineError::cancelled("worker shutting down")),
        };
        let latency_ms = started.elapsed().as_millis() as u64;
        let finished_at = Utc::now();

        // Shutdown or lease loss: cease side effects before the next
        // durable write and leave the stage for the next lease holder
        if let Err(err) = &result {
            if err.kind == ErrorKind::Cancelled {
                return Err(err.clone());
            }
        }

        let (provider, error_kind) = match &result {
            Ok(output) => (output.provider.clone(), None),
            Err(err) => (None, Some(err.kind)),
        };

        let producing_activity_id = self
            .record_attempt(
                record, def, ord, attempt, &result, started_at, finished_at, latency_ms,
            )
            .await?;

        self.emit(
            record,
            EngineEvent::ActivityFinished {
                stage: def.name.to_string(),
                activity: def.activity.to_string(),
                attempt,
                provider,
                error_kind,
                duration_ms: latency_ms,
            },
        );

        let output = result?;

        if let Some(kind) = def.artifact_kind {
            let content = output.content.unwrap_or_default();
            let mut put = PutArtifact::new(record.id, def.name, kind, content);
            put.content_type = output.content_type;
            put.producing_activity_id = producing_activity_id;

            let meta = self.artifacts.put(put).await?;
            record.stages[ord].artifact_id = Some(meta.id);

            self.emit(
                record,
                EngineEvent::ArtifactWritten {
                    stage: def.name.to_string(),
                    kind: kind.to_string(),
                    version: meta.version,
                    size: meta.size,
                },
            );
            self.metrics.incr("artifacts_written", kind.as_str());
        }

        self.finish_stage(record, ord, StageStatus::Succeeded, None).await?;
        Ok(())
    }

    /// Persist audit records for an attempt, one per provider attempt for
    /// model stages, one synthesized record otherwise
    ///
    /// Returns the id of the last record written, referenced by the
    /// produced artifact for lineage.
    #[allow(clippy::too_many_arguments)]
    async fn record_attempt(
        &self,
        record: &WorkflowRecord,
        def: &StageDef,
        ord: usize,
        attempt: u32,
        result: &Result<StageOutput, EngineError>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        latency_ms: u64,
    ) -> Result<Option<Uuid>, EngineError> {
        let digest = request_digest(&serde_json::json!({
            "stage": def.name,
            "prompt": record.input.prompt,
            "language": record.input.language,
        }));

        let provider_attempts = match result {
            Ok(output) if !output.attempts.is_empty() => Some(&output.attempts),
            _ => None,
        };

        if let Some(attempts) = provider_attempts {
            let mut last_id = None;
            for pa in attempts.iter() {
                let id = Uuid::now_v7();
                self.store
                    .append_activity(&ActivityRecord {
                        id,
                        workflow_id: record.id,
                        stage_ord: ord as u32,
                        activity: def.activity.to_string(),
                        target: def.target.to_string(),
                        attempt,
                        provider: Some(pa.provider.clone()),
                        request_digest: digest.clone(),
                        latency_ms: pa.latency_ms,
                        outcome: pa.outcome,
                        error_kind: pa.error_kind,
                        tokens_in: pa.tokens_in,
                        tokens_out: pa.tokens_out,
                        cost_usd: pa.cost_usd,
                        started_at,
                        finished_at,
                    })
                    .await?;
                last_id = Some(id);
            }
            return Ok(last_id);
        }

        let (outcome, error_kind) = match result {
            Ok(_) => (ActivityOutcome::Succeeded, None),
            Err(err) if err.kind == ErrorKind::Cancelled => {
                (ActivityOutcome::Cancelled, Some(err.kind))
            }
            Err(err) => (ActivityOutcome::Failed, Some(err.kind)),
        };

        let id = Uuid::now_v7();
        self.store
            .append_activity(&ActivityRecord {
                id,
                workflow_id: record.id,
                stage_ord: ord as u32,
                activity: def.activity.to_string(),
                target: def.target.to_string(),
                attempt,
                provider: None,
                request_digest: digest,
                latency_ms,
                outcome,
                error_kind,
                tokens_in: None,
                tokens_out: None,
                cost_usd: None,
                started_at,
                finished_at,
            })
            .await?;

        self.metrics.incr(
            "activity_attempts",
            &format!(
                "{},-,{}",
                def.activity,
                if result.is_ok() { "ok" } else { "err" }
            ),
        );
        Ok(Some(id))
    }

    /// Mark a stage terminal, emit its transition, and checkpoint
    async fn finish_stage(
        &self,
        record: &mut WorkflowRecord,
        ord: usize,
        status: StageStatus,
        error: Option<&EngineError>,
    ) -> Result<(), EngineError> {
        let from = record.stages[ord].status;
        let stage_name = record.stages[ord].name.clone();

        record.stages[ord].status = status;
        record.stages[ord].finished_at = Some(Utc::now());
        if let Some(err) = error {
            record.stages[ord].error_kind = Some(err.kind);
            record.stages[ord].error_message = Some(err.message.clone());
        }

        let attempts = record.stages[ord].attempts;
        let duration_ms = record.stages[ord]
            .started_at
            .map(|s| (Utc::now() - s).num_milliseconds().max(0) as u64);

        self.emit(
            record,
            EngineEvent::StageTransitioned {
                stage: stage_name.clone(),
                from,
                to: status,
                attempt: attempts,
                error_kind: error.map(|e| e.kind),
                duration_ms,
            },
        );

        match status {
            StageStatus::Succeeded => {
                self.metrics.incr("stages_succeeded", &stage_name);
                if let Some(ms) = duration_ms {
                    self.metrics.observe("stage_duration_ms", &stage_name, ms as f64);
                }
            }
            StageStatus::Failed => self.metrics.incr("stages_failed", &stage_name),
            _ => {}
        }

        self.checkpoint(record).await
    }

    /// Persist a template-fallback artifact for a continuing failed stage
    async fn write_fallback_artifact(
        &self,
        record: &mut WorkflowRecord,
        def: &StageDef,
        err: &EngineError,
    ) -> Result<(), EngineError> {
        let Some(kind) = def.artifact_kind else {
            return Ok(());
        };

        let content = serde_json::to_vec_pretty(&serde_json::json!({
            "stage": def.name,
            "error_kind": err.kind.as_str(),
            "message": err.message,
        }))?;

        let ord = record.current_stage as usize;
        let meta = self
            .artifacts
            .put(
                PutArtifact::new(record.id, def.name, kind, content).with_template_fallback(),
            )
            .await?;
        record.stages[ord].artifact_id = Some(meta.id);

        self.emit(
            record,
            EngineEvent::ArtifactWritten {
                stage: def.name.to_string(),
                kind: kind.to_string(),
                version: meta.version,
                size: meta.size,
            },
        );
        self.metrics.incr("artifacts_written", kind.as_str());

        warn!(
            workflow_id = %record.id,
            stage = def.name,
            "stage failed, continuing with template fallback artifact"
        );
        Ok(())
    }

    /// Fail the workflow, marking every remaining stage UpstreamFailed
    async fn fail_workflow(
        &self,
        record: &mut WorkflowRecord,
        err: EngineError,
    ) -> Result<(), EngineError> {
        for ord in 0..record.stages.len() {
            if !record.stages[ord].status.is_terminal()
                && record.stages[ord].status != StageStatus::InProgress
            {
                let upstream = EngineError::new(
                    ErrorKind::UpstreamFailed,
                    "an earlier required stage failed".to_string(),
                );
                let from = record.stages[ord].status;
                record.stages[ord].status = StageStatus::Failed;
                record.stages[ord].error_kind = Some(upstream.kind);
                record.stages[ord].error_message = Some(upstream.message.clone());
                record.stages[ord].finished_at = Some(Utc::now());

                let stage_name = record.stages[ord].name.clone();
                let attempts = record.stages[ord].attempts;
                self.emit(
                    record,
                    EngineEvent::StageTransitioned {
                        stage: stage_name,
                        from,
                        to: StageStatus::Failed,
                        attempt: attempts,
                        error_kind: Some(ErrorKind::UpstreamFailed),
                        duration_ms: None,
                    },
                );
            }
        }

        record.error_kind = Some(err.kind);
        record.error_message = Some(err.message.clone());
        self.transition_workflow(record, WorkflowStatus::Failed, Some(err.kind))
            .await?;
        self.metrics.incr("workflows_failed", "");
        warn!(workflow_id = %record.id, "workflow failed");
        Ok(())
    }

    async fn transition_workflow(
        &self,
        record: &mut WorkflowRecord,
        to: WorkflowStatus,
        error_kind: Option<ErrorKind>,
    ) -> Result<(), EngineError> {
        let from = record.status;
        record.status = to;
        if to.is_terminal() {
            record.finished_at = Some(Utc::now());
        }
        self.emit(
            record,
            EngineEvent::WorkflowTransitioned {
                from,
                to,
                error_kind,
            },
        );
        self.checkpoint(record).await
    }

    /// Deadline for one activity attempt: the configured activity
    /// deadline clamped by the stage and workflow remainders
    fn attempt_deadline(
        &self,
        record: &WorkflowRecord,
        ord: usize,
    ) -> Result<Duration, EngineError> {
        let activity = Duration::from_millis(self.config.deadlines.activity_ms);

        let stage_remaining = record.stages[ord]
            .started_at
            .map(|s| remaining(s, self.config.deadlines.stage_ms))
            .unwrap_or(activity);
        let workflow_remaining = record
            .started_at
            .map(|s| remaining(s, self.config.deadlines.workflow_ms))
            .unwrap_or(activity);

        let deadline = activity.min(stage_remaining).min(workflow_remaining);
        if deadline.is_zero() {
            return Err(EngineError::deadline_exceeded(
                "no time remaining within stage or workflow deadline",
            ));
        }
        Ok(deadline)
    }

    fn workflow_deadline_elapsed(&self, record: &WorkflowRecord) -> bool {
        record
            .started_at
            .map(|s| remaining(s, self.config.deadlines.workflow_ms).is_zero())
            .unwrap_or(false)
    }

    /// Stamp and emit an event with the workflow's next sequence number
    fn emit(&self, record: &mut WorkflowRecord, event: EngineEvent) {
        let seq = record.event_seq;
        record.event_seq += 1;
        self.events.emit(SequencedEvent {
            workflow_id: record.id,
            seq,
            at: Utc::now(),
            event,
        });
    }

    async fn checkpoint(&self, record: &WorkflowRecord) -> Result<(), EngineError> {
        Ok(self.store.checkpoint(record, &self.worker_id).await?)
    }
}

fn remaining(started: DateTime<Utc>, limit_ms: u64) -> Duration {
    let elapsed = (Utc::now() - started).num_milliseconds().max(0) as u64;
    Duration::from_millis(limit_ms.saturating_sub(elapsed))
}
