//! Scheduler integration tests against the in-memory stores
//!
//! Activities are scripted fakes; no network is involved.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use qlflow_core::{
    ArtifactKind, EngineConfig, EngineError, ErrorKind, MemoryEventSink, PipelineVariant,
    StageStatus, WorkflowInput, WorkflowStatus,
};
use qlflow_engine::{
    ActivityRegistry, MemoryWorkflowStore, Scheduler, StageActivity, StageContext, StageOutput,
};
use qlflow_store::{ArtifactStore, MemoryArtifactStore};
use tokio_util::sync::CancellationToken;

/// Succeeds with fixed content
struct StaticActivity(&'static str);

#[async_trait]
impl StageActivity for StaticActivity {
    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, EngineError> {
        Ok(StageOutput::with_content(self.0))
    }
}

/// Fails `failures` times with the given kind, then succeeds
struct FlakyActivity {
    failures: AtomicU32,
    kind: ErrorKind,
}

impl FlakyActivity {
    fn new(failures: u32, kind: ErrorKind) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            kind,
        }
    }
}

#[async_trait]
impl StageActivity for FlakyActivity {
    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, EngineError> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EngineError::new(self.kind, "scripted failure"));
        }
        Ok(StageOutput::with_content("recovered"))
    }
}

/// Always fails with the given kind
struct FailingActivity(ErrorKind);

#[async_trait]
impl StageActivity for FailingActivity {
    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, EngineError> {
        Err(EngineError::new(self.0, "scripted failure"))
    }
}

/// Requests workflow cancellation mid-activity, then succeeds
struct CancelRequestingActivity {
    store: Arc<MemoryWorkflowStore>,
}

#[async_trait]
impl StageActivity for CancelRequestingActivity {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, EngineError> {
        use qlflow_engine::WorkflowStore;
        self.store.request_cancel(ctx.workflow.id).await.ok();
        Ok(StageOutput::with_content("done before cancel"))
    }
}

/// Requests a pause mid-activity, then succeeds
struct PauseRequestingActivity {
    store: Arc<MemoryWorkflowStore>,
}

#[async_trait]
impl StageActivity for PauseRequestingActivity {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, EngineError> {
        use qlflow_engine::WorkflowStore;
        self.store.request_pause(ctx.workflow.id).await.ok();
        Ok(StageOutput::with_content("done before pause"))
    }
}

/// Simulates a worker crash on first invocation by firing the shutdown
/// token, then behaves normally
struct CrashOnceActivity {
    shutdown: CancellationToken,
    crashed: AtomicU32,
}

#[async_trait]
impl StageActivity for CrashOnceActivity {
    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, EngineError> {
        if self.crashed.fetch_add(1, Ordering::SeqCst) == 0 {
            self.shutdown.cancel();
            // Stay in-flight so the scheduler observes the shutdown
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
        Ok(StageOutput::with_content("generated code"))
    }
}

struct Harness {
    scheduler: Scheduler,
    store: Arc<MemoryWorkflowStore>,
    artifacts: Arc<MemoryArtifactStore>,
    events: Arc<MemoryEventSink>,
}

fn harness(overrides: Vec<(&'static str, Arc<dyn StageActivity>)>) -> Harness {
    harness_with_store(Arc::new(MemoryWorkflowStore::new()), Arc::new(MemoryArtifactStore::new()), overrides)
}

fn harness_with_store(
    store: Arc<MemoryWorkflowStore>,
    artifacts: Arc<MemoryArtifactStore>,
    overrides: Vec<(&'static str, Arc<dyn StageActivity>)>,
) -> Harness {
    let mut registry = ActivityRegistry::new();
    for def in qlflow_core::pipeline::BASIC_STAGES
        .iter()
        .chain(qlflow_core::pipeline::EXTENDED_STAGES)
    {
        registry.register(def.activity, Arc::new(StaticActivity("stage output")));
    }
    for (name, activity) in overrides {
        registry.register(name, activity);
    }

    let events = Arc::new(MemoryEventSink::new());
    let scheduler = Scheduler::new(
        store.clone(),
        artifacts.clone(),
        registry,
        EngineConfig::default(),
    )
    .with_events(events.clone())
    .with_worker_id("test-worker");

    Harness {
        scheduler,
        store,
        artifacts,
        events,
    }
}

fn input() -> WorkflowInput {
    WorkflowInput::new("add two numbers").with_language("python")
}

async fn kinds_for(artifacts: &MemoryArtifactStore, workflow_id: uuid::Uuid) -> Vec<ArtifactKind> {
    artifacts
        .list(workflow_id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.kind)
        .collect()
}

#[tokio::test]
async fn test_basic_happy_path() {
    let h = harness(vec![]);
    let record = h
        .scheduler
        .submit(PipelineVariant::Basic, input())
        .await
        .unwrap();

    h.scheduler
        .run_workflow(record.id, CancellationToken::new())
        .await
        .unwrap();

    use qlflow_engine::WorkflowStore;
    let done = h.store.get_workflow(record.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Completed);
    assert!(done.finished_at.is_some());
    assert!(done
        .stages
        .iter()
        .all(|s| s.status == StageStatus::Succeeded));

    let kinds = kinds_for(&h.artifacts, record.id).await;
    assert!(kinds.contains(&ArtifactKind::Prompt));
    assert!(kinds.contains(&ArtifactKind::Frd));
    assert!(kinds.contains(&ArtifactKind::Code));
    assert!(kinds.contains(&ArtifactKind::CapsuleManifest));
    // validate_code defines no artifact kind
    assert_eq!(kinds.len(), 4);
}

#[tokio::test]
async fn test_extended_covers_every_kind() {
    let h = harness(vec![]);
    let record = h
        .scheduler
        .submit(PipelineVariant::Extended, input())
        .await
        .unwrap();

    h.scheduler
        .run_workflow(record.id, CancellationToken::new())
        .await
        .unwrap();

    use qlflow_engine::WorkflowStore;
    let done = h.store.get_workflow(record.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Completed);

    let mut kinds = kinds_for(&h.artifacts, record.id).await;
    kinds.sort_by_key(|k| k.as_str());
    let before = kinds.len();
    kinds.dedup();
    assert_eq!(kinds.len(), before, "no duplicate kinds at version max");
    assert_eq!(kinds.len(), 11, "all eleven kinds covered");
}

#[tokio::test]
async fn test_generate_tests_disabled_skips_stage() {
    let h = harness(vec![]);
    let mut submitted = input();
    submitted.generate_tests = false;

    let record = h
        .scheduler
        .submit(PipelineVariant::Extended, submitted)
        .await
        .unwrap();
    h.scheduler
        .run_workflow(record.id, CancellationToken::new())
        .await
        .unwrap();

    use qlflow_engine::WorkflowStore;
    let done = h.store.get_workflow(record.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(
        done.stage("test_generation").unwrap().status,
        StageStatus::Skipped
    );

    let kinds = kinds_for(&h.artifacts, record.id).await;
    assert!(!kinds.contains(&ArtifactKind::Tests));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retried() {
    let h = harness(vec![(
        "validate_code",
        Arc::new(FlakyActivity::new(2, ErrorKind::DependencyUnavailable)),
    )]);

    let record = h
        .scheduler
        .submit(PipelineVariant::Basic, input())
        .await
        .unwrap();
    h.scheduler
        .run_workflow(record.id, CancellationToken::new())
        .await
        .unwrap();

    use qlflow_engine::WorkflowStore;
    let done = h.store.get_workflow(record.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Completed);

    let stage = done.stage("validate_code").unwrap();
    assert_eq!(stage.status, StageStatus::Succeeded);
    assert_eq!(stage.attempts, 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_exhaustion_fails_workflow() {
    let h = harness(vec![(
        "validate_code",
        Arc::new(FailingActivity(ErrorKind::DependencyUnavailable)),
    )]);

    let record = h
        .scheduler
        .submit(PipelineVariant::Basic, input())
        .await
        .unwrap();
    h.scheduler
        .run_workflow(record.id, CancellationToken::new())
        .await
        .unwrap();

    use qlflow_engine::WorkflowStore;
    let done = h.store.get_workflow(record.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Failed);
    assert_eq!(done.error_kind, Some(ErrorKind::DependencyUnavailable));

    // transient policy allows three attempts
    let stage = done.stage("validate_code").unwrap();
    assert_eq!(stage.status, StageStatus::Failed);
    assert_eq!(stage.attempts, 3);

    // The stage after the failure is marked as upstream-failed
    let downstream = done.stage("organize_output").unwrap();
    assert_eq!(downstream.status, StageStatus::Failed);
    assert_eq!(downstream.error_kind, Some(ErrorKind::UpstreamFailed));

    // Artifacts produced before the failure remain readable
    let kinds = kinds_for(&h.artifacts, record.id).await;
    assert!(kinds.contains(&ArtifactKind::Code));
}

#[tokio::test]
async fn test_non_retryable_failure_is_immediate() {
    let h = harness(vec![(
        "generate_code",
        Arc::new(FailingActivity(ErrorKind::InvalidArgument)),
    )]);

    let record = h
        .scheduler
        .submit(PipelineVariant::Basic, input())
        .await
        .unwrap();
    h.scheduler
        .run_workflow(record.id, CancellationToken::new())
        .await
        .unwrap();

    use qlflow_engine::WorkflowStore;
    let done = h.store.get_workflow(record.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Failed);
    assert_eq!(done.stage("generate_code").unwrap().attempts, 1);
}

#[tokio::test]
async fn test_budget_exhausted_fails_workflow_with_partial_artifacts() {
    let h = harness(vec![(
        "generate_code",
        Arc::new(FailingActivity(ErrorKind::BudgetExhausted)),
    )]);

    let record = h
        .scheduler
        .submit(PipelineVariant::Basic, input())
        .await
        .unwrap();
    h.scheduler
        .run_workflow(record.id, CancellationToken::new())
        .await
        .unwrap();

    use qlflow_engine::WorkflowStore;
    let done = h.store.get_workflow(record.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Failed);
    assert_eq!(done.error_kind, Some(ErrorKind::BudgetExhausted));

    // Drops from the stages before the ceiling remain readable
    let kinds = kinds_for(&h.artifacts, record.id).await;
    assert!(kinds.contains(&ArtifactKind::Prompt));
    assert!(kinds.contains(&ArtifactKind::Frd));
    assert!(!kinds.contains(&ArtifactKind::Code));
}

#[tokio::test(start_paused = true)]
async fn test_optional_stage_falls_back_to_template() {
    let h = harness(vec![(
        "documentation",
        Arc::new(FailingActivity(ErrorKind::DependencyUnavailable)),
    )]);

    let record = h
        .scheduler
        .submit(PipelineVariant::Extended, input())
        .await
        .unwrap();
    h.scheduler
        .run_workflow(record.id, CancellationToken::new())
        .await
        .unwrap();

    use qlflow_engine::WorkflowStore;
    let done = h.store.get_workflow(record.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(done.stage("documentation").unwrap().status, StageStatus::Failed);

    // The fallback drop carries the explicit flag, never silent
    let docs = h
        .artifacts
        .get_latest(record.id, "documentation", ArtifactKind::Docs)
        .await
        .unwrap()
        .unwrap();
    assert!(docs.meta.template_fallback);
    assert!(docs.content_utf8().contains("dependency_unavailable"));
}

#[tokio::test]
async fn test_cancellation_lets_inflight_activity_finish() {
    let store = Arc::new(MemoryWorkflowStore::new());
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let h = harness_with_store(
        store.clone(),
        artifacts,
        vec![("enhance_prompt", Arc::new(CancelRequestingActivity { store }))],
    );

    let record = h
        .scheduler
        .submit(PipelineVariant::Basic, input())
        .await
        .unwrap();
    h.scheduler
        .run_workflow(record.id, CancellationToken::new())
        .await
        .unwrap();

    use qlflow_engine::WorkflowStore;
    let done = h.store.get_workflow(record.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Cancelled);

    // The in-flight stage completed and its artifact was stored
    assert_eq!(
        done.stage("enhance_prompt").unwrap().status,
        StageStatus::Succeeded
    );
    let kinds = kinds_for(&h.artifacts, record.id).await;
    assert!(kinds.contains(&ArtifactKind::Prompt));

    // Remaining stages stay NotStarted after cancellation
    assert_eq!(
        done.stage("generate_code").unwrap().status,
        StageStatus::NotStarted
    );
}

#[tokio::test]
async fn test_pause_and_resume() {
    let store = Arc::new(MemoryWorkflowStore::new());
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let h = harness_with_store(
        store.clone(),
        artifacts,
        vec![("enhance_prompt", Arc::new(PauseRequestingActivity { store }))],
    );

    let record = h
        .scheduler
        .submit(PipelineVariant::Basic, input())
        .await
        .unwrap();
    h.scheduler
        .run_workflow(record.id, CancellationToken::new())
        .await
        .unwrap();

    use qlflow_engine::WorkflowStore;
    let paused = h.store.get_workflow(record.id).await.unwrap();
    assert_eq!(paused.status, WorkflowStatus::Paused);
    // Pause was honored between stages, after the first completed
    assert_eq!(
        paused.stage("enhance_prompt").unwrap().status,
        StageStatus::Succeeded
    );

    h.store.clear_pause(record.id).await.unwrap();
    h.scheduler
        .run_workflow(record.id, CancellationToken::new())
        .await
        .unwrap();

    let done = h.store.get_workflow(record.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn test_crash_mid_stage_recovered_by_second_worker() {
    let store = Arc::new(MemoryWorkflowStore::new());
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let shutdown = CancellationToken::new();

    let h1 = harness_with_store(
        store.clone(),
        artifacts.clone(),
        vec![(
            "generate_code",
            Arc::new(CrashOnceActivity {
                shutdown: shutdown.clone(),
                crashed: AtomicU32::new(0),
            }),
        )],
    );

    let record = h1
        .scheduler
        .submit(PipelineVariant::Basic, input())
        .await
        .unwrap();
    h1.scheduler.run_workflow(record.id, shutdown).await.unwrap();

    use qlflow_engine::WorkflowStore;
    let crashed = store.get_workflow(record.id).await.unwrap();
    assert_eq!(crashed.status, WorkflowStatus::Running);
    assert_eq!(
        crashed.stage("generate_code").unwrap().status,
        StageStatus::InProgress
    );

    // Second worker takes over once the first worker's lease expires
    store.expire_lease(record.id);
    let h2 = harness_with_store(store.clone(), artifacts.clone(), vec![]);
    h2.scheduler
        .run_workflow(record.id, CancellationToken::new())
        .await
        .unwrap();

    let done = store.get_workflow(record.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Completed);

    // Exactly one code artifact at version max
    let code = artifacts
        .get_latest(record.id, "generate_code", ArtifactKind::Code)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code.meta.version, 1);
}

#[tokio::test]
async fn test_lease_blocks_second_scheduler() {
    let store = Arc::new(MemoryWorkflowStore::new());
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let h = harness_with_store(store.clone(), artifacts.clone(), vec![]);

    let record = h
        .scheduler
        .submit(PipelineVariant::Basic, input())
        .await
        .unwrap();

    use qlflow_engine::WorkflowStore;
    // Another live worker already owns the lease
    assert!(store
        .acquire_lease(record.id, "other-worker", std::time::Duration::from_secs(60))
        .await
        .unwrap());

    h.scheduler
        .run_workflow(record.id, CancellationToken::new())
        .await
        .unwrap();

    // No side effects: the workflow is untouched
    let untouched = store.get_workflow(record.id).await.unwrap();
    assert_eq!(untouched.status, WorkflowStatus::Pending);
}

#[tokio::test]
async fn test_empty_prompt_rejected_without_workflow() {
    let h = harness(vec![]);
    let err = h
        .scheduler
        .submit(PipelineVariant::Basic, WorkflowInput::new(""))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);

    use qlflow_engine::WorkflowStore;
    assert!(h.store.list_workflows(None, 10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_events_are_sequenced_per_workflow() {
    let h = harness(vec![]);
    let record = h
        .scheduler
        .submit(PipelineVariant::Basic, input())
        .await
        .unwrap();
    h.scheduler
        .run_workflow(record.id, CancellationToken::new())
        .await
        .unwrap();

    let events = h.events.events_for(record.id);
    assert!(!events.is_empty());
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.seq, i as u64, "sequence numbers are contiguous");
    }
    assert_eq!(events[0].event.name(), "workflow.submitted");
    assert_eq!(events.last().unwrap().event.name(), "workflow.transitioned");
}

#[tokio::test]
async fn test_submitting_twice_yields_independent_workflows() {
    let h = harness(vec![]);
    let a = h
        .scheduler
        .submit(PipelineVariant::Basic, input())
        .await
        .unwrap();
    let b = h
        .scheduler
        .submit(PipelineVariant::Basic, input())
        .await
        .unwrap();

    assert_ne!(a.id, b.id);

    h.scheduler
        .run_workflow(a.id, CancellationToken::new())
        .await
        .unwrap();

    use qlflow_engine::WorkflowStore;
    assert_eq!(
        h.store.get_workflow(a.id).await.unwrap().status,
        WorkflowStatus::Completed
    );
    assert_eq!(
        h.store.get_workflow(b.id).await.unwrap().status,
        WorkflowStatus::Pending
    );
}
