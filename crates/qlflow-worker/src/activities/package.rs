//! Packaging stage activity
//!
//! Final stage of both pipelines: hands the generated code to the
//! capsule builder service and records its descriptor as the
//! `capsule_manifest` artifact.

use std::collections::BTreeMap;

use async_trait::async_trait;
use qlflow_clients::{BuildRequest, CapsuleBuilderClient};
use qlflow_core::{idempotency_key, request_digest, ArtifactKind, EngineError};
use qlflow_engine::{StageActivity, StageContext, StageOutput};
use tracing::info;

/// Calls the capsule builder and emits the capsule manifest
pub struct PackageActivity {
    client: CapsuleBuilderClient,
}

impl PackageActivity {
    pub fn new(client: CapsuleBuilderClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StageActivity for PackageActivity {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, EngineError> {
        let input = &ctx.workflow.input;
        let code = ctx.require_artifact_utf8(ArtifactKind::Code).await?;
        let tests = ctx
            .artifact_of_kind(ArtifactKind::Tests)
            .await?
            .map(|a| a.content_utf8());

        let language = input.language_or_default().to_string();
        let project_type = input
            .project_type
            .map(|t| t.to_string())
            .unwrap_or_else(|| "function".to_string());

        let request = BuildRequest {
            workflow_id: ctx.workflow.id,
            language: language.clone(),
            framework: None,
            project_type: project_type.clone(),
            name: name_from_prompt(&input.prompt),
            code,
            tests,
            dependencies: vec![],
            metadata: BTreeMap::new(),
        };

        let digest = request_digest(&serde_json::json!({
            "stage": ctx.stage.name,
            "workflow_id": ctx.workflow.id,
        }));
        let idem_key = idempotency_key(ctx.workflow.id, ctx.stage.name, &digest);

        let descriptor = self.client.build(&request, &idem_key, &ctx.cancel).await?;
        info!(
            workflow_id = %ctx.workflow.id,
            capsule_id = %descriptor.capsule_id,
            files = descriptor.file_count,
            "capsule build requested"
        );

        let manifest = serde_json::to_vec_pretty(&serde_json::json!({
            "capsule_id": descriptor.capsule_id,
            "file_count": descriptor.file_count,
            "total_size": descriptor.total_size,
            "warnings": descriptor.warnings,
            "language": language,
            "type": project_type,
        }))?;

        Ok(StageOutput::with_content(manifest))
    }
}

fn name_from_prompt(prompt: &str) -> String {
    let slug: String = prompt
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug
        .split('-')
        .filter(|p| !p.is_empty())
        .take(5)
        .collect::<Vec<_>>()
        .join("-");

    if slug.is_empty() {
        "generated-project".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_from_prompt() {
        assert_eq!(name_from_prompt("Add two numbers"), "add-two-numbers");
        assert_eq!(name_from_prompt("???"), "generated-project");
    }
}
