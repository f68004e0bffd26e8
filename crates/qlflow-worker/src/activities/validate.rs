//! Validation stage activities
//!
//! `validate_code` (basic) parses the generated code and smoke-runs it
//! in the sandbox for runnable project types; `semantic_validation`
//! (extended) parses and pulls the quality report. Neither produces an
//! artifact; findings land on the stage and activity records.

use async_trait::async_trait;
use qlflow_clients::{ExecuteRequest, ParseRequest, ParserClient, SandboxClient};
use qlflow_core::{ArtifactKind, EngineError, ProjectType};
use qlflow_engine::{StageActivity, StageContext, StageOutput};
use tracing::{debug, info};

/// Sandbox smoke-run budget
const SMOKE_RUN_TIMEOUT_MS: u64 = 10_000;

/// Basic-pipeline validation: parse, then smoke-run where sensible
pub struct ValidateCodeActivity {
    parser: ParserClient,
    sandbox: SandboxClient,
}

impl ValidateCodeActivity {
    pub fn new(parser: ParserClient, sandbox: SandboxClient) -> Self {
        Self { parser, sandbox }
    }
}

#[async_trait]
impl StageActivity for ValidateCodeActivity {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, EngineError> {
        let code = ctx.require_artifact_utf8(ArtifactKind::Code).await?;
        let language = ctx.workflow.input.language_or_default().to_string();

        let parsed = self
            .parser
            .parse(
                &ParseRequest {
                    code: code.clone(),
                    language: language.clone(),
                },
                &ctx.cancel,
            )
            .await?;

        if parsed.has_errors {
            let detail = parsed
                .errors
                .unwrap_or_default()
                .into_iter()
                .map(|e| format!("line {}: {}", e.line, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(EngineError::invalid_argument(format!(
                "generated code failed syntax validation: {detail}"
            )));
        }

        // Long-lived project types (servers, web apps) cannot be
        // smoke-run to completion; parse-clean is enough for those
        let runnable = matches!(
            ctx.workflow.input.project_type,
            Some(ProjectType::Function) | Some(ProjectType::Cli) | None
        );
        if runnable {
            let run = self
                .sandbox
                .execute(
                    &ExecuteRequest {
                        language,
                        code,
                        stdin: None,
                        timeout_ms: SMOKE_RUN_TIMEOUT_MS,
                    },
                    &ctx.cancel,
                )
                .await?;

            if !run.succeeded() {
                return Err(EngineError::invalid_argument(format!(
                    "generated code exited with status {}: {}",
                    run.exit_code,
                    run.stderr.chars().take(500).collect::<String>()
                )));
            }
            debug!(
                workflow_id = %ctx.workflow.id,
                duration_ms = run.duration_ms,
                "sandbox smoke run passed"
            );
        }

        info!(workflow_id = %ctx.workflow.id, "code validation passed");
        Ok(StageOutput::empty())
    }
}

/// Extended-pipeline validation: parse plus quality analysis
pub struct SemanticValidationActivity {
    parser: ParserClient,
}

impl SemanticValidationActivity {
    pub fn new(parser: ParserClient) -> Self {
        Self { parser }
    }
}

#[async_trait]
impl StageActivity for SemanticValidationActivity {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, EngineError> {
        let code = ctx.require_artifact_utf8(ArtifactKind::Code).await?;
        let request = ParseRequest {
            code,
            language: ctx.workflow.input.language_or_default().to_string(),
        };

        let parsed = self.parser.parse(&request, &ctx.cancel).await?;
        if parsed.has_errors {
            return Err(EngineError::invalid_argument(
                "generated code failed semantic validation",
            ));
        }

        let report = self.parser.analyze(&request, &ctx.cancel).await?;
        debug!(
            workflow_id = %ctx.workflow.id,
            score = report.score,
            findings = report.findings.len(),
            "semantic validation report"
        );

        Ok(StageOutput::empty())
    }
}
