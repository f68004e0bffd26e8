//! Model-generation stage activities
//!
//! Every model stage shares the same shape: assemble a prompt from the
//! workflow input and prior artifacts, dispatch through the provider
//! dispatcher, and return the generated content as the stage artifact.
//! What varies is the prompt, captured by [`ModelStageKind`].

use async_trait::async_trait;
use qlflow_clients::{ChatMessage, GenerateRequest, ModelRouterClient};
use qlflow_core::{idempotency_key, request_digest, ArtifactKind, EngineError};
use qlflow_engine::{ModelUsage, StageActivity, StageContext, StageOutput};

/// Which model stage this activity implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStageKind {
    EnhancePrompt,
    ParseRequirements,
    ProjectStructure,
    GenerateCode,
    GenerateTests,
    Documentation,
    SecurityAnalysis,
    PerformanceAnalysis,
    TestPlan,
    Readme,
}

/// Stage activity calling the model router through the dispatcher
pub struct ModelStageActivity {
    client: ModelRouterClient,
    kind: ModelStageKind,
}

impl ModelStageActivity {
    pub fn new(client: ModelRouterClient, kind: ModelStageKind) -> Self {
        Self { client, kind }
    }

    /// Assemble the prompt for this stage from prior artifacts
    async fn build_messages(&self, ctx: &StageContext) -> Result<Vec<ChatMessage>, EngineError> {
        let input = &ctx.workflow.input;
        let language = input.language_or_default().to_string();

        let messages = match self.kind {
            ModelStageKind::EnhancePrompt => vec![
                ChatMessage::system(
                    "You refine raw software requirements into precise, complete prompts. \
                     Reply with the refined prompt only.",
                ),
                ChatMessage::user(input.prompt.clone()),
            ],
            ModelStageKind::ParseRequirements => {
                let prompt = ctx.require_artifact_utf8(ArtifactKind::Prompt).await?;
                vec![
                    ChatMessage::system(
                        "Extract a functional requirements document from the prompt: \
                         goals, inputs, outputs, constraints, acceptance criteria.",
                    ),
                    ChatMessage::user(prompt),
                ]
            }
            ModelStageKind::ProjectStructure => {
                let frd = ctx.require_artifact_utf8(ArtifactKind::Frd).await?;
                vec![
                    ChatMessage::system(format!(
                        "Propose a project structure as JSON with keys language, \
                         framework, type, files. Target language: {language}.",
                    )),
                    ChatMessage::user(frd),
                ]
            }
            ModelStageKind::GenerateCode => {
                let frd = ctx.require_artifact_utf8(ArtifactKind::Frd).await?;
                let structure = ctx
                    .artifact_of_kind(ArtifactKind::ProjectStructure)
                    .await?
                    .map(|a| a.content_utf8())
                    .unwrap_or_default();
                vec![
                    ChatMessage::system(format!(
                        "Write complete, runnable {language} code implementing the \
                         requirements. Reply with code only, no commentary.",
                    )),
                    ChatMessage::user(format!("{frd}\n\nProject structure:\n{structure}")),
                ]
            }
            ModelStageKind::GenerateTests => {
                let code = ctx.require_artifact_utf8(ArtifactKind::Code).await?;
                vec![
                    ChatMessage::system(format!(
                        "Write a {language} test suite for the following code. \
                         Reply with test code only.",
                    )),
                    ChatMessage::user(code),
                ]
            }
            ModelStageKind::Documentation => {
                let code = ctx.require_artifact_utf8(ArtifactKind::Code).await?;
                vec![
                    ChatMessage::system(
                        "Write developer documentation for the following code: \
                         overview, API reference, usage examples.",
                    ),
                    ChatMessage::user(code),
                ]
            }
            ModelStageKind::SecurityAnalysis => {
                let code = ctx.require_artifact_utf8(ArtifactKind::Code).await?;
                vec![
                    ChatMessage::system(
                        "Review the following code for security issues. Reply as JSON \
                         with keys findings (array) and severity_summary.",
                    ),
                    ChatMessage::user(code),
                ]
            }
            ModelStageKind::PerformanceAnalysis => {
                let code = ctx.require_artifact_utf8(ArtifactKind::Code).await?;
                vec![
                    ChatMessage::system(
                        "Review the following code for performance characteristics. \
                         Reply as JSON with keys hotspots (array) and complexity.",
                    ),
                    ChatMessage::user(code),
                ]
            }
            ModelStageKind::TestPlan => {
                let frd = ctx.require_artifact_utf8(ArtifactKind::Frd).await?;
                vec![
                    ChatMessage::system(
                        "Produce a test plan as JSON with keys scenarios (array of \
                         {name, steps, expected}) and coverage_notes.",
                    ),
                    ChatMessage::user(frd),
                ]
            }
            ModelStageKind::Readme => {
                let code = ctx.require_artifact_utf8(ArtifactKind::Code).await?;
                vec![
                    ChatMessage::system(
                        "Write a README in Markdown: title, description, installation, \
                         usage, license section.",
                    ),
                    ChatMessage::user(code),
                ]
            }
        };

        Ok(messages)
    }
}

#[async_trait]
impl StageActivity for ModelStageActivity {
    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, EngineError> {
        let messages = self.build_messages(ctx).await?;

        let digest = request_digest(&serde_json::json!({
            "stage": ctx.stage.name,
            "messages": messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
        }));
        let idem_key = idempotency_key(ctx.workflow.id, ctx.stage.name, &digest);

        let affinity = ctx.provider_affinity();
        let max_tokens = ctx.max_tokens();
        let client = self.client.clone();
        let cancel = ctx.cancel.clone();

        let dispatched = ctx
            .dispatcher()
            .dispatch(
                ctx.stage.activity,
                affinity.as_deref(),
                ctx.ledger(),
                ctx.model_attempts(),
                ctx.probe_probability(),
                move |provider| {
                    let client = client.clone();
                    let messages = messages.clone();
                    let idem_key = idem_key.clone();
                    let cancel = cancel.clone();
                    async move {
                        let request = GenerateRequest {
                            messages,
                            provider: Some(provider),
                            max_tokens,
                        };
                        let response = client.generate(&request, &idem_key, &cancel).await?;
                        let usage = ModelUsage {
                            tokens_in: response.tokens_in,
                            tokens_out: response.tokens_out,
                            cost_usd: response.cost_usd,
                        };
                        Ok((response.content, usage))
                    }
                },
            )
            .await?;

        Ok(StageOutput {
            content: Some(dispatched.value.into_bytes()),
            content_type: None,
            provider: Some(dispatched.provider),
            attempts: dispatched.attempts,
            cost_usd: dispatched.cost_usd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_copy_and_comparable() {
        let kind = ModelStageKind::GenerateCode;
        let copy = kind;
        assert_eq!(kind, copy);
        assert_ne!(kind, ModelStageKind::Readme);
    }
}
