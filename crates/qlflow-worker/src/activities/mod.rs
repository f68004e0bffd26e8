//! Stage activity implementations

mod model;
mod package;
mod validate;

pub use model::{ModelStageActivity, ModelStageKind};
pub use package::PackageActivity;
pub use validate::{SemanticValidationActivity, ValidateCodeActivity};

use std::sync::Arc;

use qlflow_clients::{CapsuleBuilderClient, ModelRouterClient, ParserClient, SandboxClient};
use qlflow_core::config::ServiceEndpoints;
use qlflow_engine::ActivityRegistry;

/// Build the full activity registry for both pipelines
pub fn build_registry(services: &ServiceEndpoints) -> ActivityRegistry {
    let model = ModelRouterClient::new(services.model_router.clone());
    let parser = ParserClient::new(services.parser.clone());
    let sandbox = SandboxClient::new(services.sandbox.clone());
    let builder = CapsuleBuilderClient::new(services.capsule_builder.clone());

    let mut registry = ActivityRegistry::new();

    // Basic pipeline
    registry.register(
        "enhance_prompt",
        Arc::new(ModelStageActivity::new(model.clone(), ModelStageKind::EnhancePrompt)),
    );
    registry.register(
        "parse_requirements",
        Arc::new(ModelStageActivity::new(model.clone(), ModelStageKind::ParseRequirements)),
    );
    registry.register(
        "generate_code",
        Arc::new(ModelStageActivity::new(model.clone(), ModelStageKind::GenerateCode)),
    );
    registry.register(
        "validate_code",
        Arc::new(ValidateCodeActivity::new(parser.clone(), sandbox)),
    );
    registry.register("organize_output", Arc::new(PackageActivity::new(builder.clone())));

    // Extended pipeline
    registry.register(
        "prompt_enhancement",
        Arc::new(ModelStageActivity::new(model.clone(), ModelStageKind::EnhancePrompt)),
    );
    registry.register(
        "frd_generation",
        Arc::new(ModelStageActivity::new(model.clone(), ModelStageKind::ParseRequirements)),
    );
    registry.register(
        "project_structure",
        Arc::new(ModelStageActivity::new(model.clone(), ModelStageKind::ProjectStructure)),
    );
    registry.register(
        "code_generation",
        Arc::new(ModelStageActivity::new(model.clone(), ModelStageKind::GenerateCode)),
    );
    registry.register(
        "semantic_validation",
        Arc::new(SemanticValidationActivity::new(parser)),
    );
    registry.register(
        "test_generation",
        Arc::new(ModelStageActivity::new(model.clone(), ModelStageKind::GenerateTests)),
    );
    registry.register(
        "documentation",
        Arc::new(ModelStageActivity::new(model.clone(), ModelStageKind::Documentation)),
    );
    registry.register(
        "security_analysis",
        Arc::new(ModelStageActivity::new(model.clone(), ModelStageKind::SecurityAnalysis)),
    );
    registry.register(
        "performance_analysis",
        Arc::new(ModelStageActivity::new(model.clone(), ModelStageKind::PerformanceAnalysis)),
    );
    registry.register(
        "test_plan",
        Arc::new(ModelStageActivity::new(model.clone(), ModelStageKind::TestPlan)),
    );
    registry.register(
        "readme",
        Arc::new(ModelStageActivity::new(model, ModelStageKind::Readme)),
    );
    registry.register("capsule_packaging", Arc::new(PackageActivity::new(builder)));

    registry
}
