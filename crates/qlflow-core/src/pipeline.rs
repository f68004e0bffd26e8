//! Built-in pipeline definitions
//!
//! A pipeline is an ordered list of stage definitions. Two pipelines are
//! recognized: basic (5 stages) and extended (12 stages). Stages run
//! strictly sequentially; dependency gates name earlier stages whose
//! success is required beyond simple ordering.

use crate::artifact::ArtifactKind;
use crate::workflow::{PipelineVariant, WorkflowInput};

/// Target service names, used for bulkhead keys and activity records
pub mod targets {
    pub const MODEL_ROUTER: &str = "model-router";
    pub const PARSER: &str = "parser";
    pub const SANDBOX: &str = "sandbox";
    pub const CAPSULE_BUILDER: &str = "capsule-builder";
}

/// Predicate deciding whether a stage is skipped for a given input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipRule {
    /// Stage always runs
    Never,

    /// Stage is skipped when the input disables test generation
    WhenTestsDisabled,
}

impl SkipRule {
    /// Evaluate the predicate against the workflow input
    pub fn applies(&self, input: &WorkflowInput) -> bool {
        match self {
            Self::Never => false,
            Self::WhenTestsDisabled => !input.generate_tests,
        }
    }
}

/// What a stage failure means for the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stage failure fails the workflow (the default)
    FailWorkflow,

    /// Persist a template-fallback artifact recording the failure and
    /// continue; the artifact carries the `template_fallback` flag
    FallbackArtifact,
}

/// Definition of one pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDef {
    /// Stage name, unique within the pipeline
    pub name: &'static str,

    /// Activity invoked by this stage
    pub activity: &'static str,

    /// Target specialist service
    pub target: &'static str,

    /// Artifact kind persisted on success, if the stage produces one
    pub artifact_kind: Option<ArtifactKind>,

    /// Named retry policy applied to the activity
    pub retry_policy: &'static str,

    /// Earlier stages whose success is required
    pub gates: &'static [&'static str],

    /// Skip predicate
    pub skip: SkipRule,

    /// Failure handling
    pub on_failure: FailurePolicy,
}

impl StageDef {
    /// Whether this stage dispatches through the provider dispatcher
    pub fn is_model_stage(&self) -> bool {
        self.target == targets::MODEL_ROUTER
    }
}

/// The basic five-stage pipeline
pub const BASIC_STAGES: &[StageDef] = &[
    StageDef {
        name: "enhance_prompt",
        activity: "enhance_prompt",
        target: targets::MODEL_ROUTER,
        artifact_kind: Some(ArtifactKind::Prompt),
        retry_policy: "model",
        gates: &[],
        skip: SkipRule::Never,
        on_failure: FailurePolicy::FailWorkflow,
    },
    StageDef {
        name: "parse_requirements",
        activity: "parse_requirements",
        target: targets::MODEL_ROUTER,
        artifact_kind: Some(ArtifactKind::Frd),
        retry_policy: "model",
        gates: &["enhance_prompt"],
        skip: SkipRule::Never,
        on_failure: FailurePolicy::FailWorkflow,
    },
    StageDef {
        name: "generate_code",
        activity: "generate_code",
        target: targets::MODEL_ROUTER,
        artifact_kind: Some(ArtifactKind::Code),
        retry_policy: "model",
        gates: &["parse_requirements"],
        skip: SkipRule::Never,
        on_failure: FailurePolicy::FailWorkflow,
    },
    StageDef {
        name: "validate_code",
        activity: "validate_code",
        target: targets::PARSER,
        artifact_kind: None,
        retry_policy: "transient",
        gates: &["generate_code"],
        skip: SkipRule::Never,
        on_failure: FailurePolicy::FailWorkflow,
    },
    StageDef {
        name: "organize_output",
        activity: "organize_output",
        target: targets::CAPSULE_BUILDER,
        artifact_kind: Some(ArtifactKind::CapsuleManifest),
        retry_policy: "transient",
        gates: &["generate_code"],
        skip: SkipRule::Never,
        on_failure: FailurePolicy::FailWorkflow,
    },
];

/// The extended twelve-stage pipeline
pub const EXTENDED_STAGES: &[StageDef] = &[
    StageDef {
        name: "prompt_enhancement",
        activity: "prompt_enhancement",
        target: targets::MODEL_ROUTER,
        artifact_kind: Some(ArtifactKind::Prompt),
        retry_policy: "model",
        gates: &[],
        skip: SkipRule::Never,
        on_failure: FailurePolicy::FailWorkflow,
    },
    StageDef {
        name: "frd_generation",
        activity: "frd_generation",
        target: targets::MODEL_ROUTER,
        artifact_kind: Some(ArtifactKind::Frd),
        retry_policy: "model",
        gates: &["prompt_enhancement"],
        skip: SkipRule::Never,
        on_failure: FailurePolicy::FailWorkflow,
    },
    StageDef {
        name: "project_structure",
        activity: "project_structure",
        target: targets::MODEL_ROUTER,
        artifact_kind: Some(ArtifactKind::ProjectStructure),
        retry_policy: "model",
        gates: &["frd_generation"],
        skip: SkipRule::Never,
        on_failure: FailurePolicy::FailWorkflow,
    },
    StageDef {
        name: "code_generation",
        activity: "code_generation",
        target: targets::MODEL_ROUTER,
        artifact_kind: Some(ArtifactKind::Code),
        retry_policy: "model",
        gates: &["frd_generation", "project_structure"],
        skip: SkipRule::Never,
        on_failure: FailurePolicy::FailWorkflow,
    },
    StageDef {
        name: "semantic_validation",
        activity: "semantic_validation",
        target: targets::PARSER,
        artifact_kind: None,
        retry_policy: "transient",
        gates: &["code_generation"],
        skip: SkipRule::Never,
        on_failure: FailurePolicy::FailWorkflow,
    },
    StageDef {
        name: "test_generation",
        activity: "test_generation",
        target: targets::MODEL_ROUTER,
        artifact_kind: Some(ArtifactKind::Tests),
        retry_policy: "model",
        gates: &["code_generation"],
        skip: SkipRule::WhenTestsDisabled,
        on_failure: FailurePolicy::FallbackArtifact,
    },
    StageDef {
        name: "documentation",
        activity: "documentation",
        target: targets::MODEL_ROUTER,
        artifact_kind: Some(ArtifactKind::Docs),
        retry_policy: "model",
        gates: &["code_generation"],
        skip: SkipRule::Never,
        on_failure: FailurePolicy::FallbackArtifact,
    },
    StageDef {
        name: "security_analysis",
        activity: "security_analysis",
        target: targets::MODEL_ROUTER,
        artifact_kind: Some(ArtifactKind::SecurityReport),
        retry_policy: "model",
        gates: &["code_generation"],
        skip: SkipRule::Never,
        on_failure: FailurePolicy::FallbackArtifact,
    },
    StageDef {
        name: "performance_analysis",
        activity: "performance_analysis",
        target: targets::MODEL_ROUTER,
        artifact_kind: Some(ArtifactKind::PerformanceReport),
        retry_policy: "model",
        gates: &["code_generation"],
        skip: SkipRule::Never,
        on_failure: FailurePolicy::FallbackArtifact,
    },
    StageDef {
        name: "test_plan",
        activity: "test_plan",
        target: targets::MODEL_ROUTER,
        artifact_kind: Some(ArtifactKind::TestPlan),
        retry_policy: "model",
        gates: &["code_generation"],
        skip: SkipRule::Never,
        on_failure: FailurePolicy::FallbackArtifact,
    },
    StageDef {
        name: "readme",
        activity: "readme",
        target: targets::MODEL_ROUTER,
        artifact_kind: Some(ArtifactKind::Readme),
        retry_policy: "model",
        gates: &["code_generation"],
        skip: SkipRule::Never,
        on_failure: FailurePolicy::FallbackArtifact,
    },
    StageDef {
        name: "capsule_packaging",
        activity: "capsule_packaging",
        target: targets::CAPSULE_BUILDER,
        artifact_kind: Some(ArtifactKind::CapsuleManifest),
        retry_policy: "transient",
        gates: &["code_generation"],
        skip: SkipRule::Never,
        on_failure: FailurePolicy::FailWorkflow,
    },
];

/// Stages of a pipeline variant, in execution order
pub fn stages(variant: PipelineVariant) -> &'static [StageDef] {
    match variant {
        PipelineVariant::Basic => BASIC_STAGES,
        PipelineVariant::Extended => EXTENDED_STAGES,
    }
}

/// Stage names of a pipeline variant, in execution order
pub fn stage_names(variant: PipelineVariant) -> Vec<&'static str> {
    stages(variant).iter().map(|s| s.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_pipeline_shape() {
        assert_eq!(BASIC_STAGES.len(), 5);
        assert_eq!(BASIC_STAGES[0].name, "enhance_prompt");
        assert_eq!(BASIC_STAGES[4].name, "organize_output");
    }

    #[test]
    fn test_extended_pipeline_shape() {
        assert_eq!(EXTENDED_STAGES.len(), 12);
        assert_eq!(EXTENDED_STAGES[0].name, "prompt_enhancement");
        assert_eq!(EXTENDED_STAGES[11].name, "capsule_packaging");
    }

    #[test]
    fn test_stage_names_unique() {
        for variant in [PipelineVariant::Basic, PipelineVariant::Extended] {
            let names = stage_names(variant);
            let mut deduped = names.clone();
            deduped.sort();
            deduped.dedup();
            assert_eq!(deduped.len(), names.len());
        }
    }

    #[test]
    fn test_gates_reference_earlier_stages() {
        for variant in [PipelineVariant::Basic, PipelineVariant::Extended] {
            let defs = stages(variant);
            for (i, def) in defs.iter().enumerate() {
                for gate in def.gates {
                    let gate_pos = defs.iter().position(|s| s.name == *gate);
                    assert!(
                        matches!(gate_pos, Some(p) if p < i),
                        "gate {gate} of {} must name an earlier stage",
                        def.name
                    );
                }
            }
        }
    }

    #[test]
    fn test_every_artifact_kind_covered_by_extended() {
        use ArtifactKind::*;
        let produced: Vec<ArtifactKind> = EXTENDED_STAGES
            .iter()
            .filter_map(|s| s.artifact_kind)
            .collect();

        for kind in [
            Prompt,
            Frd,
            ProjectStructure,
            Code,
            Tests,
            Docs,
            SecurityReport,
            PerformanceReport,
            TestPlan,
            Readme,
            CapsuleManifest,
        ] {
            assert!(produced.contains(&kind), "extended pipeline must produce {kind}");
        }
    }

    #[test]
    fn test_no_duplicate_kinds_within_pipeline() {
        for variant in [PipelineVariant::Basic, PipelineVariant::Extended] {
            let mut kinds: Vec<ArtifactKind> =
                stages(variant).iter().filter_map(|s| s.artifact_kind).collect();
            let before = kinds.len();
            kinds.sort_by_key(|k| k.as_str());
            kinds.dedup();
            assert_eq!(kinds.len(), before, "{variant} produces a kind twice");
        }
    }

    #[test]
    fn test_model_stages_use_model_policy() {
        for def in BASIC_STAGES.iter().chain(EXTENDED_STAGES) {
            if def.is_model_stage() {
                assert_eq!(def.retry_policy, "model", "stage {}", def.name);
            }
        }
    }

    #[test]
    fn test_skip_rule_tests_disabled() {
        let mut input = crate::workflow::WorkflowInput::new("p");
        input.generate_tests = false;

        let test_stage = EXTENDED_STAGES
            .iter()
            .find(|s| s.name == "test_generation")
            .unwrap();
        assert!(test_stage.skip.applies(&input));

        input.generate_tests = true;
        assert!(!test_stage.skip.applies(&input));
    }
}
