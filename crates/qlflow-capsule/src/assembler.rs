//! Capsule assembly
//!
//! Resolves a completed workflow's artifacts, lays them out on the
//! template-provided project tree, and stamps capsule metadata. Assembly
//! is deterministic: the same workflow assembles to the same Merkle root.

use std::collections::BTreeMap;

use chrono::Utc;
use qlflow_core::{
    merkle_root, ArtifactKind, Capsule, CapsuleFile, CapsuleMetadata, EngineError, FileKind,
    WorkflowRecord, WorkflowStatus,
};
use qlflow_store::ArtifactStore;
use tracing::instrument;
use uuid::Uuid;

use crate::templates;

/// Author stamped on every capsule
pub const CAPSULE_AUTHOR: &str = "QuantumLayer Platform";

/// Default license when none is declared
pub const DEFAULT_LICENSE: &str = "MIT";

/// Artifact contents the assembler works from
#[derive(Debug, Default, Clone)]
pub struct AssemblyInputs {
    pub code: Option<String>,
    pub tests: Option<String>,
    pub project_structure: Option<serde_json::Value>,
    pub readme: Option<String>,
    pub docs: Option<String>,
}

/// Resolve assembly inputs from the artifact store
///
/// Latest versions win; absent artifacts stay `None`.
pub async fn resolve_inputs(
    store: &dyn ArtifactStore,
    workflow: &WorkflowRecord,
) -> Result<AssemblyInputs, EngineError> {
    let mut inputs = AssemblyInputs::default();

    for def in qlflow_core::pipeline::stages(workflow.variant) {
        let Some(kind) = def.artifact_kind else { continue };
        let Some(artifact) = store.get_latest(workflow.id, def.name, kind).await? else {
            continue;
        };

        match kind {
            ArtifactKind::Code => inputs.code = Some(artifact.content_utf8()),
            ArtifactKind::Tests => inputs.tests = Some(artifact.content_utf8()),
            ArtifactKind::Readme => inputs.readme = Some(artifact.content_utf8()),
            ArtifactKind::Docs => inputs.docs = Some(artifact.content_utf8()),
            ArtifactKind::ProjectStructure => {
                inputs.project_structure = serde_json::from_slice(&artifact.content).ok();
            }
            _ => {}
        }
    }

    Ok(inputs)
}

/// Assemble a capsule from a completed workflow's artifacts
///
/// # Errors
///
/// - `InvalidArgument` when the workflow is not `Completed`
/// - `NotFound` when no code artifact exists
#[instrument(skip(workflow, inputs), fields(workflow_id = %workflow.id))]
pub fn assemble(workflow: &WorkflowRecord, inputs: &AssemblyInputs) -> Result<Capsule, EngineError> {
    if workflow.status != WorkflowStatus::Completed {
        return Err(EngineError::invalid_argument(format!(
            "capsule assembly requires a completed workflow, found {}",
            workflow.status
        )));
    }
    let code = inputs
        .code
        .as_deref()
        .ok_or_else(|| EngineError::not_found("workflow produced no code artifact"))?;

    // Language/framework/type come from the project_structure artifact
    // when present, else from the declared workflow input
    let structure = inputs.project_structure.as_ref();
    let language = structure
        .and_then(|s| s.get("language"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| workflow.input.language_or_default().to_string());
    let framework = structure
        .and_then(|s| s.get("framework"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let project_type = structure
        .and_then(|s| s.get("type"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| {
            workflow
                .input
                .project_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "function".to_string())
        });

    let template = templates::select(&language, framework.as_deref(), &project_type);
    let name = project_name(&workflow.input.prompt);

    let mut vars: BTreeMap<String, String> = BTreeMap::new();
    vars.insert("name".to_string(), name.clone());
    vars.insert("description".to_string(), workflow.input.prompt.clone());
    vars.insert("version".to_string(), "1.0.0".to_string());
    vars.insert("author".to_string(), CAPSULE_AUTHOR.to_string());
    vars.insert("license".to_string(), DEFAULT_LICENSE.to_string());
    vars.insert("language".to_string(), language.clone());
    vars.insert(
        "framework".to_string(),
        framework.clone().unwrap_or_default(),
    );

    let mut files: BTreeMap<String, CapsuleFile> = BTreeMap::new();

    for tf in template.files {
        files.insert(
            tf.path.to_string(),
            CapsuleFile::new(tf.kind, templates::expand(tf.content, &vars)).with_mode(tf.mode),
        );
    }

    files.insert(
        templates::main_path(&language).to_string(),
        CapsuleFile::new(FileKind::Source, code),
    );
    if let Some(tests) = &inputs.tests {
        files.insert(
            templates::test_path(&language).to_string(),
            CapsuleFile::new(FileKind::Test, tests.as_str()),
        );
    }
    if let Some(readme) = &inputs.readme {
        files.insert(
            "README.md".to_string(),
            CapsuleFile::new(FileKind::Doc, readme.as_str()),
        );
    }
    if let Some(docs) = &inputs.docs {
        files.insert(
            "docs/DOCUMENTATION.md".to_string(),
            CapsuleFile::new(FileKind::Doc, docs.as_str()),
        );
    }

    let mut scripts = BTreeMap::new();
    for (key, command) in [
        ("build", template.build_command),
        ("start", template.start_command),
        ("test", template.test_command),
    ] {
        if !command.is_empty() {
            scripts.insert(key.to_string(), command.to_string());
        }
    }

    let metadata = CapsuleMetadata {
        name,
        version: "1.0.0".to_string(),
        author: CAPSULE_AUTHOR.to_string(),
        license: DEFAULT_LICENSE.to_string(),
        language,
        framework,
        project_type,
        dependencies: template.dependencies.iter().map(|d| d.to_string()).collect(),
        scripts,
    };

    let total_size = files.values().map(|f| f.content.len() as u64).sum();
    let content_hash = merkle_root(&files);

    Ok(Capsule {
        id: Uuid::now_v7(),
        workflow_id: workflow.id,
        files,
        metadata,
        total_size,
        content_hash,
        created_at: Utc::now(),
    })
}

/// Derive a project name slug from the prompt
fn project_name(prompt: &str) -> String {
    let slug: String = prompt
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug: String = slug
        .split('-')
        .filter(|part| !part.is_empty())
        .take(5)
        .collect::<Vec<_>>()
        .join("-");

    if slug.is_empty() {
        "generated-project".to_string()
    } else {
        slug.chars().take(40).collect()
    }
}
