//! # Pipeline worker
//!
//! Stage activity implementations for both pipelines (model stages
//! through the provider dispatcher, validation through the parser and
//! sandbox, packaging through the capsule builder) and the in-process
//! [`Runner`] that spawns one driving task per workflow.

pub mod activities;
mod runner;

pub use activities::{
    build_registry, ModelStageActivity, ModelStageKind, PackageActivity,
    SemanticValidationActivity, ValidateCodeActivity,
};
pub use runner::Runner;
