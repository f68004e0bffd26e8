//! # Capsule assembler
//!
//! Reads the artifacts of a completed workflow, applies a
//! language/framework project template, and emits an immutable capsule:
//! a file tree plus metadata, exportable as a tar+gzip archive with an
//! embedded `.quantum/metadata.json`.

mod archive;
mod assembler;
mod templates;

pub use archive::{to_tar_gz, METADATA_PATH};
pub use assembler::{
    assemble, resolve_inputs, AssemblyInputs, CAPSULE_AUTHOR, DEFAULT_LICENSE,
};
pub use templates::{expand, main_path, select, test_path, ProjectTemplate, TemplateFile};
