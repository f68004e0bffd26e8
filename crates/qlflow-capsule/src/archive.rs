//! Capsule archive export
//!
//! tar+gzip with file mode bits preserved and the capsule metadata
//! embedded as `.quantum/metadata.json`.

use flate2::write::GzEncoder;
use flate2::Compression;
use qlflow_core::{Capsule, EngineError};

/// Path of the embedded metadata document
pub const METADATA_PATH: &str = ".quantum/metadata.json";

/// Export a capsule as a gzipped tarball
pub fn to_tar_gz(capsule: &Capsule) -> Result<Vec<u8>, EngineError> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let metadata = serde_json::to_vec_pretty(&capsule.metadata)?;
    append(&mut builder, METADATA_PATH, &metadata, 0o644)?;

    for (path, file) in &capsule.files {
        append(&mut builder, path, &file.content, file.mode)?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| EngineError::internal(format!("tar finalization failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| EngineError::internal(format!("gzip finalization failed: {e}")))
}

fn append<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    content: &[u8],
    mode: u32,
) -> Result<(), EngineError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_cksum();

    builder
        .append_data(&mut header, path, content)
        .map_err(|e| EngineError::internal(format!("tar append failed for {path}: {e}")))
}
