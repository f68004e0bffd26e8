//! # Artifact store client
//!
//! Durable, lineage-preserving storage of per-stage outputs ("drops").
//!
//! Every write assigns a monotone, gap-free version per
//! `(workflow, stage, kind)`; content is addressed by sha256 so duplicate
//! writes share one blob. Deletes are tombstoned. A replayed stage
//! therefore produces an additional version and never corrupts state.

mod memory;
mod postgres;
mod store;

pub use memory::MemoryArtifactStore;
pub use postgres::PostgresArtifactStore;
pub use store::{ArtifactStore, PutArtifact, StoreError};
