//! # Specialist-service clients
//!
//! Typed HTTP clients for the external worker services the pipeline
//! fans out to. Every client validates inputs structurally before
//! dispatch, makes exactly one attempt per call, and maps transport and
//! status failures onto the engine error taxonomy; retry and fallback
//! policy live in the engine, never here.

mod capsule_builder;
mod http;
mod model_router;
mod parser;
mod sandbox;

pub use capsule_builder::{BuildRequest, BuildResponse, CapsuleBuilderClient};
pub use http::{ServiceClient, OPERATION_TIMEOUT};
pub use model_router::{ChatMessage, GenerateRequest, GenerateResponse, ModelRouterClient};
pub use parser::{AnalysisReport, ParseIssue, ParseRequest, ParseResponse, ParserClient};
pub use sandbox::{ExecuteRequest, ExecuteResponse, SandboxClient};
