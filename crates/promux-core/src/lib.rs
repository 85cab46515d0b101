//! The request pipeline: authentication, model resolution, credential
//! selection, dispatch with in-request fallback, and the SSE stream engine.

pub mod engine;
pub mod error;
pub mod keys;
pub mod pipeline;
pub mod resolve;

pub use engine::{EngineConfig, StreamOutcome};
pub use error::{error_body, PipelineBody, PipelineResponse};
pub use keys::{format_key, parse_key, ParsedKey};
pub use pipeline::{ChatCall, Pipeline};
pub use resolve::{resolve_model, ProviderModel, ResolveError, ResolvedModel};
