//! Pairwise wire-format translation.
//!
//! Two dispatch tables, both keyed by `(source, target)`: request translators
//! rewrite a client payload into a provider payload, stream translators turn
//! one parsed provider chunk into zero or more client chunks against an
//! explicit [`StreamState`]. There is deliberately no normalised intermediate
//! representation; each pair maps directly so nothing is lost to a lowest
//! common denominator.

pub mod error;
pub mod nonstream;
pub mod registry;
pub mod request;
pub mod state;
pub mod stream;
pub mod usage;

pub use error::TranslateError;
pub use registry::{RequestCtx, RequestFn, StreamFn, TranslateRegistry};
pub use state::{StreamState, ToolCallState};
pub use usage::{
    estimate_usage, extract_chunk_facts, usage_json, ChunkFacts, UsageTally,
    ESTIMATE_CHARS_PER_TOKEN, ESTIMATE_TOKEN_BUFFER,
};
