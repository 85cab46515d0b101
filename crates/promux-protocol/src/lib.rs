//! Wire-format DTOs for the supported chat protocols, plus SSE framing.
//!
//! This crate does not depend on any HTTP machinery; translators and the
//! stream engine operate on these types, a higher layer performs IO.

pub mod claude;
pub mod format;
pub mod gemini;
pub mod kiro;
pub mod ollama;
pub mod openai;
pub mod responses;
pub mod sse;

pub use format::{detect_chunk_format, WireFormat};
pub use sse::{SseEvent, SseParser};
