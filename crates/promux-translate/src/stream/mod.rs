//! Streaming response translation, one module per provider dialect.
//!
//! Every module exposes `translate(chunk, state)`: `Some(chunk)` maps one
//! parsed provider chunk to client chunks, `None` is the terminal flush.

pub mod emit;
pub mod from_claude;
pub mod from_gemini;
pub mod from_openai;
pub mod from_responses;
