//! Credential selection and health tracking.
//!
//! The pool owns no credential data of its own: selection is a synchronous
//! function over a loaded machine document, serialised by the per-machine
//! mutex the caller holds across the load -> select -> persist window.
//! Health updates are pure document mutations persisted last-write-wins.

pub mod model_locks;
pub mod policy;
pub mod pool;

pub use model_locks::ModelLockMap;
pub use policy::{classify_failure, FailureDecision, MODEL_LOCK_DEFAULT, MODEL_LOCK_RETRY_SECS};
pub use pool::{CredentialPool, Selected, SelectOutcome};
