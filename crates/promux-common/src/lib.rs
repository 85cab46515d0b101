//! Shared configuration and the per-machine document model.
//!
//! Everything here is plain data: the machine document is what the storage
//! layer persists as JSON and what the pool/pipeline layers mutate. No IO.

pub mod config;
pub mod machine;

pub use config::{ObservabilityConfig, ServerConfig};
pub use machine::{
    ApiKey, Combo, ConnectionHealth, ConnectionStatus, ConnectionUsage, FallbackStrategy,
    MachineData, MachineSettings, ProviderConnection,
};
