//! SQLite persistence: the machine-document store and the best-effort
//! observability sink. Two separate databases per the deployment layout.

pub mod db;
pub mod entities;
pub mod observability;
pub mod store;

pub use db::{connect, init_machine_schema, init_observability_schema};
pub use observability::{ObservabilitySink, RequestDetailRecord, UsageRecord};
pub use store::{MachineStore, StorageError, StorageResult};
