//! Reconciliation between the in-memory list, the offline store and the backend.

pub mod engine;
pub mod monitor;

#[cfg(test)]
pub(crate) mod stub;

pub use engine::{SyncEngine, SyncOutcome};
pub use monitor::HealthMonitor;
