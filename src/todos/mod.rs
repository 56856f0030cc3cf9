//! Todo records and the types that travel with them.

pub mod model;

pub use model::{
    ApiResponse, Connectivity, HealthReport, OperationKind, PendingOperation, SyncAction, SyncStatus,
    Todo, TodoPatch,
};
