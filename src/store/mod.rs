//! Persistence layer: the durable todo snapshot and pending-operation queue.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::LocalStore;
