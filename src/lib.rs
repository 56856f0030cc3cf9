//! todo-sync: offline-first todo list with a background store and queued sync.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod network;
pub mod offline;
pub mod server;
pub mod store;
pub mod sync;
pub mod todos;
pub mod worker;
