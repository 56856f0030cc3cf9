//! Remote API client.

pub mod client;

pub use client::{HttpTodoApi, TodoApi};
