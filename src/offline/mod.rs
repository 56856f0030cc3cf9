//! Client-side access to the offline store.

pub mod storage;

pub use storage::OfflineStorage;
