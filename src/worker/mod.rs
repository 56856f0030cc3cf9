//! Background store context: owns the local store, reachable only by messages.

pub mod protocol;
pub mod service;

pub use protocol::{Envelope, Inbound, WorkerControl, WorkerNotification, WorkerReply, WorkerRequest};
pub use service::{StoreWorker, WorkerHandle, WorkerOptions, WorkerPhase};
