//! Infrastructure layer for anchor witnessing
//!
//! Contains the collaborator traits and their implementations:
//! - Status, proof and anchor event stores (in-memory, PostgreSQL)
//! - Monitoring watch registry
//! - Channel publisher for finalized anchor events
//! - Retry with backoff for redelivery

mod error;
pub mod memory;
pub mod postgres;
mod publisher;
mod retry;
mod traits;

pub use error::*;
pub use memory::{
    MemoryAnchorEventStore, MemoryMonitoringService, MemoryProofStore, MemoryStatusStore, Watch,
};
pub use postgres::{PgAnchorEventStore, PgProofStore, PgStatusStore};
pub use publisher::ChannelPublisher;
pub use retry::{is_retryable_db_error, Retry, RetryConfig, RetryResult};
pub use traits::*;
