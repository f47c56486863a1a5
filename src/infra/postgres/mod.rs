//! PostgreSQL implementations of the witness stores
//!
//! Each store creates its own table in `initialize()`.

mod anchor_event_store;
mod proof_store;
mod status_store;

pub use anchor_event_store::*;
pub use proof_store::*;
pub use status_store::*;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::infra::Result;

/// Connect and create all witness tables
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    PgStatusStore::new(pool.clone()).initialize().await?;
    PgProofStore::new(pool.clone()).initialize().await?;
    PgAnchorEventStore::new(pool.clone()).initialize().await?;

    Ok(pool)
}
