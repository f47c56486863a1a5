//! PostgreSQL-backed anchor event store
//!
//! Anchor events are immutable documents keyed by index and stored as JSONB.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::types::Json;

use crate::domain::AnchorEvent;
use crate::infra::{AnchorEventStore, Result, WitnessError};

pub struct PgAnchorEventStore {
    pool: PgPool,
}

impl PgAnchorEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize the anchor event table
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS anchor_events (
                anchor_index TEXT PRIMARY KEY,
                document JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store an anchor event. Re-storing an existing index is a no-op.
    pub async fn put(&self, anchor_event: &AnchorEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO anchor_events (anchor_index, document)
            VALUES ($1, $2)
            ON CONFLICT (anchor_index) DO NOTHING
            "#,
        )
        .bind(&anchor_event.index)
        .bind(Json(anchor_event))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AnchorEventStore for PgAnchorEventStore {
    async fn get(&self, index: &str) -> Result<AnchorEvent> {
        let row: Option<(Json<AnchorEvent>,)> =
            sqlx::query_as("SELECT document FROM anchor_events WHERE anchor_index = $1")
                .bind(index)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(Json(event),)| event)
            .ok_or_else(|| WitnessError::AnchorEventNotFound(index.to_string()))
    }
}
