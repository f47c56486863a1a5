//! PostgreSQL-backed witness status store
//!
//! The completion transition is a single conditional `UPDATE`, so replicas
//! racing to finalize the same anchor event cannot both win.

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use crate::domain::WitnessStatus;
use crate::infra::{Result, StatusStore, WitnessError};

/// PostgreSQL status store
pub struct PgStatusStore {
    pool: PgPool,
}

impl PgStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize the status table
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS anchor_witness_status (
                anchor_event_id TEXT PRIMARY KEY,
                status VARCHAR(16) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn current(&self, anchor_event_id: &str) -> Result<Option<WitnessStatus>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT status FROM anchor_witness_status WHERE anchor_event_id = $1",
        )
        .bind(anchor_event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(status,)| status.parse()).transpose()
    }
}

#[async_trait]
impl StatusStore for PgStatusStore {
    async fn add_status(&self, anchor_event_id: &str, status: WitnessStatus) -> Result<()> {
        // Upsert unless that would move a completed anchor event backwards.
        let result = sqlx::query(
            r#"
            INSERT INTO anchor_witness_status (anchor_event_id, status)
            VALUES ($1, $2)
            ON CONFLICT (anchor_event_id) DO UPDATE SET
                status = EXCLUDED.status,
                updated_at = NOW()
            WHERE anchor_witness_status.status <> 'completed'
               OR EXCLUDED.status = 'completed'
            "#,
        )
        .bind(anchor_event_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WitnessError::InvalidStatusTransition {
                anchor_event_id: anchor_event_id.to_string(),
                from: WitnessStatus::Completed.to_string(),
                to: status.to_string(),
            });
        }

        Ok(())
    }

    async fn get_status(&self, anchor_event_id: &str) -> Result<WitnessStatus> {
        self.current(anchor_event_id)
            .await?
            .ok_or_else(|| WitnessError::StatusNotFound(anchor_event_id.to_string()))
    }

    async fn set_status_if(
        &self,
        anchor_event_id: &str,
        expected: WitnessStatus,
        new: WitnessStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE anchor_witness_status
            SET status = $3, updated_at = NOW()
            WHERE anchor_event_id = $1 AND status = $2
            "#,
        )
        .bind(anchor_event_id)
        .bind(expected.as_str())
        .bind(new.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        match self.current(anchor_event_id).await? {
            Some(_) => Ok(false),
            None => Err(WitnessError::StatusNotFound(anchor_event_id.to_string())),
        }
    }
}
