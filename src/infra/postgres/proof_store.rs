//! PostgreSQL-backed witness proof store

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::FromRow;

use crate::domain::{proof_digest, Witness, WitnessProof, WitnessUri};
use crate::infra::{ProofStore, Result, WitnessError};

#[derive(FromRow)]
struct ProofRow {
    witness_uri: String,
    witness_type: String,
    proof: Option<Vec<u8>>,
}

impl TryFrom<ProofRow> for WitnessProof {
    type Error = WitnessError;

    fn try_from(row: ProofRow) -> Result<Self> {
        Ok(WitnessProof {
            witness: Witness {
                witness_type: row.witness_type.parse()?,
                uri: WitnessUri::new(row.witness_uri)?,
            },
            proof: row.proof,
        })
    }
}

/// PostgreSQL proof store.
///
/// Rows are created by [`ProofStore::put`]; a proof is written once with
/// `UPDATE ... WHERE proof IS NULL`, and later submissions are compared by
/// SHA-256 digest.
pub struct PgProofStore {
    pool: PgPool,
}

impl PgProofStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize the proof table
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS anchor_witness_proofs (
                position BIGSERIAL,
                anchor_event_id TEXT NOT NULL,
                witness_uri TEXT NOT NULL,
                witness_type VARCHAR(16) NOT NULL,
                proof BYTEA,
                proof_digest BYTEA,
                received_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (anchor_event_id, witness_uri)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_anchor_witness_proofs_order
            ON anchor_witness_proofs (anchor_event_id, position)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ProofStore for PgProofStore {
    async fn put(&self, anchor_event_id: &str, witnesses: Vec<Witness>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for witness in &witnesses {
            sqlx::query(
                r#"
                INSERT INTO anchor_witness_proofs (
                    anchor_event_id, witness_uri, witness_type
                ) VALUES ($1, $2, $3)
                ON CONFLICT (anchor_event_id, witness_uri) DO NOTHING
                "#,
            )
            .bind(anchor_event_id)
            .bind(witness.uri.as_str())
            .bind(witness.witness_type.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn add_proof(
        &self,
        anchor_event_id: &str,
        witness: &WitnessUri,
        proof: &[u8],
    ) -> Result<()> {
        let digest = proof_digest(proof);

        let result = sqlx::query(
            r#"
            UPDATE anchor_witness_proofs
            SET proof = $3, proof_digest = $4, received_at = NOW()
            WHERE anchor_event_id = $1 AND witness_uri = $2 AND proof IS NULL
            "#,
        )
        .bind(anchor_event_id)
        .bind(witness.as_str())
        .bind(proof)
        .bind(&digest[..])
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let existing: Option<(Option<Vec<u8>>,)> = sqlx::query_as(
            r#"
            SELECT proof_digest FROM anchor_witness_proofs
            WHERE anchor_event_id = $1 AND witness_uri = $2
            "#,
        )
        .bind(anchor_event_id)
        .bind(witness.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            None => Err(WitnessError::WitnessNotFound {
                anchor_event_id: anchor_event_id.to_string(),
                witness: witness.to_string(),
            }),
            Some((Some(stored),)) if stored.as_slice() == digest.as_slice() => Ok(()),
            Some(_) => Err(WitnessError::ConflictingProof {
                anchor_event_id: anchor_event_id.to_string(),
                witness: witness.to_string(),
            }),
        }
    }

    async fn get(&self, anchor_event_id: &str) -> Result<Vec<WitnessProof>> {
        let rows = sqlx::query_as::<_, ProofRow>(
            r#"
            SELECT witness_uri, witness_type, proof
            FROM anchor_witness_proofs
            WHERE anchor_event_id = $1
            ORDER BY position
            "#,
        )
        .bind(anchor_event_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WitnessProof::try_from).collect()
    }
}
