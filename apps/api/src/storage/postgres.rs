use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::{EntityRecord, MatchResult, StructuredFields};
use crate::pipeline::error::PipelineError;
use crate::storage::{EntityStore, MatchStore};

/// PostgreSQL-backed store for both entity kinds and match results.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct EntityRow {
    id: Uuid,
    revision: i32,
    fingerprint: Uuid,
    mime_type: String,
    filename: Option<String>,
    document_key: String,
    raw_text: Option<String>,
    fields: Option<Value>,
    embedding: Option<Vec<f32>>,
    state: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EntityRow {
    fn into_record<F: StructuredFields>(self) -> Result<EntityRecord<F>, PipelineError> {
        let fields = self
            .fields
            .map(serde_json::from_value::<F>)
            .transpose()
            .map_err(|e| corrupt_row(self.id, "fields", e))?;
        let state =
            serde_json::from_value(self.state).map_err(|e| corrupt_row(self.id, "state", e))?;

        Ok(EntityRecord {
            id: self.id,
            kind: F::KIND,
            revision: self.revision,
            fingerprint: self.fingerprint,
            mime_type: self.mime_type,
            filename: self.filename,
            document_key: self.document_key,
            raw_text: self.raw_text,
            fields,
            embedding: self.embedding,
            state,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn corrupt_row(id: Uuid, column: &str, e: serde_json::Error) -> PipelineError {
    PipelineError::Storage(format!("stored {column} of {id} is unreadable: {e}"))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, PipelineError> {
    serde_json::to_value(value).map_err(|e| PipelineError::Storage(e.to_string()))
}

const ENTITY_COLUMNS: &str = "id, revision, fingerprint, mime_type, filename, document_key, \
    raw_text, fields, embedding, state, created_at, updated_at";

#[async_trait]
impl<F: StructuredFields> EntityStore<F> for PgStore {
    async fn latest(&self, id: Uuid) -> Result<Option<EntityRecord<F>>, PipelineError> {
        let sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM {} WHERE id = $1 ORDER BY revision DESC LIMIT 1",
            F::KIND.table()
        );
        let row: Option<EntityRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(EntityRow::into_record::<F>).transpose()
    }

    async fn save(&self, record: &EntityRecord<F>) -> Result<(), PipelineError> {
        let fields = record.fields.as_ref().map(encode).transpose()?;
        let state = encode(&record.state)?;
        let sql = format!(
            r#"
            INSERT INTO {} ({ENTITY_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id, revision) DO UPDATE SET
                raw_text = EXCLUDED.raw_text,
                fields = EXCLUDED.fields,
                embedding = EXCLUDED.embedding,
                state = EXCLUDED.state,
                updated_at = EXCLUDED.updated_at
            "#,
            F::KIND.table()
        );

        sqlx::query(&sql)
            .bind(record.id)
            .bind(record.revision)
            .bind(record.fingerprint)
            .bind(&record.mime_type)
            .bind(&record.filename)
            .bind(&record.document_key)
            .bind(&record.raw_text)
            .bind(fields)
            .bind(&record.embedding)
            .bind(state)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<EntityRecord<F>>, PipelineError> {
        let sql = format!(
            r#"
            SELECT * FROM (
                SELECT DISTINCT ON (id) {ENTITY_COLUMNS}
                FROM {}
                ORDER BY id, revision DESC
            ) latest
            ORDER BY created_at DESC, id
            "#,
            F::KIND.table()
        );
        let rows: Vec<EntityRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(EntityRow::into_record::<F>).collect()
    }

    async fn list_ready(&self) -> Result<Vec<EntityRecord<F>>, PipelineError> {
        let sql = format!(
            r#"
            SELECT * FROM (
                SELECT DISTINCT ON (id) {ENTITY_COLUMNS}
                FROM {}
                ORDER BY id, revision DESC
            ) latest
            WHERE state->>'state' = 'ready'
            ORDER BY id
            "#,
            F::KIND.table()
        );
        let rows: Vec<EntityRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(EntityRow::into_record::<F>).collect()
    }
}

// ──── Match results ─────────────────────────────────────────────────────────

#[derive(Debug, FromRow)]
struct MatchRow {
    job_id: Uuid,
    candidate_id: Uuid,
    job_revision: i32,
    candidate_revision: i32,
    score: f64,
    components: Value,
    explanation: Value,
    rank: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<MatchRow> for MatchResult {
    type Error = PipelineError;

    fn try_from(row: MatchRow) -> Result<Self, Self::Error> {
        Ok(MatchResult {
            job_id: row.job_id,
            candidate_id: row.candidate_id,
            job_revision: row.job_revision,
            candidate_revision: row.candidate_revision,
            score: row.score,
            components: serde_json::from_value(row.components)
                .map_err(|e| corrupt_row(row.candidate_id, "components", e))?,
            explanation: serde_json::from_value(row.explanation)
                .map_err(|e| corrupt_row(row.candidate_id, "explanation", e))?,
            rank: u32::try_from(row.rank).unwrap_or_default(),
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl MatchStore for PgStore {
    async fn replace_for_job(
        &self,
        job_id: Uuid,
        results: &[MatchResult],
    ) -> Result<(), PipelineError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM match_results WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        for result in results {
            sqlx::query(
                r#"
                INSERT INTO match_results
                    (job_id, candidate_id, job_revision, candidate_revision,
                     score, components, explanation, rank, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(result.job_id)
            .bind(result.candidate_id)
            .bind(result.job_revision)
            .bind(result.candidate_revision)
            .bind(result.score)
            .bind(encode(&result.components)?)
            .bind(encode(&result.explanation)?)
            .bind(i32::try_from(result.rank).unwrap_or(i32::MAX))
            .bind(result.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn for_job(&self, job_id: Uuid) -> Result<Vec<MatchResult>, PipelineError> {
        let rows: Vec<MatchRow> = sqlx::query_as(
            r#"
            SELECT job_id, candidate_id, job_revision, candidate_revision,
                   score, components, explanation, rank, created_at
            FROM match_results
            WHERE job_id = $1
            ORDER BY rank
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MatchResult::try_from).collect()
    }

    async fn delete_for_job(&self, job_id: Uuid) -> Result<u64, PipelineError> {
        let result = sqlx::query("DELETE FROM match_results WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_for_candidate(&self, candidate_id: Uuid) -> Result<u64, PipelineError> {
        let mut tx = self.pool.begin().await?;

        let affected_jobs: Vec<Uuid> = sqlx::query_scalar(
            "DELETE FROM match_results WHERE candidate_id = $1 RETURNING job_id",
        )
        .bind(candidate_id)
        .fetch_all(&mut *tx)
        .await?;

        if !affected_jobs.is_empty() {
            // Close the gaps left behind: surviving rows keep their order.
            sqlx::query(
                r#"
                UPDATE match_results m
                SET rank = r.new_rank
                FROM (
                    SELECT job_id, candidate_id,
                           ROW_NUMBER() OVER (PARTITION BY job_id ORDER BY rank)::int AS new_rank
                    FROM match_results
                    WHERE job_id = ANY($1)
                ) r
                WHERE m.job_id = r.job_id AND m.candidate_id = r.candidate_id
                "#,
            )
            .bind(&affected_jobs)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(affected_jobs.len() as u64)
    }
}
