//! Persistence seams for entity revisions and match results.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{EntityRecord, MatchResult, StructuredFields};
use crate::pipeline::error::PipelineError;

pub mod postgres;

pub use postgres::PgStore;

/// Append-only revision store for one entity kind.
///
/// `save` inserts a new revision or overwrites the stage outputs of an
/// existing `(id, revision)`; earlier revisions are never touched.
#[async_trait]
pub trait EntityStore<F: StructuredFields>: Send + Sync {
    async fn latest(&self, id: Uuid) -> Result<Option<EntityRecord<F>>, PipelineError>;

    async fn save(&self, record: &EntityRecord<F>) -> Result<(), PipelineError>;

    /// Latest revision of every entity, newest first.
    async fn list(&self) -> Result<Vec<EntityRecord<F>>, PipelineError>;

    /// Latest revisions currently in the `Ready` state.
    async fn list_ready(&self) -> Result<Vec<EntityRecord<F>>, PipelineError>;
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Atomically replaces every stored result for the job.
    async fn replace_for_job(&self, job_id: Uuid, results: &[MatchResult])
        -> Result<(), PipelineError>;

    /// Stored results for the job, ordered by rank.
    async fn for_job(&self, job_id: Uuid) -> Result<Vec<MatchResult>, PipelineError>;

    async fn delete_for_job(&self, job_id: Uuid) -> Result<u64, PipelineError>;

    /// Removes the candidate from every job's results and renumbers the
    /// survivors of each affected job to contiguous ranks `1..=n`.
    async fn delete_for_candidate(&self, candidate_id: Uuid) -> Result<u64, PipelineError>;
}
