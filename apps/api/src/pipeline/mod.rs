//! Orchestrator: sequences the per-entity state machine and matching.
//!
//! Jobs and candidates each get their own [`EntityPipeline`]; both share the
//! extraction and embedding capabilities. Matching reads only `Ready`
//! records and takes no locks.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::archive::DocumentArchive;
use crate::embedding::{EmbeddingIndexer, EmbeddingProvider, SimilarEntity, VectorStore};
use crate::extraction::fields::FieldExtractor;
use crate::llm_client::CompletionProvider;
use crate::matching::{rank_matches, Matcher, ScoringWeights};
use crate::models::{
    Candidate, CandidateFields, Document, EntityKind, JobFields, JobPosting, MatchResult,
};
use crate::retry::RetryPolicy;
use crate::storage::{EntityStore, MatchStore};

pub mod cancel;
pub mod entity;
pub mod error;
pub mod handlers;
pub mod lock;
pub mod state;

use entity::EntityPipeline;
use error::{PipelineError, StageFailure};
use lock::EntityLock;

/// Every external capability the orchestrator depends on.
#[derive(Clone)]
pub struct Capabilities {
    pub jobs: Arc<dyn EntityStore<JobFields>>,
    pub candidates: Arc<dyn EntityStore<CandidateFields>>,
    pub matches: Arc<dyn MatchStore>,
    pub llm: Arc<dyn CompletionProvider>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub vectors: Arc<dyn VectorStore>,
    pub archive: Arc<dyn DocumentArchive>,
    pub locks: Arc<dyn EntityLock>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub retry: RetryPolicy,
    pub weights: ScoringWeights,
    pub max_prompt_chars: usize,
    pub collection_prefix: String,
    pub embedding_dim: Option<usize>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            weights: ScoringWeights::default(),
            max_prompt_chars: 12_000,
            collection_prefix: "hireflow".to_string(),
            embedding_dim: None,
        }
    }
}

pub struct Orchestrator {
    jobs: EntityPipeline<JobFields>,
    candidates: EntityPipeline<CandidateFields>,
    matches: Arc<dyn MatchStore>,
    indexer: Arc<EmbeddingIndexer>,
    matcher: Matcher,
}

impl Orchestrator {
    pub fn new(caps: Capabilities, settings: PipelineSettings) -> Self {
        let fields = Arc::new(FieldExtractor::new(caps.llm, settings.max_prompt_chars));
        let indexer = Arc::new(EmbeddingIndexer::new(
            caps.embedder,
            caps.vectors,
            settings.retry,
            settings.collection_prefix,
            settings.embedding_dim,
        ));

        Self {
            jobs: EntityPipeline::new(
                caps.jobs,
                caps.matches.clone(),
                caps.archive.clone(),
                caps.locks.clone(),
                fields.clone(),
                indexer.clone(),
            ),
            candidates: EntityPipeline::new(
                caps.candidates,
                caps.matches.clone(),
                caps.archive,
                caps.locks,
                fields,
                indexer.clone(),
            ),
            matches: caps.matches,
            indexer,
            matcher: Matcher::new(settings.weights),
        }
    }

    // ──── Ingestion ─────────────────────────────────────────────────────────

    /// `ingest_job(doc) -> job_id`, run through to `Ready`.
    pub async fn ingest_job(
        &self,
        document: Document,
        entity_id: Option<Uuid>,
    ) -> Result<JobPosting, StageFailure> {
        self.jobs.ingest(document, entity_id).await
    }

    /// `ingest_candidate(doc) -> candidate_id`, run through to `Ready`.
    pub async fn ingest_candidate(
        &self,
        document: Document,
        entity_id: Option<Uuid>,
    ) -> Result<Candidate, StageFailure> {
        self.candidates.ingest(document, entity_id).await
    }

    pub async fn resume_job(&self, id: Uuid) -> Result<JobPosting, StageFailure> {
        self.jobs.resume(id).await
    }

    pub async fn resume_candidate(&self, id: Uuid) -> Result<Candidate, StageFailure> {
        self.candidates.resume(id).await
    }

    pub fn cancel_job(&self, id: Uuid) -> bool {
        self.jobs.cancel(id)
    }

    pub fn cancel_candidate(&self, id: Uuid) -> bool {
        self.candidates.cancel(id)
    }

    // ──── Reads ─────────────────────────────────────────────────────────────

    pub async fn job(&self, id: Uuid) -> Result<JobPosting, PipelineError> {
        self.jobs.get(id).await
    }

    pub async fn candidate(&self, id: Uuid) -> Result<Candidate, PipelineError> {
        self.candidates.get(id).await
    }

    pub async fn jobs(&self) -> Result<Vec<JobPosting>, PipelineError> {
        self.jobs.list().await
    }

    pub async fn candidates(&self) -> Result<Vec<Candidate>, PipelineError> {
        self.candidates.list().await
    }

    // ──── Matching ──────────────────────────────────────────────────────────

    async fn ready_job(&self, job_id: Uuid) -> Result<JobPosting, PipelineError> {
        let job = self.jobs.get(job_id).await?;
        if !job.state.is_ready() {
            return Err(PipelineError::NotReady {
                kind: EntityKind::Job,
                entity_id: job_id,
                state: job.state.label(),
            });
        }
        Ok(job)
    }

    /// `match(job_id) -> ordered MatchResults` over every `Ready` candidate.
    /// Replaces the job's stored results wholesale.
    pub async fn match_job(&self, job_id: Uuid) -> Result<Vec<MatchResult>, PipelineError> {
        let job = self.ready_job(job_id).await?;
        let pool = self.candidates.list_ready().await?;

        let scored = pool
            .iter()
            .map(|candidate| self.matcher.compute_match(&job, candidate))
            .collect::<Result<Vec<_>, _>>()?;
        let ranked = rank_matches(scored);

        self.matches.replace_for_job(job_id, &ranked).await?;
        info!(
            "job {} r{} matched against {} ready candidate(s)",
            job_id,
            job.revision,
            ranked.len()
        );
        Ok(ranked)
    }

    /// Stored results for the job in rank order, optionally filtered by score.
    pub async fn matches(
        &self,
        job_id: Uuid,
        min_score: Option<f64>,
    ) -> Result<Vec<MatchResult>, PipelineError> {
        self.jobs.get(job_id).await?;
        let mut results = self.matches.for_job(job_id).await?;
        if let Some(min) = min_score {
            results.retain(|r| r.score >= min);
        }
        Ok(results)
    }

    /// Vector-store shortlist of candidates nearest to the job embedding.
    ///
    /// Only candidates whose latest revision is `Ready` are returned. A
    /// superseded candidate keeps its old vector until its new revision is
    /// indexed, so the query over-fetches by the number of candidates that
    /// are not ready.
    pub async fn similar_candidates(
        &self,
        job_id: Uuid,
        top_k: usize,
    ) -> Result<Vec<SimilarEntity>, PipelineError> {
        let job = self.ready_job(job_id).await?;
        let embedding = job.embedding.as_deref().ok_or(PipelineError::IncompleteRecord {
            kind: EntityKind::Job,
            entity_id: job_id,
            missing: "embedding",
        })?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let ready: HashSet<Uuid> = self
            .candidates
            .list_ready()
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        let not_ready = self.candidates.list().await?.len().saturating_sub(ready.len());

        let mut hits = self
            .indexer
            .query_similar(EntityKind::Candidate, embedding, top_k.saturating_add(not_ready))
            .await?;
        hits.retain(|hit| ready.contains(&hit.entity_id));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Cancels every in-flight run. Runs stop at their next stage boundary.
    pub fn shutdown(&self) {
        let cancelled = self.jobs.cancel_all() + self.candidates.cancel_all();
        info!("shutdown: cancelled {} in-flight pipeline run(s)", cancelled);
    }
}
