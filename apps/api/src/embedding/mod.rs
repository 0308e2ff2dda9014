//! Embedding Indexer: text → vector, vector upsert, similarity query.
//!
//! The embedding model and the vector store sit behind traits; the indexer
//! adds retries, vector validation and per-kind collections on top.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::EntityKind;
use crate::pipeline::error::PipelineError;
use crate::retry::{RetryExhausted, RetryPolicy};

pub mod memory;
pub mod ollama;
pub mod qdrant;
pub mod similarity;

pub use similarity::{clamp_similarity, cosine_similarity};

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl CapabilityError {
    pub fn is_transient(&self) -> bool {
        match self {
            CapabilityError::Http(_) => true,
            CapabilityError::Api { status, .. } => *status == 429 || *status >= 500,
            CapabilityError::InvalidResponse(_) => false,
        }
    }
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarEntity {
    pub entity_id: Uuid,
    /// Raw cosine similarity as reported by the store.
    pub similarity: f64,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace the vector stored under `entity_id`.
    async fn upsert(
        &self,
        collection: &str,
        entity_id: Uuid,
        vector: &[f32],
        metadata: &Value,
    ) -> Result<(), CapabilityError>;

    async fn query_similar(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SimilarEntity>, CapabilityError>;
}

pub struct EmbeddingIndexer {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorStore>,
    retry: RetryPolicy,
    collection_prefix: String,
    /// Expected vector length; `None` accepts whatever the model returns.
    dimension: Option<usize>,
}

impl EmbeddingIndexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        retry: RetryPolicy,
        collection_prefix: impl Into<String>,
        dimension: Option<usize>,
    ) -> Self {
        Self {
            embedder,
            vectors,
            retry,
            collection_prefix: collection_prefix.into(),
            dimension,
        }
    }

    pub fn collection(&self, kind: EntityKind) -> String {
        format!("{}_{}", self.collection_prefix, kind.collection_suffix())
    }

    /// `embed(text) -> vector`, retried with backoff.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let vector = self
            .retry
            .run(
                "embedding call",
                || self.embedder.embed(text),
                CapabilityError::is_transient,
            )
            .await
            .map_err(capability_failure)?;

        self.validate(&vector)?;
        debug!("embedded {} chars into {} dims", text.len(), vector.len());
        Ok(vector)
    }

    /// `upsert(entity_id, vector, metadata)` into the collection for `kind`.
    pub async fn upsert(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        vector: &[f32],
        metadata: &Value,
    ) -> Result<(), PipelineError> {
        let collection = self.collection(kind);
        self.retry
            .run(
                "vector upsert",
                || self.vectors.upsert(&collection, entity_id, vector, metadata),
                CapabilityError::is_transient,
            )
            .await
            .map_err(capability_failure)
    }

    /// `query_similar(vector, top_k)`, similarities clamped to [0, 1] and
    /// ordered by similarity descending, ties by id.
    pub async fn query_similar(
        &self,
        kind: EntityKind,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SimilarEntity>, PipelineError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let collection = self.collection(kind);
        let mut hits = self
            .retry
            .run(
                "vector query",
                || self.vectors.query_similar(&collection, vector, top_k),
                CapabilityError::is_transient,
            )
            .await
            .map_err(capability_failure)?;

        for hit in &mut hits {
            hit.similarity = clamp_similarity(hit.similarity);
        }
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    fn validate(&self, vector: &[f32]) -> Result<(), PipelineError> {
        let reason = if vector.is_empty() {
            Some("embedding capability returned an empty vector".to_string())
        } else if vector.iter().any(|x| !x.is_finite()) {
            Some("embedding capability returned non-finite values".to_string())
        } else {
            match self.dimension {
                Some(dim) if dim != vector.len() => Some(format!(
                    "embedding has {} dimensions, expected {dim}",
                    vector.len()
                )),
                _ => None,
            }
        };

        match reason {
            Some(reason) => Err(PipelineError::CapabilityRejected {
                capability: "embedding",
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// Outages that outlived the backoff stay transient; a non-retryable answer
/// (4xx, malformed body) is a permanent rejection.
fn capability_failure(exhausted: RetryExhausted<CapabilityError>) -> PipelineError {
    if exhausted.retryable {
        PipelineError::EmbeddingUnavailable {
            attempts: exhausted.attempts,
            reason: exhausted.last.to_string(),
        }
    } else {
        PipelineError::CapabilityRejected {
            capability: "embedding",
            reason: exhausted.last.to_string(),
        }
    }
}
