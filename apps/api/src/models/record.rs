use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::extraction::schema::SchemaViolation;
use crate::pipeline::state::PipelineState;

const JOB_NAMESPACE: Uuid = Uuid::from_u128(0x5f0c_2a4e_9b1d_4c7a_8e3f_1d2b_6a9c_0e41);
const CANDIDATE_NAMESPACE: Uuid = Uuid::from_u128(0x9a7e_41c3_2d5b_4f08_b6e1_7c3a_d2f9_5b13);

/// The two kinds of entity that flow through the ingest pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Job,
    Candidate,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Job => "job",
            EntityKind::Candidate => "candidate",
        }
    }

    /// Postgres table holding the append-only revisions of this kind.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Job => "job_postings",
            EntityKind::Candidate => "candidates",
        }
    }

    /// Vector-store collection suffix.
    pub fn collection_suffix(&self) -> &'static str {
        match self {
            EntityKind::Job => "jobs",
            EntityKind::Candidate => "candidates",
        }
    }

    /// UUIDv5 over the normalized MIME type and the raw document bytes.
    /// Identical uploads always map to the same fingerprint.
    pub fn fingerprint(&self, mime_type: &str, bytes: &[u8]) -> Uuid {
        let namespace = match self {
            EntityKind::Job => JOB_NAMESPACE,
            EntityKind::Candidate => CANDIDATE_NAMESPACE,
        };
        let mut input = Vec::with_capacity(mime_type.len() + 1 + bytes.len());
        input.extend_from_slice(mime_type.as_bytes());
        input.push(0);
        input.extend_from_slice(bytes);
        Uuid::new_v5(&namespace, &input)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw uploaded document, before text extraction.
#[derive(Debug, Clone)]
pub struct Document {
    pub bytes: Bytes,
    pub mime_type: String,
    pub filename: Option<String>,
}

impl Document {
    pub fn new(bytes: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Schema-bound structured fields produced by the Structured Extractor.
///
/// Implementors own their response schema and the validation gate that turns
/// an untrusted LLM payload into a normalized record.
pub trait StructuredFields:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: EntityKind;

    /// JSON schema handed to the completion capability.
    fn response_schema() -> serde_json::Value;

    /// Validates an untrusted JSON payload and normalizes it.
    fn from_untrusted(value: &serde_json::Value) -> Result<Self, SchemaViolation>;

    /// Deterministic text rendering used as embedding input.
    fn embedding_text(&self) -> String;
}

/// One revision of a job posting or candidate, together with the outputs of
/// every pipeline stage completed so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord<F> {
    pub id: Uuid,
    pub kind: EntityKind,
    /// 1-based; a new revision supersedes the previous one wholesale.
    pub revision: i32,
    pub fingerprint: Uuid,
    pub mime_type: String,
    pub filename: Option<String>,
    pub document_key: String,
    pub raw_text: Option<String>,
    pub fields: Option<F>,
    pub embedding: Option<Vec<f32>>,
    pub state: PipelineState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<F: StructuredFields> EntityRecord<F> {
    /// Fresh record in the `Uploaded` state.
    pub fn uploaded(
        id: Uuid,
        revision: i32,
        fingerprint: Uuid,
        mime_type: String,
        filename: Option<String>,
        document_key: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: F::KIND,
            revision,
            fingerprint,
            mime_type,
            filename,
            document_key,
            raw_text: None,
            fields: None,
            embedding: None,
            state: PipelineState::Uploaded,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn view(&self) -> EntityView<F> {
        EntityView {
            id: self.id,
            kind: self.kind,
            revision: self.revision,
            filename: self.filename.clone(),
            state: self.state.clone(),
            fields: self.fields.clone(),
            has_embedding: self.embedding.is_some(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// API-facing projection of a record: no raw text, no vector.
#[derive(Debug, Clone, Serialize)]
pub struct EntityView<F> {
    pub id: Uuid,
    pub kind: EntityKind,
    pub revision: i32,
    pub filename: Option<String>,
    pub state: PipelineState,
    pub fields: Option<F>,
    pub has_embedding: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
