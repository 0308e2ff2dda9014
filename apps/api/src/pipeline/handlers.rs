use axum::{
    extract::{Multipart, Path, Query, State},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embedding::SimilarEntity;
use crate::errors::AppError;
use crate::extraction::text::DocumentFormat;
use crate::models::{CandidateFields, Document, EntityView, JobFields, MatchResult};
use crate::state::AppState;

const DEFAULT_TOP_K: usize = 5;
const MAX_TOP_K: usize = 100;

#[derive(Deserialize)]
pub struct TextIngestRequest {
    pub text: String,
    pub entity_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct MatchesQuery {
    pub min_score: Option<f64>,
}

#[derive(Deserialize)]
pub struct SimilarQuery {
    pub top_k: Option<usize>,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub entity_id: Uuid,
    /// False when no run was in flight.
    pub cancelled: bool,
}

struct Upload {
    document: Document,
    entity_id: Option<Uuid>,
}

/// Reads the `file` part (and optional `entity_id` part) of a multipart upload.
async fn read_upload(mut multipart: Multipart) -> Result<Upload, AppError> {
    let mut document = None;
    let mut entity_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().map(str::to_string);
                let declared = field
                    .content_type()
                    .filter(|ct| *ct != "application/octet-stream")
                    .map(str::to_string);
                let mime_type = declared
                    .or_else(|| {
                        filename
                            .as_deref()
                            .and_then(DocumentFormat::mime_from_filename)
                            .map(str::to_string)
                    })
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(e.body_text()))?;

                let mut doc = Document::new(bytes, mime_type);
                if let Some(filename) = filename {
                    doc = doc.with_filename(filename);
                }
                document = Some(doc);
            }
            "entity_id" => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(e.body_text()))?;
                let id = Uuid::parse_str(raw.trim())
                    .map_err(|_| AppError::Validation(format!("Invalid entity_id '{raw}'")))?;
                entity_id = Some(id);
            }
            _ => {}
        }
    }

    let document =
        document.ok_or_else(|| AppError::Validation("Missing multipart field 'file'".into()))?;
    if document.bytes.is_empty() {
        return Err(AppError::Validation("Uploaded file is empty".into()));
    }
    Ok(Upload {
        document,
        entity_id,
    })
}

// ──── Jobs ──────────────────────────────────────────────────────────────────

/// POST /api/v1/jobs
pub async fn handle_ingest_job(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<EntityView<JobFields>>, AppError> {
    let upload = read_upload(multipart).await?;
    let job = state
        .orchestrator
        .ingest_job(upload.document, upload.entity_id)
        .await?;
    Ok(Json(job.view()))
}

/// POST /api/v1/jobs/text
pub async fn handle_ingest_job_text(
    State(state): State<AppState>,
    Json(req): Json<TextIngestRequest>,
) -> Result<Json<EntityView<JobFields>>, AppError> {
    if req.text.trim().is_empty() {
        return Err(AppError::Validation("text must not be empty".into()));
    }
    let document = Document::new(Bytes::from(req.text), "text/plain");
    let job = state.orchestrator.ingest_job(document, req.entity_id).await?;
    Ok(Json(job.view()))
}

/// GET /api/v1/jobs
pub async fn handle_list_jobs(
    State(state): State<AppState>,
) -> Result<Json<Vec<EntityView<JobFields>>>, AppError> {
    let jobs = state.orchestrator.jobs().await?;
    Ok(Json(jobs.iter().map(|j| j.view()).collect()))
}

/// GET /api/v1/jobs/:id
pub async fn handle_get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EntityView<JobFields>>, AppError> {
    let job = state.orchestrator.job(id).await?;
    Ok(Json(job.view()))
}

/// POST /api/v1/jobs/:id/resume
pub async fn handle_resume_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EntityView<JobFields>>, AppError> {
    let job = state.orchestrator.resume_job(id).await?;
    Ok(Json(job.view()))
}

/// POST /api/v1/jobs/:id/cancel
pub async fn handle_cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<CancelResponse> {
    Json(CancelResponse {
        entity_id: id,
        cancelled: state.orchestrator.cancel_job(id),
    })
}

/// POST /api/v1/jobs/:id/match
pub async fn handle_match_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<MatchResult>>, AppError> {
    let results = state.orchestrator.match_job(id).await?;
    Ok(Json(results))
}

/// GET /api/v1/jobs/:id/matches?min_score=
pub async fn handle_get_matches(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<MatchesQuery>,
) -> Result<Json<Vec<MatchResult>>, AppError> {
    if let Some(min) = params.min_score {
        if !(0.0..=1.0).contains(&min) {
            return Err(AppError::Validation(format!(
                "min_score must be within [0, 1], got {min}"
            )));
        }
    }
    let results = state.orchestrator.matches(id, params.min_score).await?;
    Ok(Json(results))
}

/// GET /api/v1/jobs/:id/similar?top_k=
pub async fn handle_similar_candidates(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<SimilarQuery>,
) -> Result<Json<Vec<SimilarEntity>>, AppError> {
    let top_k = params.top_k.unwrap_or(DEFAULT_TOP_K);
    if top_k > MAX_TOP_K {
        return Err(AppError::Validation(format!(
            "top_k must be at most {MAX_TOP_K}"
        )));
    }
    let similar = state.orchestrator.similar_candidates(id, top_k).await?;
    Ok(Json(similar))
}

// ──── Candidates ────────────────────────────────────────────────────────────

/// POST /api/v1/candidates
pub async fn handle_ingest_candidate(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<EntityView<CandidateFields>>, AppError> {
    let upload = read_upload(multipart).await?;
    let candidate = state
        .orchestrator
        .ingest_candidate(upload.document, upload.entity_id)
        .await?;
    Ok(Json(candidate.view()))
}

/// GET /api/v1/candidates
pub async fn handle_list_candidates(
    State(state): State<AppState>,
) -> Result<Json<Vec<EntityView<CandidateFields>>>, AppError> {
    let candidates = state.orchestrator.candidates().await?;
    Ok(Json(candidates.iter().map(|c| c.view()).collect()))
}

/// GET /api/v1/candidates/:id
pub async fn handle_get_candidate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EntityView<CandidateFields>>, AppError> {
    let candidate = state.orchestrator.candidate(id).await?;
    Ok(Json(candidate.view()))
}

/// POST /api/v1/candidates/:id/resume
pub async fn handle_resume_candidate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EntityView<CandidateFields>>, AppError> {
    let candidate = state.orchestrator.resume_candidate(id).await?;
    Ok(Json(candidate.view()))
}

/// POST /api/v1/candidates/:id/cancel
pub async fn handle_cancel_candidate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<CancelResponse> {
    Json(CancelResponse {
        entity_id: id,
        cancelled: state.orchestrator.cancel_candidate(id),
    })
}
