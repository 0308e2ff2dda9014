pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::pipeline::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/health", get(health::health_handler))
        // Jobs
        .route(
            "/api/v1/jobs",
            get(handlers::handle_list_jobs).post(handlers::handle_ingest_job),
        )
        .route("/api/v1/jobs/text", post(handlers::handle_ingest_job_text))
        .route("/api/v1/jobs/:id", get(handlers::handle_get_job))
        .route("/api/v1/jobs/:id/resume", post(handlers::handle_resume_job))
        .route("/api/v1/jobs/:id/cancel", post(handlers::handle_cancel_job))
        .route("/api/v1/jobs/:id/match", post(handlers::handle_match_job))
        .route("/api/v1/jobs/:id/matches", get(handlers::handle_get_matches))
        .route(
            "/api/v1/jobs/:id/similar",
            get(handlers::handle_similar_candidates),
        )
        // Candidates
        .route(
            "/api/v1/candidates",
            get(handlers::handle_list_candidates).post(handlers::handle_ingest_candidate),
        )
        .route("/api/v1/candidates/:id", get(handlers::handle_get_candidate))
        .route(
            "/api/v1/candidates/:id/resume",
            post(handlers::handle_resume_candidate),
        )
        .route(
            "/api/v1/candidates/:id/cancel",
            post(handlers::handle_cancel_candidate),
        )
        .layer(body_limit)
        .with_state(state)
}
