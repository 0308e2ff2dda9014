use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub skill_overlap: f64,
    pub experience_fit: f64,
    pub semantic_similarity: f64,
}

/// Which structured facts produced the score.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchExplanation {
    pub matched_required: Vec<String>,
    pub matched_preferred: Vec<String>,
    pub missing_required: Vec<String>,
    /// Years short of the job minimum; 0.0 when the minimum is met.
    pub experience_gap_years: f64,
}

/// Scored comparison of one job revision against one candidate revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub job_id: Uuid,
    pub candidate_id: Uuid,
    pub job_revision: i32,
    pub candidate_revision: i32,
    pub score: f64,
    pub components: ComponentScores,
    pub explanation: MatchExplanation,
    /// 1-based position within the job's pool; 0 until ranked.
    pub rank: u32,
    pub created_at: DateTime<Utc>,
}
