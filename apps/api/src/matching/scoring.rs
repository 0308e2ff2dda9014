//! Match scoring.
//!
//! score = skills × skill_overlap + experience × experience_fit
//!       + semantic × semantic_similarity
//!
//! skill_overlap = required_share × |required ∩ skills| / max(1, |required|)
//!               + preferred_share × |preferred ∩ skills| / max(1, |preferred|)
//!
//! Every component and the final score are in [0, 1]. The same inputs always
//! produce the same result, apart from `created_at`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embedding::{clamp_similarity, cosine_similarity};
use crate::models::{
    Candidate, CandidateFields, ComponentScores, EntityKind, JobFields, JobPosting,
    MatchExplanation, MatchResult,
};
use crate::pipeline::error::PipelineError;

const WEIGHT_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub skills: f64,
    pub experience: f64,
    pub semantic: f64,
    /// Share of `skill_overlap` carried by required skills.
    pub required_share: f64,
    pub preferred_share: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            skills: 0.4,
            experience: 0.3,
            semantic: 0.3,
            required_share: 0.6,
            preferred_share: 0.4,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<(), String> {
        let named = [
            ("skills", self.skills),
            ("experience", self.experience),
            ("semantic", self.semantic),
            ("required_share", self.required_share),
            ("preferred_share", self.preferred_share),
        ];
        for (name, w) in named {
            if !w.is_finite() || !(0.0..=1.0).contains(&w) {
                return Err(format!("weight '{name}' must be in [0, 1], got {w}"));
            }
        }

        let components = self.skills + self.experience + self.semantic;
        if (components - 1.0).abs() > WEIGHT_EPSILON {
            return Err(format!(
                "component weights must sum to 1.0, got {components}"
            ));
        }
        let shares = self.required_share + self.preferred_share;
        if (shares - 1.0).abs() > WEIGHT_EPSILON {
            return Err(format!(
                "required/preferred skill shares must sum to 1.0, got {shares}"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Matcher {
    weights: ScoringWeights,
}

impl Matcher {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    /// `compute_match(job, candidate) -> MatchResult`. The result is unranked.
    pub fn compute_match(
        &self,
        job: &JobPosting,
        candidate: &Candidate,
    ) -> Result<MatchResult, PipelineError> {
        let (job_fields, job_embedding) =
            complete_parts(job.kind, job.id, &job.fields, &job.embedding)?;
        let (cand_fields, cand_embedding) = complete_parts(
            candidate.kind,
            candidate.id,
            &candidate.fields,
            &candidate.embedding,
        )?;

        let (skill_overlap, mut explanation) = self.skill_overlap(job_fields, cand_fields);
        let (experience_fit, gap) = experience_fit(
            cand_fields.experience_years,
            job_fields.min_experience_years,
        );
        explanation.experience_gap_years = gap;
        let semantic_similarity =
            clamp_similarity(cosine_similarity(job_embedding, cand_embedding));

        let score = clamp_unit(
            self.weights.skills * skill_overlap
                + self.weights.experience * experience_fit
                + self.weights.semantic * semantic_similarity,
        );

        Ok(MatchResult {
            job_id: job.id,
            candidate_id: candidate.id,
            job_revision: job.revision,
            candidate_revision: candidate.revision,
            score,
            components: ComponentScores {
                skill_overlap,
                experience_fit,
                semantic_similarity,
            },
            explanation,
            rank: 0,
            created_at: Utc::now(),
        })
    }

    fn skill_overlap(
        &self,
        job: &JobFields,
        candidate: &CandidateFields,
    ) -> (f64, MatchExplanation) {
        let matched_required: Vec<String> = job
            .required_skills
            .intersection(&candidate.skills)
            .cloned()
            .collect();
        let matched_preferred: Vec<String> = job
            .preferred_skills
            .intersection(&candidate.skills)
            .cloned()
            .collect();
        let missing_required: Vec<String> = job
            .required_skills
            .difference(&candidate.skills)
            .cloned()
            .collect();

        let required_ratio =
            matched_required.len() as f64 / job.required_skills.len().max(1) as f64;
        let preferred_ratio =
            matched_preferred.len() as f64 / job.preferred_skills.len().max(1) as f64;
        let overlap = clamp_unit(
            self.weights.required_share * required_ratio
                + self.weights.preferred_share * preferred_ratio,
        );

        (
            overlap,
            MatchExplanation {
                matched_required,
                matched_preferred,
                missing_required,
                experience_gap_years: 0.0,
            },
        )
    }
}

fn complete_parts<'a, F>(
    kind: EntityKind,
    entity_id: Uuid,
    fields: &'a Option<F>,
    embedding: &'a Option<Vec<f32>>,
) -> Result<(&'a F, &'a [f32]), PipelineError> {
    let fields = fields.as_ref().ok_or(PipelineError::IncompleteRecord {
        kind,
        entity_id,
        missing: "structured fields",
    })?;
    let embedding = embedding.as_deref().ok_or(PipelineError::IncompleteRecord {
        kind,
        entity_id,
        missing: "embedding",
    })?;
    Ok((fields, embedding))
}

/// Returns `(fit, gap_years)`. Meeting the minimum, including 0 vs 0, is a
/// perfect fit.
fn experience_fit(candidate_years: f64, min_years: f64) -> (f64, f64) {
    if candidate_years >= min_years {
        return (1.0, 0.0);
    }
    let ratio = candidate_years / min_years;
    let fit = if ratio.is_finite() { clamp_unit(ratio) } else { 0.0 };
    (fit, (min_years - candidate_years).max(0.0))
}

fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::schema::normalize_skills;
    use crate::models::EntityRecord;
    use crate::pipeline::state::PipelineState;

    fn job(
        required: &[&str],
        preferred: &[&str],
        min_years: f64,
        embedding: Vec<f32>,
    ) -> JobPosting {
        let mut record = EntityRecord::uploaded(
            Uuid::from_u128(100),
            1,
            Uuid::nil(),
            "text/plain".to_string(),
            None,
            "documents/job/x/r1".to_string(),
        );
        record.fields = Some(JobFields {
            title: "Backend Engineer".to_string(),
            summary: None,
            required_skills: normalize_skills(required.iter().copied()),
            preferred_skills: normalize_skills(preferred.iter().copied()),
            min_experience_years: min_years,
            qualifications: vec![],
        });
        record.embedding = Some(embedding);
        record.state = PipelineState::Ready;
        record
    }

    fn candidate(id: u128, skills: &[&str], years: f64, embedding: Vec<f32>) -> Candidate {
        let mut record = EntityRecord::uploaded(
            Uuid::from_u128(id),
            1,
            Uuid::nil(),
            "text/plain".to_string(),
            None,
            "documents/candidate/x/r1".to_string(),
        );
        record.fields = Some(CandidateFields {
            name: "Ada".to_string(),
            email: None,
            skills: normalize_skills(skills.iter().copied()),
            experience_years: years,
            qualifications: vec![],
        });
        record.embedding = Some(embedding);
        record.state = PipelineState::Ready;
        record
    }

    #[test]
    fn test_reference_scenario() {
        let job = job(&["python", "sql"], &["docker"], 3.0, vec![1.0, 0.0]);
        let cand = candidate(1, &["python", "docker"], 5.0, vec![0.8, 0.6]);

        let result = Matcher::default().compute_match(&job, &cand).unwrap();
        assert!((result.components.skill_overlap - 0.7).abs() < 1e-9);
        assert_eq!(result.components.experience_fit, 1.0);
        assert!((result.components.semantic_similarity - 0.8).abs() < 1e-6);
        assert!((result.score - 0.82).abs() < 1e-6);

        assert_eq!(result.explanation.matched_required, vec!["python"]);
        assert_eq!(result.explanation.matched_preferred, vec!["docker"]);
        assert_eq!(result.explanation.missing_required, vec!["sql"]);
        assert_eq!(result.explanation.experience_gap_years, 0.0);
        assert_eq!(result.rank, 0);
    }

    #[test]
    fn test_zero_experience_against_zero_minimum_is_full_fit() {
        assert_eq!(experience_fit(0.0, 0.0), (1.0, 0.0));
    }

    #[test]
    fn test_partial_experience_is_proportional() {
        let (fit, gap) = experience_fit(2.0, 4.0);
        assert!((fit - 0.5).abs() < 1e-9);
        assert!((gap - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_skill_sets_contribute_zero() {
        let job = job(&[], &[], 0.0, vec![1.0, 0.0]);
        let cand = candidate(1, &["python"], 1.0, vec![1.0, 0.0]);
        let result = Matcher::default().compute_match(&job, &cand).unwrap();
        assert_eq!(result.components.skill_overlap, 0.0);
        assert!((result.score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_score_stays_in_unit_interval() {
        let matcher = Matcher::default();
        let cases = [
            (
                job(&["a", "b"], &["c"], 10.0, vec![1.0, 0.0]),
                candidate(1, &[], 0.0, vec![-1.0, 0.0]),
            ),
            (
                job(&["a"], &["b"], 0.0, vec![0.5, 0.5]),
                candidate(2, &["a", "b"], 40.0, vec![0.5, 0.5]),
            ),
            (job(&["a"], &[], 5.0, vec![0.0, 0.0]), candidate(3, &["a"], 1.0, vec![1.0])),
        ];
        for (j, c) in &cases {
            let r = matcher.compute_match(j, c).unwrap();
            assert!((0.0..=1.0).contains(&r.score), "score {} out of range", r.score);
            assert!((0.0..=1.0).contains(&r.components.semantic_similarity));
        }
        let perfect = matcher.compute_match(&cases[1].0, &cases[1].1).unwrap();
        assert!((perfect.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_compute_match_is_deterministic() {
        let job = job(&["python", "sql"], &["docker"], 3.0, vec![0.2, 0.9, 0.1]);
        let cand = candidate(9, &["sql"], 2.0, vec![0.3, 0.3, 0.9]);
        let matcher = Matcher::default();
        let a = matcher.compute_match(&job, &cand).unwrap();
        let b = matcher.compute_match(&job, &cand).unwrap();
        assert_eq!(a.score, b.score);
        assert_eq!(a.components, b.components);
        assert_eq!(a.explanation, b.explanation);
    }

    #[test]
    fn test_missing_embedding_is_incomplete() {
        let job = job(&["python"], &[], 1.0, vec![1.0]);
        let mut cand = candidate(1, &["python"], 1.0, vec![1.0]);
        cand.embedding = None;
        let err = Matcher::default().compute_match(&job, &cand).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::IncompleteRecord {
                missing: "embedding",
                ..
            }
        ));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = ScoringWeights::default();
        assert!(w.validate().is_ok());
        assert!((w.skills + w.experience + w.semantic - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_weights_are_rejected() {
        let w = ScoringWeights {
            skills: 0.5,
            ..ScoringWeights::default()
        };
        assert!(w.validate().unwrap_err().contains("sum to 1.0"));

        let w = ScoringWeights {
            required_share: 1.2,
            preferred_share: -0.2,
            ..ScoringWeights::default()
        };
        assert!(w.validate().is_err());
    }
}
