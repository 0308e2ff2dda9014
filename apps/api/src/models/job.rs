use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::record::EntityRecord;

/// Structured fields of a job posting, as accepted by the validation gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFields {
    pub title: String,
    /// Short description from the extractor. Never used in scoring.
    pub summary: Option<String>,
    pub required_skills: BTreeSet<String>,
    /// Disjoint from `required_skills`.
    pub preferred_skills: BTreeSet<String>,
    pub min_experience_years: f64,
    pub qualifications: Vec<String>,
}

pub type JobPosting = EntityRecord<JobFields>;
