use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::record::EntityRecord;

/// Structured fields of a candidate résumé.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFields {
    pub name: String,
    /// Contact address for the notification service. Never used in scoring.
    pub email: Option<String>,
    pub skills: BTreeSet<String>,
    pub experience_years: f64,
    pub qualifications: Vec<String>,
}

pub type Candidate = EntityRecord<CandidateFields>;
