//! Validation gate between untrusted LLM output and typed records.
//!
//! Every payload passes through here before it is persisted. The gate checks
//! presence and JSON type of every declared field, bounds numbers, and
//! normalizes skills so that scoring only ever sees canonical strings.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::llm_client::strip_json_fences;
use crate::models::{CandidateFields, EntityKind, JobFields, StructuredFields};

/// Upper bound accepted for any years-of-experience figure.
pub const MAX_YEARS: f64 = 80.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaViolation {
    #[error("response is not valid JSON: {0}")]
    NotJson(String),

    #[error("response is not a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field '{field}' is {value}, expected a value in [0, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        max: f64,
    },

    #[error("field '{0}' must not be empty")]
    Empty(&'static str),
}

/// Strips code fences, parses JSON and runs the type's validation gate.
pub fn parse_untrusted<F: StructuredFields>(raw: &str) -> Result<F, SchemaViolation> {
    let text = strip_json_fences(raw);
    let value: Value =
        serde_json::from_str(text).map_err(|e| SchemaViolation::NotJson(e.to_string()))?;
    F::from_untrusted(&value)
}

// ──── Normalization ─────────────────────────────────────────────────────────

/// Lowercase, trimmed, inner whitespace collapsed to single spaces.
pub fn normalize_skill(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn normalize_skills<'a>(raw: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    raw.into_iter()
        .map(normalize_skill)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Trimmed, empties dropped, first occurrence kept.
fn normalize_qualifications(raw: Vec<&str>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    raw.into_iter()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .filter(|q| seen.insert(q.to_string()))
        .map(str::to_string)
        .collect()
}

// ──── Field accessors ───────────────────────────────────────────────────────

fn as_object(value: &Value) -> Result<&Map<String, Value>, SchemaViolation> {
    value.as_object().ok_or(SchemaViolation::NotAnObject)
}

fn required<'a>(
    obj: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Value, SchemaViolation> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(SchemaViolation::MissingField(field)),
        Some(v) => Ok(v),
    }
}

fn string_field(obj: &Map<String, Value>, field: &'static str) -> Result<String, SchemaViolation> {
    let value = required(obj, field)?
        .as_str()
        .ok_or(SchemaViolation::WrongType {
            field,
            expected: "a string",
        })?
        .trim();
    if value.is_empty() {
        return Err(SchemaViolation::Empty(field));
    }
    Ok(value.to_string())
}

/// Absent, null and blank all collapse to `None`.
fn optional_string(
    obj: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, SchemaViolation> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(_) => Err(SchemaViolation::WrongType {
            field,
            expected: "a string or null",
        }),
    }
}

fn string_array<'a>(
    obj: &'a Map<String, Value>,
    field: &'static str,
) -> Result<Vec<&'a str>, SchemaViolation> {
    let wrong_type = SchemaViolation::WrongType {
        field,
        expected: "an array of strings",
    };
    required(obj, field)?
        .as_array()
        .ok_or_else(|| wrong_type.clone())?
        .iter()
        .map(|item| item.as_str().ok_or_else(|| wrong_type.clone()))
        .collect()
}

fn years_field(obj: &Map<String, Value>, field: &'static str) -> Result<f64, SchemaViolation> {
    let years = required(obj, field)?
        .as_f64()
        .ok_or(SchemaViolation::WrongType {
            field,
            expected: "a number",
        })?;
    if !years.is_finite() || !(0.0..=MAX_YEARS).contains(&years) {
        return Err(SchemaViolation::OutOfRange {
            field,
            value: years,
            max: MAX_YEARS,
        });
    }
    Ok(years)
}

fn string_array_schema() -> Value {
    json!({ "type": "array", "items": { "type": "string" } })
}

// ──── Job postings ──────────────────────────────────────────────────────────

impl StructuredFields for JobFields {
    const KIND: EntityKind = EntityKind::Job;

    fn response_schema() -> Value {
        json!({
            "title": "JobFields",
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "summary": { "type": ["string", "null"] },
                "required_skills": string_array_schema(),
                "preferred_skills": string_array_schema(),
                "min_experience_years": { "type": "number", "minimum": 0, "maximum": MAX_YEARS },
                "qualifications": string_array_schema()
            },
            "required": [
                "title",
                "required_skills",
                "preferred_skills",
                "min_experience_years",
                "qualifications"
            ]
        })
    }

    fn from_untrusted(value: &Value) -> Result<Self, SchemaViolation> {
        let obj = as_object(value)?;

        let required_skills = normalize_skills(string_array(obj, "required_skills")?);
        let preferred_skills = normalize_skills(string_array(obj, "preferred_skills")?)
            .into_iter()
            .filter(|s| !required_skills.contains(s))
            .collect();

        Ok(JobFields {
            title: string_field(obj, "title")?,
            summary: optional_string(obj, "summary")?,
            required_skills,
            preferred_skills,
            min_experience_years: years_field(obj, "min_experience_years")?,
            qualifications: normalize_qualifications(string_array(obj, "qualifications")?),
        })
    }

    fn embedding_text(&self) -> String {
        let mut text = format!("Job title: {}\n", self.title);
        if let Some(summary) = &self.summary {
            text.push_str(&format!("Summary: {summary}\n"));
        }
        text.push_str(&format!("Required skills: {}\n", join(&self.required_skills)));
        text.push_str(&format!("Preferred skills: {}\n", join(&self.preferred_skills)));
        text.push_str(&format!(
            "Minimum experience: {} years\n",
            self.min_experience_years
        ));
        text.push_str(&format!("Qualifications: {}", self.qualifications.join("; ")));
        text
    }
}

// ──── Candidates ────────────────────────────────────────────────────────────

impl StructuredFields for CandidateFields {
    const KIND: EntityKind = EntityKind::Candidate;

    fn response_schema() -> Value {
        json!({
            "title": "CandidateFields",
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "email": { "type": ["string", "null"] },
                "skills": string_array_schema(),
                "experience_years": { "type": "number", "minimum": 0, "maximum": MAX_YEARS },
                "qualifications": string_array_schema()
            },
            "required": ["name", "skills", "experience_years", "qualifications"]
        })
    }

    fn from_untrusted(value: &Value) -> Result<Self, SchemaViolation> {
        let obj = as_object(value)?;

        Ok(CandidateFields {
            name: string_field(obj, "name")?,
            email: optional_string(obj, "email")?.filter(|e| e.contains('@')),
            skills: normalize_skills(string_array(obj, "skills")?),
            experience_years: years_field(obj, "experience_years")?,
            qualifications: normalize_qualifications(string_array(obj, "qualifications")?),
        })
    }

    // Email is contact data only and stays out of the vector.
    fn embedding_text(&self) -> String {
        format!(
            "Candidate: {}\nSkills: {}\nExperience: {} years\nQualifications: {}",
            self.name,
            join(&self.skills),
            self.experience_years,
            self.qualifications.join("; ")
        )
    }
}

fn join(skills: &BTreeSet<String>) -> String {
    skills.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}
