// LLM prompt constants for structured extraction.
// Reuses the JSON-only fragment from llm_client::prompts.

use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::models::EntityKind;

pub fn extraction_system() -> String {
    format!(
        "You are an expert recruiter who turns hiring documents into structured data. \
        Extract only facts stated in the document. {JSON_ONLY_SYSTEM}"
    )
}

/// Replace `{document_text}` before sending.
pub const JOB_PROMPT_TEMPLATE: &str = r#"Extract the structured fields of the following job posting.

Return a JSON object with this EXACT schema (no extra fields):
{
  "title": "Backend Engineer",
  "summary": "One or two sentences describing the role, or null",
  "required_skills": ["python", "sql"],
  "preferred_skills": ["docker"],
  "min_experience_years": 3,
  "qualifications": ["BSc in Computer Science"]
}

Rules:
- required_skills: skills the posting says are required or must-have.
- preferred_skills: skills marked as nice-to-have, a plus, or preferred.
- Each skill is a short noun phrase ("python", "machine learning"), not a sentence.
- min_experience_years: the minimum years of experience asked for, as a number. Use 0 if none is stated.
- qualifications: degrees, certifications and licences, verbatim.

JOB POSTING:
{document_text}"#;

/// Replace `{document_text}` before sending.
pub const CANDIDATE_PROMPT_TEMPLATE: &str = r#"Extract the structured fields of the following résumé.

Return a JSON object with this EXACT schema (no extra fields):
{
  "name": "Full Name",
  "email": "name@example.com or null",
  "skills": ["python", "docker"],
  "experience_years": 5,
  "qualifications": ["MSc in Data Science"]
}

Rules:
- skills: every technical or professional skill the candidate demonstrates, as short noun phrases.
- experience_years: total years of professional experience, as a number. Use 0 if none can be determined.
- qualifications: degrees, certifications and licences, verbatim.
- email: only if an email address appears in the document.

RÉSUMÉ:
{document_text}"#;

/// Appended on the single retry after a rejected response. Replace `{violation}`.
pub const STRICT_RETRY_TEMPLATE: &str = r#"

Your previous response was rejected: {violation}
Respond again with ONLY the JSON object. Every field in the schema above is required and must have exactly the type shown. Numbers must be between 0 and 80."#;

pub fn build_prompt(kind: EntityKind, document_text: &str, violation: Option<&str>) -> String {
    let template = match kind {
        EntityKind::Job => JOB_PROMPT_TEMPLATE,
        EntityKind::Candidate => CANDIDATE_PROMPT_TEMPLATE,
    };
    let mut prompt = template.replace("{document_text}", document_text);
    if let Some(violation) = violation {
        prompt.push_str(&STRICT_RETRY_TEMPLATE.replace("{violation}", violation));
    }
    prompt
}
