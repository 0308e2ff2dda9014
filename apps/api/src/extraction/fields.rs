//! Structured Extractor: plain text → schema-valid structured record.

use std::sync::Arc;

use tracing::{info, warn};

use crate::extraction::prompts::{build_prompt, extraction_system};
use crate::extraction::schema::parse_untrusted;
use crate::llm_client::{CompletionProvider, CompletionRequest, LlmError};
use crate::models::StructuredFields;
use crate::pipeline::error::PipelineError;

/// One initial attempt plus one strict retry.
const SCHEMA_ATTEMPTS: u32 = 2;

pub struct FieldExtractor {
    llm: Arc<dyn CompletionProvider>,
    max_prompt_chars: usize,
}

impl FieldExtractor {
    pub fn new(llm: Arc<dyn CompletionProvider>, max_prompt_chars: usize) -> Self {
        Self {
            llm,
            max_prompt_chars,
        }
    }

    /// `extract_fields(plain_text, schema) -> StructuredRecord`.
    ///
    /// A response that fails the validation gate is retried once with the
    /// violation quoted back to the model.
    pub async fn extract_fields<F: StructuredFields>(
        &self,
        plain_text: &str,
    ) -> Result<F, PipelineError> {
        let text = truncate_chars(plain_text, self.max_prompt_chars);
        if text.len() < plain_text.len() {
            warn!(
                "{} document truncated from {} to {} bytes for extraction",
                F::KIND,
                plain_text.len(),
                text.len()
            );
        }

        let system = extraction_system();
        let schema = F::response_schema();
        let mut violation: Option<String> = None;

        for attempt in 1..=SCHEMA_ATTEMPTS {
            let prompt = build_prompt(F::KIND, text, violation.as_deref());
            let request = CompletionRequest {
                system: &system,
                prompt: &prompt,
                response_schema: &schema,
            };
            let raw = match self.llm.complete(request).await {
                Ok(raw) => raw,
                // An empty answer counts against the schema budget.
                Err(LlmError::EmptyContent) => String::new(),
                Err(LlmError::Unavailable { attempts, reason }) => {
                    return Err(PipelineError::LlmUnavailable { attempts, reason });
                }
                Err(other) => {
                    return Err(PipelineError::CapabilityRejected {
                        capability: "llm",
                        reason: other.to_string(),
                    });
                }
            };

            match parse_untrusted::<F>(&raw) {
                Ok(fields) => {
                    info!("{} fields extracted on attempt {}", F::KIND, attempt);
                    return Ok(fields);
                }
                Err(v) => {
                    warn!(
                        "{} extraction attempt {}/{} rejected: {}",
                        F::KIND,
                        attempt,
                        SCHEMA_ATTEMPTS,
                        v
                    );
                    violation = Some(v.to_string());
                }
            }
        }

        Err(PipelineError::ExtractionFailed {
            attempts: SCHEMA_ATTEMPTS,
            reason: violation.unwrap_or_default(),
        })
    }
}

/// Longest prefix of at most `max_chars` characters.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateFields, JobFields};
    use crate::testing::FakeLlm;

    const VALID_JOB: &str = r#"{"title": "Data Engineer", "summary": null, "required_skills": ["Python", "SQL"], "preferred_skills": ["Docker"], "min_experience_years": 3, "qualifications": []}"#;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("résumé", 3), "rés");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[tokio::test]
    async fn test_valid_response_is_accepted_first_time() {
        let llm = Arc::new(FakeLlm::new());
        llm.push_response("JobFields", VALID_JOB);
        let extractor = FieldExtractor::new(llm.clone(), 1000);

        let job: JobFields = extractor.extract_fields("posting text").await.unwrap();
        assert_eq!(job.title, "Data Engineer");
        assert!(job.required_skills.contains("sql"));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_schema_violation_then_valid_response_succeeds() {
        let llm = Arc::new(FakeLlm::new());
        llm.push_response("JobFields", r#"{"title": "Data Engineer"}"#);
        llm.push_response("JobFields", VALID_JOB);
        let extractor = FieldExtractor::new(llm.clone(), 1000);

        let job: JobFields = extractor.extract_fields("posting text").await.unwrap();
        assert_eq!(job.min_experience_years, 3.0);
        assert_eq!(llm.calls(), 2);
        assert!(llm
            .last_prompt()
            .unwrap()
            .contains("missing required field"));
    }

    #[tokio::test]
    async fn test_two_violations_fail_extraction() {
        let llm = Arc::new(FakeLlm::new());
        llm.push_response("CandidateFields", "I could not find a name.");
        llm.push_response("CandidateFields", r#"{"name": "", "skills": [], "experience_years": 1, "qualifications": []}"#);
        let extractor = FieldExtractor::new(llm.clone(), 1000);

        let err = extractor
            .extract_fields::<CandidateFields>("cv text")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ExtractionFailed { attempts: 2, .. }
        ));
        assert!(!err.is_transient());
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_llm_outage_is_transient() {
        let llm = Arc::new(FakeLlm::new());
        llm.fail_next(1);
        let extractor = FieldExtractor::new(llm.clone(), 1000);

        let err = extractor
            .extract_fields::<JobFields>("posting text")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::LlmUnavailable { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_rejected_request_is_not_a_schema_failure() {
        let llm = Arc::new(FakeLlm::new());
        llm.reject_next(1);
        llm.push_response("JobFields", VALID_JOB);
        let extractor = FieldExtractor::new(llm.clone(), 1000);

        let err = extractor
            .extract_fields::<JobFields>("posting text")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::CapabilityRejected {
                capability: "llm",
                ..
            }
        ));
        assert!(!err.is_transient());
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_long_documents_are_truncated_before_the_call() {
        let llm = Arc::new(FakeLlm::new());
        llm.push_response("JobFields", VALID_JOB);
        let extractor = FieldExtractor::new(llm.clone(), 10);

        let long_text = "x".repeat(500);
        extractor
            .extract_fields::<JobFields>(&long_text)
            .await
            .unwrap();
        let prompt = llm.last_prompt().unwrap();
        assert!(prompt.contains(&"x".repeat(10)));
        assert!(!prompt.contains(&"x".repeat(11)));
    }
}
