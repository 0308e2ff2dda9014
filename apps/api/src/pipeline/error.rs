use thiserror::Error;
use uuid::Uuid;

use crate::models::EntityKind;
use crate::pipeline::state::{InvalidTransition, Stage};

/// Error taxonomy of the matching core.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt document: {0}")]
    CorruptDocument(String),

    #[error("structured extraction failed after {attempts} attempt(s): {reason}")]
    ExtractionFailed { attempts: u32, reason: String },

    #[error("LLM capability unavailable after {attempts} attempt(s): {reason}")]
    LlmUnavailable { attempts: u32, reason: String },

    #[error("embedding capability unavailable after {attempts} attempt(s): {reason}")]
    EmbeddingUnavailable { attempts: u32, reason: String },

    /// The capability answered, but refused the request or returned garbage.
    /// Retrying the same input will not help.
    #[error("{capability} capability rejected the request: {reason}")]
    CapabilityRejected {
        capability: &'static str,
        reason: String,
    },

    #[error("{kind} {entity_id} is incomplete: missing {missing}")]
    IncompleteRecord {
        kind: EntityKind,
        entity_id: Uuid,
        missing: &'static str,
    },

    #[error("{kind} {entity_id} is not ready (state: {state})")]
    NotReady {
        kind: EntityKind,
        entity_id: Uuid,
        state: &'static str,
    },

    #[error("{kind} {entity_id} not found")]
    NotFound { kind: EntityKind, entity_id: Uuid },

    #[error("{kind} {entity_id} is locked by another pipeline run")]
    EntityBusy { kind: EntityKind, entity_id: Uuid },

    #[error("pipeline run cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("document archive error: {0}")]
    Archive(String),

    #[error("lock service error: {0}")]
    Lock(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

impl PipelineError {
    /// Whether retrying later, without changing the input, can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::LlmUnavailable { .. }
                | PipelineError::EmbeddingUnavailable { .. }
                | PipelineError::EntityBusy { .. }
                | PipelineError::Storage(_)
                | PipelineError::Archive(_)
                | PipelineError::Lock(_)
        )
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Storage(e.to_string())
    }
}

/// A pipeline error annotated with the entity and the stage it hit, so the
/// caller can resume from the last completed stage.
#[derive(Debug, Error)]
#[error("{kind} {entity_id} failed{}: {error}", stage_suffix(.stage))]
pub struct StageFailure {
    pub kind: EntityKind,
    pub entity_id: Uuid,
    /// `None` when the failure happened outside a stage (lock, storage).
    pub stage: Option<Stage>,
    #[source]
    pub error: PipelineError,
}

impl StageFailure {
    pub fn new(
        kind: EntityKind,
        entity_id: Uuid,
        stage: Option<Stage>,
        error: PipelineError,
    ) -> Self {
        Self {
            kind,
            entity_id,
            stage,
            error,
        }
    }
}

fn stage_suffix(stage: &Option<Stage>) -> String {
    stage.map(|s| format!(" at {s}")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_outages_are_transient() {
        let err = PipelineError::EmbeddingUnavailable {
            attempts: 3,
            reason: "connection refused".to_string(),
        };
        assert!(err.is_transient());
        assert!(!PipelineError::CorruptDocument("bad xref".to_string()).is_transient());
        assert!(!PipelineError::CapabilityRejected {
            capability: "embedding",
            reason: "model not found".to_string()
        }
        .is_transient());
        assert!(!PipelineError::ExtractionFailed {
            attempts: 2,
            reason: "missing field".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_stage_failure_message_names_entity_and_stage() {
        let id = Uuid::nil();
        let failure = StageFailure::new(
            EntityKind::Job,
            id,
            Some(Stage::Embedding),
            PipelineError::EmbeddingUnavailable {
                attempts: 3,
                reason: "timeout".to_string(),
            },
        );
        let message = failure.to_string();
        assert!(message.contains("job"));
        assert!(message.contains(&id.to_string()));
        assert!(message.contains("at embedding"));
    }

    #[test]
    fn test_stage_failure_without_stage_omits_suffix() {
        let failure = StageFailure::new(
            EntityKind::Candidate,
            Uuid::nil(),
            None,
            PipelineError::Storage("pool closed".to_string()),
        );
        assert!(!failure.to_string().contains(" at "));
    }
}
