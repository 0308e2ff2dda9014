//! Per-entity pipeline state machine.
//!
//! `Uploaded → TextExtracted → FieldsExtracted → Embedded → Ready`, with
//! `Failed` reachable from every non-terminal state. A failed entity resumes
//! from the input state of the stage that failed.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    TextExtraction,
    FieldExtraction,
    Embedding,
    Indexing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::TextExtraction => "text_extraction",
            Stage::FieldExtraction => "field_extraction",
            Stage::Embedding => "embedding",
            Stage::Indexing => "indexing",
        }
    }

    /// State the entity must be in for this stage to run.
    pub fn input_state(&self) -> PipelineState {
        match self {
            Stage::TextExtraction => PipelineState::Uploaded,
            Stage::FieldExtraction => PipelineState::TextExtracted,
            Stage::Embedding => PipelineState::FieldsExtracted,
            Stage::Indexing => PipelineState::Embedded,
        }
    }

    pub fn output_state(&self) -> PipelineState {
        match self {
            Stage::TextExtraction => PipelineState::TextExtracted,
            Stage::FieldExtraction => PipelineState::FieldsExtracted,
            Stage::Embedding => PipelineState::Embedded,
            Stage::Indexing => PipelineState::Ready,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Uploaded,
    TextExtracted,
    FieldsExtracted,
    Embedded,
    Ready,
    Failed {
        stage: Stage,
        reason: String,
        /// Capability outage rather than bad input.
        transient: bool,
    },
}

#[derive(Debug, Error)]
#[error("invalid pipeline transition from '{from}' via stage '{stage}'")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub stage: Stage,
}

impl PipelineState {
    pub fn label(&self) -> &'static str {
        match self {
            PipelineState::Uploaded => "uploaded",
            PipelineState::TextExtracted => "text_extracted",
            PipelineState::FieldsExtracted => "fields_extracted",
            PipelineState::Embedded => "embedded",
            PipelineState::Ready => "ready",
            PipelineState::Failed { .. } => "failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, PipelineState::Ready)
    }

    /// The stage that moves this state forward, if any.
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            PipelineState::Uploaded => Some(Stage::TextExtraction),
            PipelineState::TextExtracted => Some(Stage::FieldExtraction),
            PipelineState::FieldsExtracted => Some(Stage::Embedding),
            PipelineState::Embedded => Some(Stage::Indexing),
            PipelineState::Ready | PipelineState::Failed { .. } => None,
        }
    }

    /// Completes `stage`. Only the next stage in sequence is accepted.
    pub fn advance(&self, stage: Stage) -> Result<PipelineState, InvalidTransition> {
        if self.next_stage() == Some(stage) {
            Ok(stage.output_state())
        } else {
            Err(InvalidTransition {
                from: self.label(),
                stage,
            })
        }
    }

    pub fn fail(
        &self,
        stage: Stage,
        reason: impl Into<String>,
        transient: bool,
    ) -> Result<PipelineState, InvalidTransition> {
        if self.next_stage() == Some(stage) {
            Ok(PipelineState::Failed {
                stage,
                reason: reason.into(),
                transient,
            })
        } else {
            Err(InvalidTransition {
                from: self.label(),
                stage,
            })
        }
    }

    /// Last fully completed state. For `Failed` this is the input state of
    /// the stage that failed; every other state is its own resume point.
    pub fn resume_point(&self) -> PipelineState {
        match self {
            PipelineState::Failed { stage, .. } => stage.input_state(),
            other => other.clone(),
        }
    }
}
