pub mod candidate;
pub mod job;
pub mod match_result;
pub mod record;

pub use candidate::{Candidate, CandidateFields};
pub use job::{JobFields, JobPosting};
pub use match_result::{ComponentScores, MatchExplanation, MatchResult};
pub use record::{Document, EntityKind, EntityRecord, EntityView, StructuredFields};
