// Matcher: pure scoring of one job against one candidate, plus ranking.
// Reads only Ready records; never calls a capability.

pub mod ranking;
pub mod scoring;

pub use ranking::rank_matches;
pub use scoring::{Matcher, ScoringWeights};
