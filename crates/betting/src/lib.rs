//! Predictions, final scores and how a prediction is scored.

pub mod bet;
pub mod fixture;
pub mod scoring;
pub mod settlement;

pub use bet::Bet;
pub use fixture::Match;
pub use scoring::{score, MatchOutcome, ScoreBreakdown, Scoreline, ScoringRules};
pub use settlement::Settlement;
