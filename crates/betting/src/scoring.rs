//! Bet scoring engine.
//!
//! Pure and total: callers must only invoke it once both final scores are
//! known. It never guesses a missing score.

use core::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A (home, away) score pair, predicted or actual.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scoreline {
    pub home: u32,
    pub away: u32,
}

impl Scoreline {
    pub fn new(home: u32, away: u32) -> Self {
        Self { home, away }
    }

    pub fn outcome(&self) -> MatchOutcome {
        match self.home.cmp(&self.away) {
            Ordering::Greater => MatchOutcome::HomeWin,
            Ordering::Equal => MatchOutcome::Draw,
            Ordering::Less => MatchOutcome::AwayWin,
        }
    }
}

impl core::fmt::Display for Scoreline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}", self.home, self.away)
    }
}

/// Outcome class of a score: sign of (home - away).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    HomeWin,
    Draw,
    AwayWin,
}

/// Per-league points table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringRules {
    pub exact_match_points: u32,
    pub correct_result_points: u32,
}

impl ScoringRules {
    pub fn new(exact_match_points: u32, correct_result_points: u32) -> Self {
        Self {
            exact_match_points,
            correct_result_points,
        }
    }
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self::new(3, 1)
    }
}

/// Result of scoring one prediction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub points: u32,
    pub is_exact: bool,
    pub is_correct: bool,
}

/// Score a prediction against the final result.
///
/// 1. exact score → `exact_match_points`, exact + correct
/// 2. same outcome class → `correct_result_points`, correct only
/// 3. otherwise → nothing
pub fn score(predicted: Scoreline, actual: Scoreline, rules: &ScoringRules) -> ScoreBreakdown {
    if predicted == actual {
        ScoreBreakdown {
            points: rules.exact_match_points,
            is_exact: true,
            is_correct: true,
        }
    } else if predicted.outcome() == actual.outcome() {
        ScoreBreakdown {
            points: rules.correct_result_points,
            is_exact: false,
            is_correct: true,
        }
    } else {
        ScoreBreakdown {
            points: 0,
            is_exact: false,
            is_correct: false,
        }
    }
}
