use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scoreline_core::BetId;

use crate::bet::Bet;
use crate::scoring::{score, Scoreline, ScoringRules};

/// Computed outcome of exactly one bet. Keyed (and upserted) by `bet_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub bet_id: BetId,
    pub points_earned: u32,
    pub is_exact_match: bool,
    pub is_correct_result: bool,
    pub calculated_at: DateTime<Utc>,
}

impl Settlement {
    /// Score `bet` against the final score under the league's rules.
    pub fn for_bet(
        bet: &Bet,
        actual: Scoreline,
        rules: &ScoringRules,
        calculated_at: DateTime<Utc>,
    ) -> Self {
        let breakdown = score(bet.predicted, actual, rules);
        Self {
            bet_id: bet.id,
            points_earned: breakdown.points,
            is_exact_match: breakdown.is_exact,
            is_correct_result: breakdown.is_correct,
            calculated_at,
        }
    }

    /// Same points and flags, ignoring when it was computed.
    pub fn same_outcome(&self, other: &Settlement) -> bool {
        self.bet_id == other.bet_id
            && self.points_earned == other.points_earned
            && self.is_exact_match == other.is_exact_match
            && self.is_correct_result == other.is_correct_result
    }
}
