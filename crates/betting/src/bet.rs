use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scoreline_core::{BetId, LeagueId, MatchId, UserId};

use crate::scoring::Scoreline;

/// A member's forecast for one match within one league.
///
/// At most one per (league, user, match); stores enforce that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub id: BetId,
    pub league_id: LeagueId,
    pub user_id: UserId,
    pub match_id: MatchId,
    pub predicted: Scoreline,
    pub placed_at: DateTime<Utc>,
}

impl Bet {
    /// Uniqueness key.
    pub fn slot(&self) -> (LeagueId, UserId, MatchId) {
        (self.league_id, self.user_id, self.match_id)
    }
}
