use serde::{Deserialize, Serialize};

use scoreline_core::{CompetitionId, MatchId};

use crate::scoring::Scoreline;

/// A match as supplied by the score-sync subsystem.
///
/// Scores stay `None` until the match is final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub competition_id: CompetitionId,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
}

impl Match {
    pub fn scheduled(id: MatchId, competition_id: CompetitionId) -> Self {
        Self {
            id,
            competition_id,
            home_score: None,
            away_score: None,
        }
    }

    pub fn finished(id: MatchId, competition_id: CompetitionId, home: u32, away: u32) -> Self {
        Self {
            id,
            competition_id,
            home_score: Some(home),
            away_score: Some(away),
        }
    }

    /// The final score, only when both sides are known.
    pub fn final_score(&self) -> Option<Scoreline> {
        Some(Scoreline::new(self.home_score?, self.away_score?))
    }
}
