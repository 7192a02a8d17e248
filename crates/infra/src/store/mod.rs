//! Storage seams for the settlement pipeline.
//!
//! Traits describe exactly what the handlers read and write; the in-memory
//! implementations back tests and single-process deployments. Settlements are
//! upserted by bet id and standings are replaced per league, so every write
//! is safe to repeat.

mod in_memory;

pub use in_memory::{
    InMemoryBetStore, InMemoryLeagueDirectory, InMemoryMatchStore, InMemorySettlementStore,
    InMemoryStandingStore,
};

use thiserror::Error;

use scoreline_betting::{Bet, Match, ScoringRules, Settlement};
use scoreline_core::{BetId, DomainError, LeagueId, MatchId, UserId};
use scoreline_standings::Standing;

/// Storage error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Storage(format!("{what} lock poisoned"))
    }
}

/// Whether an upsert created or overwrote the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Matches and their final scores, owned by the score-sync subsystem.
pub trait MatchStore: Send + Sync {
    fn get(&self, match_id: MatchId) -> Result<Option<Match>, StoreError>;
    fn upsert(&self, fixture: Match) -> Result<(), StoreError>;
}

/// Predictions. One per (league, user, match).
pub trait BetStore: Send + Sync {
    /// Fails with `DomainError::Conflict` when the slot is already taken.
    fn place(&self, bet: Bet) -> Result<(), StoreError>;
    fn list_by_match(&self, match_id: MatchId) -> Result<Vec<Bet>, StoreError>;
    fn list_by_league(&self, league_id: LeagueId) -> Result<Vec<Bet>, StoreError>;
}

/// Settlements keyed 1:1 by bet.
pub trait SettlementStore: Send + Sync {
    /// Create or overwrite the settlement of `settlement.bet_id`.
    fn upsert(&self, settlement: Settlement) -> Result<UpsertOutcome, StoreError>;
    fn get(&self, bet_id: BetId) -> Result<Option<Settlement>, StoreError>;
    fn list_for_bets(&self, bet_ids: &[BetId]) -> Result<Vec<Settlement>, StoreError>;
}

/// Read side of league membership, owned by the league subsystem.
pub trait LeagueDirectory: Send + Sync {
    fn scoring_rules(&self, league_id: LeagueId) -> Result<Option<ScoringRules>, StoreError>;
    fn members(&self, league_id: LeagueId) -> Result<Vec<UserId>, StoreError>;
}

/// Leaderboard rows.
pub trait StandingStore: Send + Sync {
    fn list_by_league(&self, league_id: LeagueId) -> Result<Vec<Standing>, StoreError>;

    /// Atomically swap the whole table of a league.
    fn replace_league(&self, league_id: LeagueId, standings: Vec<Standing>) -> Result<(), StoreError>;

    /// Rows ordered by rank (the leaderboard read path).
    fn leaderboard(&self, league_id: LeagueId) -> Result<Vec<Standing>, StoreError> {
        let mut rows = self.list_by_league(league_id)?;
        rows.sort_by_key(|s| s.rank);
        Ok(rows)
    }
}
