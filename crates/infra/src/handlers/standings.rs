//! `RecalculateLeagueStandings`: rebuild and rank leaderboards.
//!
//! Every league in the batch is attempted. Leagues that fail are reported
//! together and fail the job, so the whole batch runs again; rebuilding a
//! league twice yields the same table.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use scoreline_core::{BetId, Clock, LeagueId, UserId};
use scoreline_jobs::Job;
use scoreline_standings::{rebuild_league, LeagueSnapshot, Standing};

use crate::jobs::JobHandler;
use crate::locks::LeagueLocks;
use crate::store::{BetStore, LeagueDirectory, SettlementStore, StandingStore, StoreError};

pub const RECALCULATE_LEAGUE_STANDINGS: &str = "RecalculateLeagueStandings";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecalculateLeagueStandingsPayload {
    pub league_ids: BTreeSet<LeagueId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeagueFailure {
    pub league_id: LeagueId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StandingsError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("standings recalculation failed for {} of {attempted} leagues", failed.len())]
    PartialFailure {
        attempted: usize,
        failed: Vec<LeagueFailure>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeagueSummary {
    pub league_id: LeagueId,
    pub members: usize,
    pub leader: Option<UserId>,
}

/// Stored as the job result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StandingsReport {
    pub leagues: Vec<LeagueSummary>,
}

pub struct StandingsAggregator {
    leagues: Arc<dyn LeagueDirectory>,
    bets: Arc<dyn BetStore>,
    settlements: Arc<dyn SettlementStore>,
    standings: Arc<dyn StandingStore>,
    locks: Arc<LeagueLocks>,
    clock: Arc<dyn Clock>,
}

impl StandingsAggregator {
    pub fn new(
        leagues: Arc<dyn LeagueDirectory>,
        bets: Arc<dyn BetStore>,
        settlements: Arc<dyn SettlementStore>,
        standings: Arc<dyn StandingStore>,
        locks: Arc<LeagueLocks>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            leagues,
            bets,
            settlements,
            standings,
            locks,
            clock,
        }
    }

    /// Rebuild each listed league. An empty set is a no-op.
    pub fn recalculate(
        &self,
        league_ids: &BTreeSet<LeagueId>,
    ) -> Result<StandingsReport, StandingsError> {
        let mut report = StandingsReport::default();
        let mut failed = Vec::new();

        for &league_id in league_ids {
            match self.recalculate_league(league_id) {
                Ok(summary) => report.leagues.push(summary),
                Err(e) => {
                    error!(league_id = %league_id, error = %e, "standings recalculation failed");
                    failed.push(LeagueFailure {
                        league_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        if !failed.is_empty() {
            return Err(StandingsError::PartialFailure {
                attempted: league_ids.len(),
                failed,
            });
        }
        Ok(report)
    }

    /// Rebuild one league from its full settlement set under its lock.
    pub fn recalculate_league(&self, league_id: LeagueId) -> Result<LeagueSummary, StoreError> {
        self.locks.with_league(league_id, || -> Result<LeagueSummary, StoreError> {
            let members = self.leagues.members(league_id)?;
            let bets = self.bets.list_by_league(league_id)?;
            let bet_ids: Vec<BetId> = bets.iter().map(|b| b.id).collect();
            let settlements = self.settlements.list_for_bets(&bet_ids)?;
            let previous: HashMap<UserId, Standing> = self
                .standings
                .list_by_league(league_id)?
                .into_iter()
                .map(|s| (s.user_id, s))
                .collect();

            let snapshot = LeagueSnapshot {
                league_id,
                members,
                bets,
                settlements,
            };
            let table = rebuild_league(&snapshot, &previous, self.clock.now());

            let summary = LeagueSummary {
                league_id,
                members: table.len(),
                leader: table.first().map(|s| s.user_id),
            };
            self.standings.replace_league(league_id, table)?;

            info!(
                league_id = %league_id,
                members = summary.members,
                settlements = snapshot.settlements.len(),
                "league standings rebuilt"
            );
            Ok(summary)
        })
    }
}

impl JobHandler for StandingsAggregator {
    fn job_type(&self) -> &'static str {
        RECALCULATE_LEAGUE_STANDINGS
    }

    fn handle(&self, job: &Job) -> anyhow::Result<serde_json::Value> {
        let payload: RecalculateLeagueStandingsPayload =
            serde_json::from_value(job.payload().clone())
                .context("invalid RecalculateLeagueStandings payload")?;
        let report = self.recalculate(&payload.league_ids)?;
        Ok(serde_json::to_value(report)?)
    }
}
