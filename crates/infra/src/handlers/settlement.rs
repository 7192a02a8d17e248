//! `CalculateBetResults`: score every bet on a finished match.
//!
//! Validate-then-commit: the match, its final score and the scoring rules of
//! every affected league are loaded before the first settlement is written.
//! Settlements are upserted by bet id, so running the job again with the same
//! inputs rewrites the same rows.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use scoreline_betting::{ScoringRules, Settlement};
use scoreline_core::{BetId, Clock, CompetitionId, LeagueId, MatchId};
use scoreline_jobs::{Job, JobId, NewJob};

use super::standings::{RecalculateLeagueStandingsPayload, RECALCULATE_LEAGUE_STANDINGS};
use crate::jobs::{DispatchError, Dispatcher, JobHandler};
use crate::store::{BetStore, LeagueDirectory, MatchStore, SettlementStore, StoreError, UpsertOutcome};

pub const CALCULATE_BET_RESULTS: &str = "CalculateBetResults";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculateBetResultsPayload {
    pub match_id: MatchId,
    /// Scoping hint only; the match record is authoritative.
    pub competition_id: CompetitionId,
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("match {0} not found")]
    MatchNotFound(MatchId),

    #[error("match {0} has no final score yet")]
    ScoresNotFinal(MatchId),

    #[error("no scoring rules for league {league_id} (bet {bet_id})")]
    ScoringRulesNotFound { league_id: LeagueId, bet_id: BetId },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to enqueue standings recalculation: {0}")]
    FollowUp(#[from] DispatchError),

    #[error("failed to encode follow-up payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Stored as the job result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementReport {
    pub match_id: MatchId,
    pub settled: usize,
    pub inserted: usize,
    pub updated: usize,
    pub affected_leagues: BTreeSet<LeagueId>,
    pub follow_up_job: Option<JobId>,
}

pub struct SettlementOrchestrator {
    matches: Arc<dyn MatchStore>,
    bets: Arc<dyn BetStore>,
    settlements: Arc<dyn SettlementStore>,
    leagues: Arc<dyn LeagueDirectory>,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
}

impl SettlementOrchestrator {
    pub fn new(
        matches: Arc<dyn MatchStore>,
        bets: Arc<dyn BetStore>,
        settlements: Arc<dyn SettlementStore>,
        leagues: Arc<dyn LeagueDirectory>,
        dispatcher: Arc<dyn Dispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            matches,
            bets,
            settlements,
            leagues,
            dispatcher,
            clock,
        }
    }

    /// Settle every bet on the match.
    ///
    /// `parent` is the job being run, if any; the follow-up job inherits its
    /// correlation id (or its id when it has none) and its creator.
    pub fn settle(
        &self,
        payload: &CalculateBetResultsPayload,
        parent: Option<&Job>,
    ) -> Result<SettlementReport, SettlementError> {
        let match_id = payload.match_id;
        let fixture = self
            .matches
            .get(match_id)?
            .ok_or(SettlementError::MatchNotFound(match_id))?;
        let actual = fixture
            .final_score()
            .ok_or(SettlementError::ScoresNotFinal(match_id))?;

        if fixture.competition_id != payload.competition_id {
            warn!(
                match_id = %match_id,
                expected = %payload.competition_id,
                actual = %fixture.competition_id,
                "competition hint does not match the match record"
            );
        }

        let bets = self.bets.list_by_match(match_id)?;
        if bets.is_empty() {
            info!(match_id = %match_id, "no bets on match; nothing to settle");
            return Ok(SettlementReport {
                match_id,
                settled: 0,
                inserted: 0,
                updated: 0,
                affected_leagues: BTreeSet::new(),
                follow_up_job: None,
            });
        }

        let mut rules: HashMap<LeagueId, ScoringRules> = HashMap::new();
        for bet in &bets {
            if rules.contains_key(&bet.league_id) {
                continue;
            }
            let league_rules = self.leagues.scoring_rules(bet.league_id)?.ok_or(
                SettlementError::ScoringRulesNotFound {
                    league_id: bet.league_id,
                    bet_id: bet.id,
                },
            )?;
            rules.insert(bet.league_id, league_rules);
        }

        let at = self.clock.now();
        let (mut inserted, mut updated) = (0, 0);
        for bet in &bets {
            let Some(league_rules) = rules.get(&bet.league_id) else {
                continue;
            };
            let mut settlement = Settlement::for_bet(bet, actual, league_rules, at);
            // An unchanged outcome keeps its original timestamp.
            if let Some(stored) = self.settlements.get(bet.id)? {
                if stored.same_outcome(&settlement) {
                    settlement.calculated_at = stored.calculated_at;
                }
            }
            debug!(
                bet_id = %bet.id,
                predicted = %bet.predicted,
                actual = %actual,
                points = settlement.points_earned,
                "bet settled"
            );
            match self.settlements.upsert(settlement)? {
                UpsertOutcome::Inserted => inserted += 1,
                UpsertOutcome::Updated => updated += 1,
            }
        }

        let affected_leagues: BTreeSet<LeagueId> = rules.into_keys().collect();
        let follow_up = self.enqueue_standings(&affected_leagues, parent)?;

        info!(
            match_id = %match_id,
            score = %actual,
            settled = bets.len(),
            inserted,
            updated,
            leagues = affected_leagues.len(),
            follow_up_job = %follow_up,
            "match settled"
        );

        Ok(SettlementReport {
            match_id,
            settled: bets.len(),
            inserted,
            updated,
            affected_leagues,
            follow_up_job: Some(follow_up),
        })
    }

    fn enqueue_standings(
        &self,
        league_ids: &BTreeSet<LeagueId>,
        parent: Option<&Job>,
    ) -> Result<JobId, SettlementError> {
        let payload = serde_json::to_value(RecalculateLeagueStandingsPayload {
            league_ids: league_ids.clone(),
        })?;

        let mut job = NewJob::new(RECALCULATE_LEAGUE_STANDINGS, payload);
        if let Some(parent) = parent {
            let correlation = parent
                .correlation_id()
                .map(str::to_string)
                .unwrap_or_else(|| parent.id_typed().to_string());
            job = job.correlated_with(correlation);
            if let Some(user_id) = parent.created_by_user_id() {
                job = job.created_by(user_id);
            }
        }

        Ok(self.dispatcher.submit(job)?.job_id)
    }
}

impl JobHandler for SettlementOrchestrator {
    fn job_type(&self) -> &'static str {
        CALCULATE_BET_RESULTS
    }

    fn handle(&self, job: &Job) -> anyhow::Result<serde_json::Value> {
        let payload: CalculateBetResultsPayload = serde_json::from_value(job.payload().clone())
            .context("invalid CalculateBetResults payload")?;
        let report = self.settle(&payload, Some(job))?;
        Ok(serde_json::to_value(report)?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use serde_json::json;

    use scoreline_betting::{Bet, Match, Scoreline};
    use scoreline_core::{FixedClock, UserId};
    use scoreline_jobs::JobStatus;

    use super::*;
    use crate::jobs::{InMemoryJobStore, JobEventPublisher, JobFilter, JobStore, StoreDispatcher};
    use crate::store::{
        InMemoryBetStore, InMemoryLeagueDirectory, InMemoryMatchStore, InMemorySettlementStore,
    };

    fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-01T22:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    struct Fixture {
        matches: Arc<InMemoryMatchStore>,
        bets: Arc<InMemoryBetStore>,
        settlements: Arc<InMemorySettlementStore>,
        leagues: Arc<InMemoryLeagueDirectory>,
        jobs: Arc<InMemoryJobStore>,
        clock: Arc<FixedClock>,
        orchestrator: SettlementOrchestrator,
    }

    fn fixture() -> Fixture {
        let matches = Arc::new(InMemoryMatchStore::new());
        let bets = Arc::new(InMemoryBetStore::new());
        let settlements = Arc::new(InMemorySettlementStore::new());
        let leagues = Arc::new(InMemoryLeagueDirectory::new());
        let jobs = InMemoryJobStore::arc();
        let clock = Arc::new(FixedClock::new(test_time()));
        let dispatcher = Arc::new(StoreDispatcher::new(
            jobs.clone(),
            clock.clone(),
            JobEventPublisher::disabled(),
        ));
        let orchestrator = SettlementOrchestrator::new(
            matches.clone(),
            bets.clone(),
            settlements.clone(),
            leagues.clone(),
            dispatcher,
            clock.clone(),
        );
        Fixture {
            matches,
            bets,
            settlements,
            leagues,
            jobs,
            clock,
            orchestrator,
        }
    }

    fn bet(league_id: LeagueId, match_id: MatchId, home: u32, away: u32) -> Bet {
        Bet {
            id: BetId::new(),
            league_id,
            user_id: UserId::new(),
            match_id,
            predicted: Scoreline::new(home, away),
            placed_at: test_time(),
        }
    }

    fn payload(fixture: &Match) -> CalculateBetResultsPayload {
        CalculateBetResultsPayload {
            match_id: fixture.id,
            competition_id: fixture.competition_id,
        }
    }

    #[test]
    fn unknown_match_fails_without_side_effects() {
        let f = fixture();
        let err = f
            .orchestrator
            .settle(
                &CalculateBetResultsPayload {
                    match_id: MatchId::new(),
                    competition_id: CompetitionId::new(),
                },
                None,
            )
            .unwrap_err();

        assert!(matches!(err, SettlementError::MatchNotFound(_)));
        assert_eq!(f.jobs.stats().unwrap().total(), 0);
    }

    #[test]
    fn unfinished_match_fails_without_side_effects() {
        let f = fixture();
        let league = LeagueId::new();
        f.leagues.upsert_league(league, ScoringRules::default()).unwrap();
        let pending = Match::scheduled(MatchId::new(), CompetitionId::new());
        f.matches.upsert(pending.clone()).unwrap();
        f.bets.place(bet(league, pending.id, 1, 0)).unwrap();

        let err = f.orchestrator.settle(&payload(&pending), None).unwrap_err();

        assert!(matches!(err, SettlementError::ScoresNotFinal(id) if id == pending.id));
        assert!(f.settlements.is_empty());
        assert_eq!(f.jobs.stats().unwrap().total(), 0);
    }

    #[test]
    fn missing_rules_abort_before_any_write() {
        let f = fixture();
        let configured = LeagueId::new();
        let unconfigured = LeagueId::new();
        f.leagues
            .upsert_league(configured, ScoringRules::default())
            .unwrap();
        let finished = Match::finished(MatchId::new(), CompetitionId::new(), 1, 0);
        f.matches.upsert(finished.clone()).unwrap();
        f.bets.place(bet(configured, finished.id, 1, 0)).unwrap();
        f.bets.place(bet(unconfigured, finished.id, 1, 0)).unwrap();

        let err = f.orchestrator.settle(&payload(&finished), None).unwrap_err();

        assert!(matches!(
            err,
            SettlementError::ScoringRulesNotFound { league_id, .. } if league_id == unconfigured
        ));
        assert!(f.settlements.is_empty());
    }

    #[test]
    fn follow_up_covers_each_league_once_and_inherits_origin() {
        let f = fixture();
        let (l1, l2) = (LeagueId::new(), LeagueId::new());
        f.leagues.upsert_league(l1, ScoringRules::default()).unwrap();
        f.leagues.upsert_league(l2, ScoringRules::new(5, 2)).unwrap();
        let finished = Match::finished(MatchId::new(), CompetitionId::new(), 2, 2);
        f.matches.upsert(finished.clone()).unwrap();
        for league in [l1, l1, l2] {
            f.bets.place(bet(league, finished.id, 0, 0)).unwrap();
        }

        let creator = UserId::new();
        let parent = Job::create(
            NewJob::new(CALCULATE_BET_RESULTS, json!({}))
                .created_by(creator)
                .correlated_with("sync-42"),
            test_time(),
        )
        .job;

        let report = f.orchestrator.settle(&payload(&finished), Some(&parent)).unwrap();

        assert_eq!(report.settled, 3);
        assert_eq!(report.inserted, 3);
        assert_eq!(report.affected_leagues, BTreeSet::from([l1, l2]));

        let follow_ups = f
            .jobs
            .list(&JobFilter::all().with_job_type(RECALCULATE_LEAGUE_STANDINGS))
            .unwrap();
        assert_eq!(follow_ups.len(), 1);
        let follow_up = &follow_ups[0];
        assert_eq!(Some(follow_up.id_typed()), report.follow_up_job);
        assert_eq!(follow_up.status(), JobStatus::Pending);
        assert_eq!(follow_up.correlation_id(), Some("sync-42"));
        assert_eq!(follow_up.created_by_user_id(), Some(creator));

        let body: RecalculateLeagueStandingsPayload =
            serde_json::from_value(follow_up.payload().clone()).unwrap();
        assert_eq!(body.league_ids, BTreeSet::from([l1, l2]));
    }

    #[test]
    fn uncorrelated_parent_lends_its_id() {
        let f = fixture();
        let league = LeagueId::new();
        f.leagues.upsert_league(league, ScoringRules::default()).unwrap();
        let finished = Match::finished(MatchId::new(), CompetitionId::new(), 0, 1);
        f.matches.upsert(finished.clone()).unwrap();
        f.bets.place(bet(league, finished.id, 0, 3)).unwrap();
        let parent = Job::create(NewJob::new(CALCULATE_BET_RESULTS, json!({})), test_time()).job;

        f.orchestrator.settle(&payload(&finished), Some(&parent)).unwrap();

        let parent_id = parent.id_typed().to_string();
        let follow_ups = f
            .jobs
            .list(&JobFilter::all().with_correlation_id(parent_id.as_str()))
            .unwrap();
        assert_eq!(follow_ups.len(), 1);
    }

    #[test]
    fn redelivery_keeps_calculated_at_of_unchanged_outcomes() {
        let f = fixture();
        let league = LeagueId::new();
        f.leagues.upsert_league(league, ScoringRules::default()).unwrap();
        let mut fixture_match = Match::finished(MatchId::new(), CompetitionId::new(), 2, 1);
        f.matches.upsert(fixture_match.clone()).unwrap();
        let winner = bet(league, fixture_match.id, 2, 1);
        let loser = bet(league, fixture_match.id, 0, 0);
        f.bets.place(winner.clone()).unwrap();
        f.bets.place(loser.clone()).unwrap();

        f.orchestrator.settle(&payload(&fixture_match), None).unwrap();
        let first = f.settlements.get(winner.id).unwrap().unwrap();

        f.clock.advance(chrono::Duration::minutes(10));
        let report = f.orchestrator.settle(&payload(&fixture_match), None).unwrap();
        assert_eq!(report.updated, 2);
        assert_eq!(f.settlements.get(winner.id).unwrap().unwrap(), first);

        // A corrected score changes the outcome and takes the new time.
        fixture_match.home_score = Some(0);
        fixture_match.away_score = Some(0);
        f.matches.upsert(fixture_match.clone()).unwrap();
        f.orchestrator.settle(&payload(&fixture_match), None).unwrap();

        let corrected = f.settlements.get(loser.id).unwrap().unwrap();
        assert_eq!(corrected.points_earned, 3);
        assert_eq!(corrected.calculated_at, test_time() + chrono::Duration::minutes(10));
    }

    #[test]
    fn handler_rejects_malformed_payload() {
        let f = fixture();
        let job = Job::create(
            NewJob::new(CALCULATE_BET_RESULTS, json!({"match": "nope"})),
            test_time(),
        )
        .job;

        let err = f.orchestrator.handle(&job).unwrap_err();
        assert!(format!("{err:#}").starts_with("invalid CalculateBetResults payload"));
    }
}
