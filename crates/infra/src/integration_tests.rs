//! End-to-end tests of the settlement pipeline over in-memory stores.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use scoreline_betting::{Bet, Match, Scoreline, ScoringRules};
use scoreline_core::{BetId, Clock, CompetitionId, FixedClock, LeagueId, MatchId, UserId};
use scoreline_events::InMemoryEventSink;
use scoreline_jobs::{Backoff, Job, JobError, JobEvent, JobId, JobStatus, RetryPolicy};

use crate::config::SettlementConfig;
use crate::handlers::{CALCULATE_BET_RESULTS, RECALCULATE_LEAGUE_STANDINGS};
use crate::jobs::{
    ExecutionOutcome, InMemoryJobStore, JobEventPublisher, JobExecutor, JobFilter, JobHandler,
    JobStore,
};
use crate::pipeline::{PipelineStores, SettlementPipeline};
use crate::store::{
    BetStore, InMemoryBetStore, InMemoryLeagueDirectory, InMemoryMatchStore,
    InMemorySettlementStore, InMemoryStandingStore, MatchStore, SettlementStore, StoreError,
};

fn test_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-10-03T21:45:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Matches store that can be switched off to simulate an outage.
struct FlakyMatches {
    inner: InMemoryMatchStore,
    down: AtomicBool,
}

impl MatchStore for FlakyMatches {
    fn get(&self, match_id: MatchId) -> Result<Option<Match>, StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("connection refused".into()));
        }
        self.inner.get(match_id)
    }

    fn upsert(&self, fixture: Match) -> Result<(), StoreError> {
        self.inner.upsert(fixture)
    }
}

struct Harness {
    matches: Arc<FlakyMatches>,
    bets: Arc<InMemoryBetStore>,
    settlements: Arc<InMemorySettlementStore>,
    leagues: Arc<InMemoryLeagueDirectory>,
    jobs: Arc<InMemoryJobStore>,
    events: Arc<InMemoryEventSink<JobEvent>>,
    clock: Arc<FixedClock>,
    pipeline: SettlementPipeline,
}

fn immediate_retries() -> SettlementConfig {
    SettlementConfig {
        workers: 2,
        poll_interval: Duration::from_millis(5),
        retry_policy: RetryPolicy::new(3, Backoff::none()),
    }
}

fn harness() -> Harness {
    harness_with(immediate_retries())
}

fn harness_with(config: SettlementConfig) -> Harness {
    let matches = Arc::new(FlakyMatches {
        inner: InMemoryMatchStore::new(),
        down: AtomicBool::new(false),
    });
    let bets = Arc::new(InMemoryBetStore::new());
    let settlements = Arc::new(InMemorySettlementStore::new());
    let leagues = Arc::new(InMemoryLeagueDirectory::new());
    let jobs = InMemoryJobStore::arc();
    let events = InMemoryEventSink::arc();
    let clock = Arc::new(FixedClock::new(test_time()));

    let stores = PipelineStores {
        matches: matches.clone(),
        bets: bets.clone(),
        settlements: settlements.clone(),
        leagues: leagues.clone(),
        standings: Arc::new(InMemoryStandingStore::new()),
        jobs: jobs.clone(),
    };
    let pipeline = SettlementPipeline::with_event_sink(
        stores,
        config,
        clock.clone(),
        events.clone(),
    );

    Harness {
        matches,
        bets,
        settlements,
        leagues,
        jobs,
        events,
        clock,
        pipeline,
    }
}

impl Harness {
    fn league(&self, rules: ScoringRules, members: &[UserId]) -> LeagueId {
        let league = LeagueId::new();
        self.leagues.upsert_league(league, rules).unwrap();
        for &member in members {
            self.leagues.add_member(league, member).unwrap();
        }
        league
    }

    fn finished(&self, home: u32, away: u32) -> Match {
        let fixture = Match::finished(MatchId::new(), CompetitionId::new(), home, away);
        self.matches.upsert(fixture.clone()).unwrap();
        fixture
    }

    fn predict(&self, league_id: LeagueId, user_id: UserId, fixture: &Match, home: u32, away: u32) -> BetId {
        let bet = Bet {
            id: BetId::new(),
            league_id,
            user_id,
            match_id: fixture.id,
            predicted: Scoreline::new(home, away),
            placed_at: test_time(),
        };
        let id = bet.id;
        self.bets.place(bet).unwrap();
        id
    }

    fn finalize(&self, fixture: &Match) -> JobId {
        self.pipeline
            .match_finalized(fixture.id, fixture.competition_id, None, None)
            .unwrap()
            .job_id
    }

    fn jobs_of_type(&self, job_type: &str) -> Vec<Job> {
        self.jobs
            .list(&JobFilter::all().with_job_type(job_type))
            .unwrap()
    }

    fn status_trail(&self, job_id: JobId) -> Vec<(JobStatus, u32)> {
        self.events
            .payloads()
            .into_iter()
            .filter_map(|event| match event {
                JobEvent::StatusChanged(change) if change.job_id == job_id => {
                    Some((change.to, change.retry_count))
                }
                _ => None,
            })
            .collect()
    }
}

#[test]
fn scenario_a_scores_exact_correct_and_wrong_predictions() {
    let h = harness();
    let (exact, close, wrong) = (UserId::new(), UserId::new(), UserId::new());
    let league = h.league(ScoringRules::new(3, 1), &[exact, close, wrong]);
    let fixture = h.finished(2, 1);
    let b_exact = h.predict(league, exact, &fixture, 2, 1);
    let b_close = h.predict(league, close, &fixture, 1, 0);
    let b_wrong = h.predict(league, wrong, &fixture, 0, 2);

    h.finalize(&fixture);
    let outcomes = h.pipeline.run_until_idle().unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| matches!(o, ExecutionOutcome::Completed(_))));

    let settled = |id| h.settlements.get(id).unwrap().unwrap();
    let s = settled(b_exact);
    assert_eq!((s.points_earned, s.is_exact_match, s.is_correct_result), (3, true, true));
    let s = settled(b_close);
    assert_eq!((s.points_earned, s.is_exact_match, s.is_correct_result), (1, false, true));
    let s = settled(b_wrong);
    assert_eq!((s.points_earned, s.is_exact_match, s.is_correct_result), (0, false, false));

    let board = h.pipeline.leaderboard(league).unwrap();
    let order: Vec<(UserId, u32, u64)> = board
        .iter()
        .map(|s| (s.user_id, s.rank, s.total_points))
        .collect();
    assert_eq!(order, vec![(exact, 1, 3), (close, 2, 1), (wrong, 3, 0)]);
}

#[test]
fn scenario_b_exact_matches_break_points_tie() {
    let h = harness();
    let (x, y) = (UserId::new(), UserId::new());
    let league = h.league(ScoringRules::new(3, 1), &[y, x]);

    // X: one exact (3) + four correct results (4) = 7 over 5 bets.
    // Y: seven correct results = 7 over 7 bets, no exact match.
    for n in 0..7 {
        let fixture = h.finished(1, 0);
        if n == 0 {
            h.predict(league, x, &fixture, 1, 0);
        } else if n < 5 {
            h.predict(league, x, &fixture, 2, 0);
        }
        h.predict(league, y, &fixture, 3, 1);
        h.finalize(&fixture);
    }
    h.pipeline.run_until_idle().unwrap();

    let board = h.pipeline.leaderboard(league).unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!(board[0].user_id, x);
    assert_eq!((board[0].total_points, board[0].exact_matches, board[0].rank), (7, 1, 1));
    assert_eq!(board[1].user_id, y);
    assert_eq!((board[1].total_points, board[1].exact_matches, board[1].rank), (7, 0, 2));
}

#[test]
fn scenario_c_match_without_predictions_is_a_no_op() {
    let h = harness();
    let fixture = h.finished(0, 0);

    let job_id = h.finalize(&fixture);
    let outcomes = h.pipeline.run_until_idle().unwrap();

    assert_eq!(outcomes, vec![ExecutionOutcome::Completed(job_id)]);
    assert!(h.settlements.is_empty());
    assert!(h.jobs_of_type(RECALCULATE_LEAGUE_STANDINGS).is_empty());
}

#[test]
fn resettling_unchanged_match_is_idempotent() {
    let h = harness();
    let users: Vec<UserId> = (0..3).map(|_| UserId::new()).collect();
    let league = h.league(ScoringRules::default(), &users);
    let fixture = h.finished(3, 3);
    let bets: Vec<BetId> = users
        .iter()
        .enumerate()
        .map(|(i, u)| h.predict(league, *u, &fixture, i as u32, i as u32))
        .collect();

    h.finalize(&fixture);
    h.pipeline.run_until_idle().unwrap();
    let first = h.settlements.list_for_bets(&bets).unwrap();
    let first_board = h.pipeline.leaderboard(league).unwrap();

    h.finalize(&fixture);
    h.pipeline.run_until_idle().unwrap();
    let second = h.settlements.list_for_bets(&bets).unwrap();

    assert_eq!(h.settlements.len(), 3);
    assert_eq!(first, second);
    assert_eq!(first_board, h.pipeline.leaderboard(league).unwrap());
    assert_eq!(h.jobs_of_type(CALCULATE_BET_RESULTS).len(), 2);
}

#[test]
fn redelivered_settlement_keeps_streak_order() {
    let h = harness();
    let user = UserId::new();
    let league = h.league(ScoringRules::default(), &[user]);
    let hit = h.finished(1, 0);
    let miss = h.finished(0, 2);
    h.predict(league, user, &hit, 1, 0);
    h.predict(league, user, &miss, 2, 0);

    h.finalize(&hit);
    h.pipeline.run_until_idle().unwrap();
    h.clock.advance(chrono::Duration::minutes(1));
    h.finalize(&miss);
    h.pipeline.run_until_idle().unwrap();
    let before = h.pipeline.leaderboard(league).unwrap();
    assert_eq!((before[0].current_streak, before[0].best_streak), (0, 1));

    h.clock.advance(chrono::Duration::minutes(10));
    h.finalize(&hit);
    h.pipeline.run_until_idle().unwrap();
    let after = h.pipeline.leaderboard(league).unwrap();

    assert_eq!(after[0].current_streak, before[0].current_streak);
    assert_eq!(after[0].best_streak, before[0].best_streak);
    assert_eq!(after[0].total_points, before[0].total_points);
}

#[test]
fn failing_job_walks_retry_path_to_failed() {
    let h = harness();
    let user = UserId::new();
    let league = h.league(ScoringRules::default(), &[user]);
    let fixture = h.finished(1, 0);
    h.predict(league, user, &fixture, 1, 0);
    h.matches.down.store(true, Ordering::SeqCst);

    let job_id = h.finalize(&fixture);
    let outcomes = h.pipeline.run_until_idle().unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[0], ExecutionOutcome::Retrying { retry_count: 1, .. }));
    assert!(matches!(outcomes[1], ExecutionOutcome::Retrying { retry_count: 2, .. }));
    assert_eq!(
        outcomes[2],
        ExecutionOutcome::Failed(JobError::MaxRetriesExceeded {
            job_id,
            retry_count: 3,
            max_retries: 3,
            last_error: "storage error: connection refused".to_string(),
        })
    );

    assert_eq!(
        h.status_trail(job_id),
        vec![
            (JobStatus::Processing, 0),
            (JobStatus::Retrying, 1),
            (JobStatus::Processing, 1),
            (JobStatus::Retrying, 2),
            (JobStatus::Processing, 2),
            (JobStatus::Failed, 3),
        ]
    );

    let failed = h.pipeline.operations().get(job_id).unwrap();
    assert_eq!(failed.status(), JobStatus::Failed);
    assert_eq!(failed.completed_at(), Some(test_time()));
    assert_eq!(h.pipeline.operations().failures().unwrap().len(), 1);
    assert!(h.settlements.is_empty());
}

#[test]
fn manual_retry_reopens_exhausted_job_beyond_max_retries() {
    let h = harness();
    let user = UserId::new();
    let league = h.league(ScoringRules::default(), &[user]);
    let fixture = h.finished(2, 0);
    let bet = h.predict(league, user, &fixture, 2, 0);
    h.matches.down.store(true, Ordering::SeqCst);

    let job_id = h.finalize(&fixture);
    h.pipeline.run_until_idle().unwrap();
    h.matches.down.store(false, Ordering::SeqCst);

    let reopened = h.pipeline.operations().retry(job_id).unwrap();
    assert_eq!(reopened.status(), JobStatus::Pending);
    assert_eq!(reopened.retry_count(), 4);
    assert!(reopened.error().is_none());

    h.pipeline.run_until_idle().unwrap();

    let done = h.pipeline.operations().get(job_id).unwrap();
    assert_eq!(done.status(), JobStatus::Completed);
    assert_eq!(done.retry_count(), 4);
    assert_eq!(h.settlements.get(bet).unwrap().unwrap().points_earned, 3);
    assert_eq!(h.pipeline.leaderboard(league).unwrap()[0].total_points, 3);
}

#[test]
fn cancelled_pending_job_is_never_run() {
    let h = harness();
    let user = UserId::new();
    let league = h.league(ScoringRules::default(), &[user]);
    let fixture = h.finished(1, 1);
    h.predict(league, user, &fixture, 1, 1);

    let job_id = h.finalize(&fixture);
    h.pipeline.operations().cancel(job_id).unwrap();

    assert!(h.pipeline.run_until_idle().unwrap().is_empty());
    assert!(h.settlements.is_empty());
    assert_eq!(h.pipeline.operations().stats().unwrap().cancelled, 1);
}

#[test]
fn follow_up_job_shares_correlation_and_creator() {
    let h = harness();
    let (user, operator) = (UserId::new(), UserId::new());
    let league = h.league(ScoringRules::default(), &[user]);
    let fixture = h.finished(0, 1);
    h.predict(league, user, &fixture, 0, 2);

    h.pipeline
        .match_finalized(
            fixture.id,
            fixture.competition_id,
            Some(operator),
            Some("score-sync-17".to_string()),
        )
        .unwrap();
    h.pipeline.run_until_idle().unwrap();

    let chain = h
        .pipeline
        .operations()
        .list(&JobFilter::all().with_correlation_id("score-sync-17"))
        .unwrap();
    let types: BTreeSet<&str> = chain.iter().map(|j| j.job_type()).collect();
    assert_eq!(
        types,
        BTreeSet::from([CALCULATE_BET_RESULTS, RECALCULATE_LEAGUE_STANDINGS])
    );
    assert!(chain.iter().all(|j| j.created_by_user_id() == Some(operator)));
    assert!(chain.iter().all(|j| j.status() == JobStatus::Completed));

    let envelopes = h.events.events();
    assert!(!envelopes.is_empty());
    assert!(envelopes
        .iter()
        .all(|e| e.correlation_id() == Some("score-sync-17")));
}

/// Cancels its own job mid-run, standing in for an operator racing a worker.
struct CancelsItself {
    jobs: Arc<InMemoryJobStore>,
    clock: Arc<dyn Clock>,
}

impl JobHandler for CancelsItself {
    fn job_type(&self) -> &'static str {
        "cancels-itself"
    }

    fn handle(&self, job: &Job) -> anyhow::Result<serde_json::Value> {
        self.jobs
            .transition(job.id_typed(), &scoreline_jobs::JobCommand::Cancel, self.clock.now())?;
        Ok(serde_json::json!({"ran": true}))
    }
}

#[test]
fn completion_after_cancellation_is_discarded() {
    let jobs = InMemoryJobStore::arc();
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(test_time()));
    let executor = JobExecutor::new(jobs.clone(), clock.clone(), JobEventPublisher::disabled())
        .with_handler(Arc::new(CancelsItself {
            jobs: jobs.clone(),
            clock: clock.clone(),
        }));

    let job = Job::create(
        scoreline_jobs::NewJob::new("cancels-itself", serde_json::json!({})),
        test_time(),
    )
    .job;
    let job_id = job.id_typed();
    jobs.insert(job).unwrap();

    let outcome = executor.execute_next().unwrap().unwrap();

    assert_eq!(outcome, ExecutionOutcome::CancelledDuringExecution(job_id));
    let stored = jobs.get(job_id).unwrap().unwrap();
    assert_eq!(stored.status(), JobStatus::Cancelled);
    assert!(stored.result().is_none());
    assert_eq!(executor.stats().jobs_discarded, 1);
}

/// Cancels, reopens and re-claims its own job on the first attempt, so the
/// first run finishes while a second attempt holds the job.
struct ReopensItself {
    jobs: Arc<InMemoryJobStore>,
    clock: Arc<dyn Clock>,
}

impl JobHandler for ReopensItself {
    fn job_type(&self) -> &'static str {
        "reopens-itself"
    }

    fn handle(&self, job: &Job) -> anyhow::Result<serde_json::Value> {
        if job.retry_count() == 0 {
            let now = self.clock.now();
            self.jobs
                .transition(job.id_typed(), &scoreline_jobs::JobCommand::Cancel, now)?;
            self.jobs
                .transition(job.id_typed(), &scoreline_jobs::JobCommand::Retry, now)?;
            self.jobs.claim_next(now)?;
        }
        Ok(serde_json::json!({ "attempt": job.retry_count() }))
    }
}

#[test]
fn completion_from_superseded_attempt_is_discarded() {
    let jobs = InMemoryJobStore::arc();
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(test_time()));
    let executor = JobExecutor::new(jobs.clone(), clock.clone(), JobEventPublisher::disabled())
        .with_handler(Arc::new(ReopensItself {
            jobs: jobs.clone(),
            clock: clock.clone(),
        }));

    let job = Job::create(
        scoreline_jobs::NewJob::new("reopens-itself", serde_json::json!({})),
        test_time(),
    )
    .job;
    let job_id = job.id_typed();
    jobs.insert(job).unwrap();

    let outcome = executor.execute_next().unwrap().unwrap();

    assert_eq!(outcome, ExecutionOutcome::CancelledDuringExecution(job_id));
    let stored = jobs.get(job_id).unwrap().unwrap();
    assert_eq!(stored.status(), JobStatus::Processing);
    assert_eq!(stored.retry_count(), 1);
    assert!(stored.result().is_none());
    assert_eq!(executor.stats().jobs_discarded, 1);
    assert_eq!(executor.stats().jobs_failed, 0);
}

#[test]
fn worker_pool_settles_in_background() {
    let h = harness();
    let users: Vec<UserId> = (0..4).map(|_| UserId::new()).collect();
    let league = h.league(ScoringRules::default(), &users);
    for _ in 0..3 {
        let fixture = h.finished(2, 2);
        for user in &users {
            h.predict(league, *user, &fixture, 1, 1);
        }
        h.finalize(&fixture);
    }

    let workers = h.pipeline.spawn_workers().unwrap();
    assert_eq!(workers.worker_count(), 2);

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let stats = h.pipeline.operations().stats().unwrap();
        if stats.completed == 6 || Instant::now() > deadline {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    workers.shutdown();

    let stats = h.pipeline.operations().stats().unwrap();
    assert_eq!(stats.completed, 6);
    let board = h.pipeline.leaderboard(league).unwrap();
    assert_eq!(board.len(), 4);
    assert!(board.iter().all(|s| s.total_points == 3 && s.bets_placed == 3));
    let ranks: Vec<u32> = board.iter().map(|s| s.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4]);
}

#[test]
fn in_memory_pipeline_from_defaults() {
    let pipeline = SettlementPipeline::new(
        PipelineStores::in_memory(),
        SettlementConfig::default(),
        Arc::new(FixedClock::new(test_time())),
    );
    let stores = pipeline.stores().clone();
    let fixture = Match::finished(MatchId::new(), CompetitionId::new(), 1, 2);
    stores.matches.upsert(fixture.clone()).unwrap();

    let handle = pipeline
        .match_finalized(fixture.id, fixture.competition_id, None, None)
        .unwrap();

    assert_eq!(handle.job_type, CALCULATE_BET_RESULTS);
    assert_eq!(
        pipeline.operations().get(handle.job_id).unwrap().max_retries(),
        pipeline.config().retry_policy.max_retries
    );
    assert!(pipeline.executor().handles(RECALCULATE_LEAGUE_STANDINGS));
    assert_eq!(
        pipeline.run_until_idle().unwrap(),
        vec![ExecutionOutcome::Completed(handle.job_id)]
    );
}

#[test]
fn pipeline_from_environment() {
    let pipeline = SettlementPipeline::from_env(PipelineStores::in_memory()).unwrap();
    assert!(pipeline.config().workers >= 1);
    assert!(pipeline.run_until_idle().unwrap().is_empty());
}
