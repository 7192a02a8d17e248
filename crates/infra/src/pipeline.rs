//! Wiring of stores, dispatcher, worker pool and both job handlers.

use std::io;
use std::sync::Arc;

use tracing::info;

use scoreline_core::{Clock, CompetitionId, LeagueId, MatchId, SystemClock, UserId};
use scoreline_events::{EventSink, NullEventSink, TracingEventSink};
use scoreline_jobs::{JobEvent, NewJob};
use scoreline_standings::Standing;

use crate::config::{ConfigError, SettlementConfig};
use crate::handlers::{
    CalculateBetResultsPayload, SettlementOrchestrator, StandingsAggregator, CALCULATE_BET_RESULTS,
};
use crate::jobs::{
    DispatchError, Dispatcher, ExecutionOutcome, InMemoryJobStore, JobEventPublisher, JobExecutor,
    JobExecutorHandle, JobHandle, JobOperations, JobStore, JobStoreError, StoreDispatcher,
};
use crate::locks::LeagueLocks;
use crate::store::{
    BetStore, InMemoryBetStore, InMemoryLeagueDirectory, InMemoryMatchStore,
    InMemorySettlementStore, InMemoryStandingStore, LeagueDirectory, MatchStore, SettlementStore,
    StandingStore, StoreError,
};

/// Data the pipeline reads and writes, owned by the surrounding application.
#[derive(Clone)]
pub struct PipelineStores {
    pub matches: Arc<dyn MatchStore>,
    pub bets: Arc<dyn BetStore>,
    pub settlements: Arc<dyn SettlementStore>,
    pub leagues: Arc<dyn LeagueDirectory>,
    pub standings: Arc<dyn StandingStore>,
    pub jobs: Arc<dyn JobStore>,
}

impl PipelineStores {
    pub fn in_memory() -> Self {
        Self {
            matches: Arc::new(InMemoryMatchStore::new()),
            bets: Arc::new(InMemoryBetStore::new()),
            settlements: Arc::new(InMemorySettlementStore::new()),
            leagues: Arc::new(InMemoryLeagueDirectory::new()),
            standings: Arc::new(InMemoryStandingStore::new()),
            jobs: InMemoryJobStore::arc(),
        }
    }
}

pub struct SettlementPipeline {
    stores: PipelineStores,
    config: SettlementConfig,
    dispatcher: Arc<StoreDispatcher>,
    executor: Arc<JobExecutor>,
    operations: JobOperations,
}

impl SettlementPipeline {
    /// Environment configuration, wall clock, transition events logged
    /// through `tracing`.
    pub fn from_env(stores: PipelineStores) -> Result<Self, ConfigError> {
        let config = SettlementConfig::from_env()?;
        Ok(Self::with_event_sink(
            stores,
            config,
            Arc::new(SystemClock),
            Arc::new(TracingEventSink),
        ))
    }

    pub fn new(stores: PipelineStores, config: SettlementConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_event_sink(stores, config, clock, Arc::new(NullEventSink))
    }

    /// Build with job transition events published to `sink`.
    pub fn with_event_sink(
        stores: PipelineStores,
        config: SettlementConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink<JobEvent>>,
    ) -> Self {
        let publisher = JobEventPublisher::new(sink);
        let dispatcher = Arc::new(
            StoreDispatcher::new(stores.jobs.clone(), clock.clone(), publisher.clone())
                .with_default_policy(config.retry_policy.clone()),
        );

        let orchestrator = SettlementOrchestrator::new(
            stores.matches.clone(),
            stores.bets.clone(),
            stores.settlements.clone(),
            stores.leagues.clone(),
            dispatcher.clone(),
            clock.clone(),
        );
        let aggregator = StandingsAggregator::new(
            stores.leagues.clone(),
            stores.bets.clone(),
            stores.settlements.clone(),
            stores.standings.clone(),
            Arc::new(LeagueLocks::new()),
            clock.clone(),
        );
        let executor = Arc::new(
            JobExecutor::new(stores.jobs.clone(), clock.clone(), publisher.clone())
                .with_handler(Arc::new(orchestrator))
                .with_handler(Arc::new(aggregator)),
        );
        let operations = JobOperations::new(stores.jobs.clone(), dispatcher.clone(), clock, publisher);

        Self {
            stores,
            config,
            dispatcher,
            executor,
            operations,
        }
    }

    /// Inbound trigger from score sync: schedule settlement of a finished match.
    pub fn match_finalized(
        &self,
        match_id: MatchId,
        competition_id: CompetitionId,
        triggered_by: Option<UserId>,
        correlation_id: Option<String>,
    ) -> Result<JobHandle, DispatchError> {
        let payload = serde_json::to_value(CalculateBetResultsPayload {
            match_id,
            competition_id,
        })
        .map_err(|e| DispatchError::InvalidPayload(e.to_string()))?;
        let mut job = NewJob::new(CALCULATE_BET_RESULTS, payload);
        if let Some(user_id) = triggered_by {
            job = job.created_by(user_id);
        }
        if let Some(correlation_id) = correlation_id {
            job = job.correlated_with(correlation_id);
        }

        let handle = self.dispatcher.submit(job)?;
        info!(match_id = %match_id, job_id = %handle.job_id, "settlement scheduled");
        Ok(handle)
    }

    /// Run ready jobs on the calling thread until none is left.
    pub fn run_until_idle(&self) -> Result<Vec<ExecutionOutcome>, JobStoreError> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.executor.execute_next()? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Start the configured worker pool.
    pub fn spawn_workers(&self) -> io::Result<JobExecutorHandle> {
        self.executor.clone().spawn(self.config.executor_config())
    }

    pub fn leaderboard(&self, league_id: LeagueId) -> Result<Vec<Standing>, StoreError> {
        self.stores.standings.leaderboard(league_id)
    }

    pub fn operations(&self) -> &JobOperations {
        &self.operations
    }

    pub fn executor(&self) -> &Arc<JobExecutor> {
        &self.executor
    }

    pub fn stores(&self) -> &PipelineStores {
        &self.stores
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }
}
