//! Handlers for the two job types of the settlement pipeline.
//!
//! `CalculateBetResults` scores every bet on a finished match and enqueues one
//! `RecalculateLeagueStandings` job for the leagues it touched, which rebuilds
//! and ranks each of those leaderboards.

pub mod settlement;
pub mod standings;

pub use settlement::{
    CalculateBetResultsPayload, SettlementError, SettlementOrchestrator, SettlementReport,
    CALCULATE_BET_RESULTS,
};
pub use standings::{
    LeagueFailure, LeagueSummary, RecalculateLeagueStandingsPayload, StandingsAggregator,
    StandingsError, StandingsReport, RECALCULATE_LEAGUE_STANDINGS,
};
