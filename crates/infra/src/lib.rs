//! Infrastructure for the settlement pipeline.
//!
//! - `store`: storage seams (matches, bets, settlements, leagues, standings)
//! - `jobs`: job store, dispatcher, worker pool, operator surface
//! - `handlers`: `CalculateBetResults` and `RecalculateLeagueStandings`
//! - `locks`: per-league single-writer locks
//! - `config`: environment configuration
//! - `pipeline`: wiring of all of the above

pub mod config;
pub mod handlers;
pub mod jobs;
pub mod locks;
pub mod pipeline;
pub mod store;

pub use config::{ConfigError, SettlementConfig};
pub use pipeline::{PipelineStores, SettlementPipeline};

#[cfg(test)]
mod integration_tests;
