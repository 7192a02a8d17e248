//! `scoreline-core`: shared building blocks for the settlement pipeline.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::DomainError;
pub use id::{BetId, CompetitionId, LeagueId, MatchId, UserId};
