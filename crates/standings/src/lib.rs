//! League leaderboards.
//!
//! Standings are always rebuilt wholesale from the full settlement set of a
//! league, never patched with deltas, so re-running a rebuild in any order
//! converges on the same table.

pub mod ranking;
pub mod standing;

pub use ranking::{assign_ranks, compare_standings};
pub use standing::{rebuild_league, LeagueSnapshot, Standing};
