//! Per-member, per-league aggregate.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use scoreline_betting::{Bet, Settlement};
use scoreline_core::{BetId, LeagueId, UserId};

use crate::ranking::assign_ranks;

/// Leaderboard row. Unique per (league, user).
///
/// `rank` is derived on every rebuild; it is not authoritative on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub league_id: LeagueId,
    pub user_id: UserId,
    pub total_points: u64,
    pub bets_placed: u32,
    pub exact_matches: u32,
    pub correct_results: u32,
    pub current_streak: u32,
    pub best_streak: u32,
    pub rank: u32,
    pub last_updated_at: DateTime<Utc>,
}

impl Standing {
    pub fn empty(league_id: LeagueId, user_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            league_id,
            user_id,
            total_points: 0,
            bets_placed: 0,
            exact_matches: 0,
            correct_results: 0,
            current_streak: 0,
            best_streak: 0,
            rank: 0,
            last_updated_at: at,
        }
    }
}

/// Everything a rebuild reads for one league.
#[derive(Debug, Clone, Default)]
pub struct LeagueSnapshot {
    pub league_id: LeagueId,
    pub members: Vec<UserId>,
    pub bets: Vec<Bet>,
    pub settlements: Vec<Settlement>,
}

/// Rebuild a league's standings from scratch and rank them.
///
/// - Only roster members get a row; bets of non-members are ignored.
/// - Bets of other leagues and settlements of unknown bets are ignored.
/// - `current_streak` is the trailing run of point-earning settlements ordered
///   by `calculated_at` (bet id breaks ties).
/// - `best_streak` never goes down: it is the max of the previous row's best
///   and the new current streak.
pub fn rebuild_league(
    snapshot: &LeagueSnapshot,
    previous: &HashMap<UserId, Standing>,
    at: DateTime<Utc>,
) -> Vec<Standing> {
    let league_id = snapshot.league_id;
    let members: BTreeSet<UserId> = snapshot.members.iter().copied().collect();

    let settlements: HashMap<BetId, &Settlement> = snapshot
        .settlements
        .iter()
        .map(|s| (s.bet_id, s))
        .collect();

    let mut bets_by_user: BTreeMap<UserId, Vec<&Bet>> = BTreeMap::new();
    for bet in snapshot.bets.iter().filter(|b| b.league_id == league_id) {
        if members.contains(&bet.user_id) {
            bets_by_user.entry(bet.user_id).or_default().push(bet);
        }
    }

    let mut standings: Vec<Standing> = members
        .iter()
        .map(|user_id| {
            let bets = bets_by_user.get(user_id).map(Vec::as_slice).unwrap_or(&[]);
            let prior_best = previous.get(user_id).map_or(0, |s| s.best_streak);
            member_standing(league_id, *user_id, bets, &settlements, prior_best, at)
        })
        .collect();

    assign_ranks(&mut standings);
    standings
}

fn member_standing(
    league_id: LeagueId,
    user_id: UserId,
    bets: &[&Bet],
    settlements: &HashMap<BetId, &Settlement>,
    prior_best: u32,
    at: DateTime<Utc>,
) -> Standing {
    let mut settled: Vec<&Settlement> = bets
        .iter()
        .filter_map(|b| settlements.get(&b.id).copied())
        .collect();
    settled.sort_by(|a, b| {
        a.calculated_at
            .cmp(&b.calculated_at)
            .then_with(|| a.bet_id.cmp(&b.bet_id))
    });

    let current_streak = settled
        .iter()
        .rev()
        .take_while(|s| s.points_earned > 0)
        .count() as u32;

    Standing {
        league_id,
        user_id,
        total_points: settled.iter().map(|s| u64::from(s.points_earned)).sum(),
        bets_placed: bets.len() as u32,
        exact_matches: settled.iter().filter(|s| s.is_exact_match).count() as u32,
        correct_results: settled.iter().filter(|s| s.is_correct_result).count() as u32,
        current_streak,
        best_streak: prior_best.max(current_streak),
        rank: 0,
        last_updated_at: at,
    }
}
