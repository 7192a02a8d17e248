//! Deterministic ranking.

use core::cmp::Ordering;

use crate::standing::Standing;

/// Leaderboard order: total points desc, exact matches desc, bets placed asc,
/// user id asc. The last key makes the order total.
pub fn compare_standings(a: &Standing, b: &Standing) -> Ordering {
    b.total_points
        .cmp(&a.total_points)
        .then_with(|| b.exact_matches.cmp(&a.exact_matches))
        .then_with(|| a.bets_placed.cmp(&b.bets_placed))
        .then_with(|| a.user_id.cmp(&b.user_id))
}

/// Sort into leaderboard order and number ranks 1..=N without gaps.
pub fn assign_ranks(standings: &mut [Standing]) {
    standings.sort_by(compare_standings);
    for (i, standing) in standings.iter_mut().enumerate() {
        standing.rank = (i + 1) as u32;
    }
}
