use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use scoreline_betting::{Bet, Match, ScoringRules, Settlement};
use scoreline_core::{BetId, DomainError, LeagueId, MatchId, UserId};
use scoreline_standings::Standing;

use super::{
    BetStore, LeagueDirectory, MatchStore, SettlementStore, StandingStore, StoreError,
    UpsertOutcome,
};

/// In-memory match store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMatchStore {
    matches: RwLock<HashMap<MatchId, Match>>,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MatchStore for InMemoryMatchStore {
    fn get(&self, match_id: MatchId) -> Result<Option<Match>, StoreError> {
        let matches = self.matches.read().map_err(|_| StoreError::poisoned("match store"))?;
        Ok(matches.get(&match_id).cloned())
    }

    fn upsert(&self, fixture: Match) -> Result<(), StoreError> {
        let mut matches = self.matches.write().map_err(|_| StoreError::poisoned("match store"))?;
        matches.insert(fixture.id, fixture);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct BetIndex {
    bets: HashMap<BetId, Bet>,
    slots: HashSet<(LeagueId, UserId, MatchId)>,
}

/// In-memory bet store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryBetStore {
    inner: RwLock<BetIndex>,
}

impl InMemoryBetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn filtered(&self, keep: impl Fn(&Bet) -> bool) -> Result<Vec<Bet>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::poisoned("bet store"))?;
        let mut bets: Vec<Bet> = inner.bets.values().filter(|b| keep(b)).cloned().collect();
        bets.sort_by_key(|b| (b.placed_at, b.id));
        Ok(bets)
    }
}

impl BetStore for InMemoryBetStore {
    fn place(&self, bet: Bet) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::poisoned("bet store"))?;
        if inner.bets.contains_key(&bet.id) || inner.slots.contains(&bet.slot()) {
            return Err(DomainError::conflict(format!(
                "prediction already placed for user {} on match {} in league {}",
                bet.user_id, bet.match_id, bet.league_id
            ))
            .into());
        }
        inner.slots.insert(bet.slot());
        inner.bets.insert(bet.id, bet);
        Ok(())
    }

    fn list_by_match(&self, match_id: MatchId) -> Result<Vec<Bet>, StoreError> {
        self.filtered(|b| b.match_id == match_id)
    }

    fn list_by_league(&self, league_id: LeagueId) -> Result<Vec<Bet>, StoreError> {
        self.filtered(|b| b.league_id == league_id)
    }
}

/// In-memory settlement store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySettlementStore {
    settlements: RwLock<HashMap<BetId, Settlement>>,
}

impl InMemorySettlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.settlements.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SettlementStore for InMemorySettlementStore {
    fn upsert(&self, settlement: Settlement) -> Result<UpsertOutcome, StoreError> {
        let mut rows = self
            .settlements
            .write()
            .map_err(|_| StoreError::poisoned("settlement store"))?;
        Ok(match rows.insert(settlement.bet_id, settlement) {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        })
    }

    fn get(&self, bet_id: BetId) -> Result<Option<Settlement>, StoreError> {
        let rows = self
            .settlements
            .read()
            .map_err(|_| StoreError::poisoned("settlement store"))?;
        Ok(rows.get(&bet_id).cloned())
    }

    fn list_for_bets(&self, bet_ids: &[BetId]) -> Result<Vec<Settlement>, StoreError> {
        let rows = self
            .settlements
            .read()
            .map_err(|_| StoreError::poisoned("settlement store"))?;
        Ok(bet_ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }
}

#[derive(Debug, Clone, Default)]
struct LeagueEntry {
    rules: ScoringRules,
    members: Vec<UserId>,
}

/// In-memory league directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryLeagueDirectory {
    leagues: RwLock<HashMap<LeagueId, LeagueEntry>>,
}

impl InMemoryLeagueDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a league (or replace its rules).
    pub fn upsert_league(&self, league_id: LeagueId, rules: ScoringRules) -> Result<(), StoreError> {
        let mut leagues = self
            .leagues
            .write()
            .map_err(|_| StoreError::poisoned("league directory"))?;
        leagues.entry(league_id).or_default().rules = rules;
        Ok(())
    }

    /// Add a member; registering the same member twice is a no-op.
    pub fn add_member(&self, league_id: LeagueId, user_id: UserId) -> Result<(), StoreError> {
        let mut leagues = self
            .leagues
            .write()
            .map_err(|_| StoreError::poisoned("league directory"))?;
        let entry = leagues.get_mut(&league_id).ok_or_else(|| {
            DomainError::validation(format!("league {league_id} is not registered"))
        })?;
        if !entry.members.contains(&user_id) {
            entry.members.push(user_id);
        }
        Ok(())
    }
}

impl LeagueDirectory for InMemoryLeagueDirectory {
    fn scoring_rules(&self, league_id: LeagueId) -> Result<Option<ScoringRules>, StoreError> {
        let leagues = self
            .leagues
            .read()
            .map_err(|_| StoreError::poisoned("league directory"))?;
        Ok(leagues.get(&league_id).map(|l| l.rules))
    }

    fn members(&self, league_id: LeagueId) -> Result<Vec<UserId>, StoreError> {
        let leagues = self
            .leagues
            .read()
            .map_err(|_| StoreError::poisoned("league directory"))?;
        Ok(leagues
            .get(&league_id)
            .map(|l| l.members.clone())
            .unwrap_or_default())
    }
}

/// In-memory standings table for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryStandingStore {
    tables: RwLock<HashMap<LeagueId, BTreeMap<UserId, Standing>>>,
}

impl InMemoryStandingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StandingStore for InMemoryStandingStore {
    fn list_by_league(&self, league_id: LeagueId) -> Result<Vec<Standing>, StoreError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StoreError::poisoned("standing store"))?;
        Ok(tables
            .get(&league_id)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    fn replace_league(&self, league_id: LeagueId, standings: Vec<Standing>) -> Result<(), StoreError> {
        if let Some(stray) = standings.iter().find(|s| s.league_id != league_id) {
            return Err(DomainError::validation(format!(
                "standing for league {} cannot be stored under league {league_id}",
                stray.league_id
            ))
            .into());
        }

        let mut table = BTreeMap::new();
        for standing in standings {
            if table.insert(standing.user_id, standing).is_some() {
                return Err(DomainError::conflict(format!(
                    "duplicate standing row in league {league_id}"
                ))
                .into());
            }
        }

        let mut tables = self
            .tables
            .write()
            .map_err(|_| StoreError::poisoned("standing store"))?;
        tables.insert(league_id, table);
        Ok(())
    }
}
