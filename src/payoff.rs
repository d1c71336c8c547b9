//! Sparse pairwise outcome statistics.
//!
//! Entries are keyed by the unordered player pair and stored from the point of view of
//! the smaller id; queries flip them as needed. Each completed job advances a global
//! tick. With a decay factor `d < 1`, an entry last touched `k` ticks ago is read with
//! its counts scaled by `d^k`, so stale pairs lose weight without a sweep over the table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::LeagueError;
use crate::job::{JobResult, PairVerdict};
use crate::player::PlayerId;
use crate::registry::PlayerRegistry;

/// Neutral win rate returned for pairs without information.
pub const NEUTRAL_WIN_RATE: f64 = 0.5;

/// Win/loss/draw counts of one player against another (possibly decayed, hence `f64`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PairStats {
    pub wins: f64,
    pub losses: f64,
    pub draws: f64,
}

impl PairStats {
    pub fn games(&self) -> f64 {
        self.wins + self.losses + self.draws
    }

    /// Same games seen from the other side.
    pub fn flipped(&self) -> Self {
        Self {
            wins: self.losses,
            losses: self.wins,
            draws: self.draws,
        }
    }

    fn scaled(&self, factor: f64) -> Self {
        Self {
            wins: self.wins * factor,
            losses: self.losses * factor,
            draws: self.draws * factor,
        }
    }

    fn add(&mut self, verdict: PairVerdict) {
        match verdict {
            PairVerdict::Win => self.wins += 1.0,
            PairVerdict::Loss => self.losses += 1.0,
            PairVerdict::Draw => self.draws += 1.0,
        }
    }
}

#[derive(Debug, Clone)]
struct PayoffEntry {
    stats: PairStats,
    last_tick: u64,
}

/// One exported row of the table, from `player`'s point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoffRow {
    pub player: PlayerId,
    pub opponent: PlayerId,
    pub stats: PairStats,
    pub win_rate: f64,
}

#[derive(Debug, Clone)]
pub struct PayoffTable {
    entries: HashMap<(PlayerId, PlayerId), PayoffEntry>,
    decay: f64,
    prior_games: f64,
    tick: u64,
}

impl Default for PayoffTable {
    fn default() -> Self {
        Self::new(1.0, 0.0)
    }
}

impl PayoffTable {
    /// `decay` in `(0, 1]` (1 disables decay), `prior_games` pseudo-games at 0.5 blended
    /// into every win rate.
    pub fn new(decay: f64, prior_games: f64) -> Self {
        Self {
            entries: HashMap::new(),
            decay,
            prior_games,
            tick: 0,
        }
    }

    /// Applies a completed job's outcome to every pair it involves.
    ///
    /// Pairs of identical ids (self-play) carry no information and are skipped.
    /// Applying the same result twice counts it twice.
    ///
    /// # Errors
    /// [`LeagueError::UnknownPlayer`] if a participant is not registered,
    /// [`LeagueError::InvalidJob`] if the job or outcome is malformed. Nothing is
    /// recorded on error.
    pub fn record_outcome(
        &mut self,
        result: &JobResult,
        registry: &PlayerRegistry,
    ) -> Result<(), LeagueError> {
        let players = &result.job.players;
        result.job.check_shape()?;
        if let Some(unknown) = players.iter().find(|id| !registry.contains(id)) {
            return Err(LeagueError::UnknownPlayer(unknown.clone()));
        }
        let pairs = result.outcome.pairs(players.len())?;

        self.tick += 1;
        for (i, j, verdict) in pairs {
            let (a, b) = (&players[i], &players[j]);
            if a == b {
                continue;
            }
            trace!(%a, %b, ?verdict, "payoff update");
            self.record_pair(a, b, verdict);
        }
        Ok(())
    }

    /// Empirical win rate of `a` against `b`, draws counting half.
    ///
    /// Returns [`NEUTRAL_WIN_RATE`] for unseen pairs.
    pub fn win_rate(&self, a: &PlayerId, b: &PlayerId) -> f64 {
        let stats = self.stats(a, b).unwrap_or_default();
        let games = stats.games() + self.prior_games;
        if games <= 0.0 {
            return NEUTRAL_WIN_RATE;
        }
        (stats.wins + 0.5 * stats.draws + NEUTRAL_WIN_RATE * self.prior_games) / games
    }

    /// Current (decayed) statistics of `a` against `b`.
    pub fn stats(&self, a: &PlayerId, b: &PlayerId) -> Option<PairStats> {
        let (key, flipped) = Self::key(a, b);
        let entry = self.entries.get(&key)?;
        let stats = entry.stats.scaled(self.decay_since(entry.last_tick));
        Some(if flipped { stats.flipped() } else { stats })
    }

    /// Number of completed jobs applied so far.
    pub fn results_applied(&self) -> u64 {
        self.tick
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry involving `id`.
    pub fn remove_player(&mut self, id: &PlayerId) {
        self.entries.retain(|(a, b), _| a != id && b != id);
    }

    /// Point-in-time copy of the table, one row per stored pair, sorted by ids.
    pub fn rows(&self) -> Vec<PayoffRow> {
        let mut rows = self
            .entries
            .keys()
            .map(|(a, b)| PayoffRow {
                player: a.clone(),
                opponent: b.clone(),
                stats: self.stats(a, b).unwrap_or_default(),
                win_rate: self.win_rate(a, b),
            })
            .collect::<Vec<_>>();
        rows.sort_by(|x, y| (&x.player, &x.opponent).cmp(&(&y.player, &y.opponent)));
        rows
    }

    /// Loads rows produced by [`rows`](Self::rows), as fresh (undecayed) entries.
    pub(crate) fn restore(&mut self, rows: Vec<PayoffRow>, results_applied: u64) {
        self.tick = results_applied;
        for row in rows {
            let (key, flipped) = Self::key(&row.player, &row.opponent);
            let stats = if flipped {
                row.stats.flipped()
            } else {
                row.stats
            };
            self.entries.insert(
                key,
                PayoffEntry {
                    stats,
                    last_tick: self.tick,
                },
            );
        }
    }

    fn record_pair(&mut self, a: &PlayerId, b: &PlayerId, verdict: PairVerdict) {
        let (key, flipped) = Self::key(a, b);
        let tick = self.tick;
        let factor = self
            .entries
            .get(&key)
            .map(|e| self.decay_since(e.last_tick))
            .unwrap_or(1.0);
        let entry = self.entries.entry(key).or_insert(PayoffEntry {
            stats: PairStats::default(),
            last_tick: tick,
        });
        entry.stats = entry.stats.scaled(factor);
        entry.last_tick = tick;
        entry
            .stats
            .add(if flipped { verdict.flip() } else { verdict });
    }

    fn decay_since(&self, last_tick: u64) -> f64 {
        if self.decay >= 1.0 {
            return 1.0;
        }
        self.decay.powf((self.tick - last_tick) as f64)
    }

    fn key(a: &PlayerId, b: &PlayerId) -> ((PlayerId, PlayerId), bool) {
        if a <= b {
            ((a.clone(), b.clone()), false)
        } else {
            ((b.clone(), a.clone()), true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, Outcome};
    use crate::player::{CheckpointRef, Player};

    fn registry() -> PlayerRegistry {
        let mut registry = PlayerRegistry::new();
        for id in ["a", "b", "c"] {
            registry.register_active(Player::active(id)).unwrap();
        }
        registry
    }

    fn result(players: &[&str], outcome: Outcome) -> JobResult {
        let job = Job {
            job_id: 0,
            players: players.iter().map(|p| PlayerId::new(*p)).collect(),
            checkpoints: vec![CheckpointRef::default(); players.len()],
            actor_id: Some("x".into()),
            episode_length: None,
            rationale: None,
        };
        JobResult::new(job, outcome)
    }

    fn id(s: &str) -> PlayerId {
        PlayerId::new(s)
    }

    #[test]
    fn unseen_pair_is_neutral() {
        let table = PayoffTable::default();
        assert_eq!(table.win_rate(&id("a"), &id("b")), NEUTRAL_WIN_RATE);
        assert!(table.stats(&id("a"), &id("b")).is_none());
    }

    #[test]
    fn win_rate_is_directional() {
        let registry = registry();
        let mut table = PayoffTable::default();
        table
            .record_outcome(&result(&["b", "a"], Outcome::Win), &registry)
            .unwrap();
        table
            .record_outcome(&result(&["a", "b"], Outcome::Draw), &registry)
            .unwrap();

        assert_eq!(table.win_rate(&id("b"), &id("a")), 0.75);
        assert_eq!(table.win_rate(&id("a"), &id("b")), 0.25);
        let stats = table.stats(&id("a"), &id("b")).unwrap();
        assert_eq!(stats.losses, 1.0);
        assert_eq!(stats.draws, 1.0);
        assert_eq!(table.results_applied(), 2);
    }

    #[test]
    fn unknown_player_records_nothing() {
        let registry = registry();
        let mut table = PayoffTable::default();
        let err = table
            .record_outcome(&result(&["a", "ghost"], Outcome::Win), &registry)
            .unwrap_err();
        assert_eq!(err, LeagueError::UnknownPlayer(id("ghost")));
        assert!(table.is_empty());
        assert_eq!(table.results_applied(), 0);
    }

    #[test]
    fn self_play_is_not_recorded() {
        let registry = registry();
        let mut table = PayoffTable::default();
        table
            .record_outcome(&result(&["a", "a"], Outcome::Win), &registry)
            .unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn multi_player_scores() {
        let registry = registry();
        let mut table = PayoffTable::default();
        table
            .record_outcome(
                &result(&["a", "b", "c"], Outcome::Scores(vec![2.0, 1.0, 3.0])),
                &registry,
            )
            .unwrap();
        assert_eq!(table.win_rate(&id("a"), &id("b")), 1.0);
        assert_eq!(table.win_rate(&id("a"), &id("c")), 0.0);
        assert_eq!(table.win_rate(&id("c"), &id("b")), 1.0);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn decay_drifts_toward_prior() {
        let registry = registry();
        let mut table = PayoffTable::new(0.5, 2.0);
        table
            .record_outcome(&result(&["a", "b"], Outcome::Win), &registry)
            .unwrap();
        // (1 + 0.5 * 2) / (1 + 2)
        let fresh = table.win_rate(&id("a"), &id("b"));
        assert!((fresh - 2.0 / 3.0).abs() < 1e-9);

        for _ in 0..4 {
            table
                .record_outcome(&result(&["a", "c"], Outcome::Draw), &registry)
                .unwrap();
        }
        let stale = table.win_rate(&id("a"), &id("b"));
        assert!(stale < fresh);
        assert!(stale > NEUTRAL_WIN_RATE);
        let stats = table.stats(&id("a"), &id("b")).unwrap();
        assert!((stats.wins - 0.0625).abs() < 1e-9);
    }

    #[test]
    fn rows_and_restore() {
        let registry = registry();
        let mut table = PayoffTable::default();
        table
            .record_outcome(&result(&["b", "a"], Outcome::Win), &registry)
            .unwrap();
        table
            .record_outcome(&result(&["c", "a"], Outcome::Loss), &registry)
            .unwrap();
        let rows = table.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].player, id("a"));
        assert_eq!(rows[0].opponent, id("b"));
        assert_eq!(rows[0].win_rate, 0.0);

        let mut restored = PayoffTable::default();
        restored.restore(rows, table.results_applied());
        assert_eq!(restored.win_rate(&id("b"), &id("a")), 1.0);
        assert_eq!(restored.win_rate(&id("a"), &id("c")), 1.0);

        restored.remove_player(&id("a"));
        assert!(restored.is_empty());
    }
}
