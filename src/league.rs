//! The league aggregate.
//!
//! [`League`] owns the [`PlayerRegistry`], the [`PayoffTable`] and the [`Matchmaker`],
//! and is the only way to mutate them. It is meant to live inside a single
//! [`Coordinator`](crate::coordinator::Coordinator), whose sequential event loop makes it
//! the single writer; the type itself does no locking.

use std::{fs::File, io::BufWriter, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::configuration::LeagueConfig;
use crate::error::LeagueError;
use crate::job::{Job, JobResult};
use crate::matchmaker::{MatchContext, Matchmaker};
use crate::payoff::{PayoffRow, PayoffTable};
use crate::player::{ActorId, Player, PlayerId, PlayerMeta};
use crate::registry::PlayerRegistry;

pub struct League {
    config: LeagueConfig,
    registry: PlayerRegistry,
    payoff: PayoffTable,
    matchmaker: Matchmaker,
}

/// Owned, serializable copy of the league state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueSnapshot {
    pub players: Vec<Player>,
    pub payoff: Vec<PayoffRow>,
    pub jobs_generated: u64,
    pub results_applied: u64,
}

impl League {
    /// Creates a league holding the configured active players.
    ///
    /// A league without active player can be created, but it fails [`validate`](Self::validate)
    /// and every job request.
    ///
    /// # Errors
    /// [`LeagueError::DuplicateId`] if two active players share an id,
    /// [`LeagueError::Config`] if jobs would have fewer than two players.
    pub fn new(config: LeagueConfig) -> Result<League, LeagueError> {
        let mut registry = PlayerRegistry::new();
        for player in &config.active_players {
            registry.register_active(player.clone())?;
        }
        Self::with_registry(config, registry)
    }

    fn with_registry(config: LeagueConfig, registry: PlayerRegistry) -> Result<League, LeagueError> {
        if config.players_per_job < 2 {
            return Err(LeagueError::Config(format!(
                "a job needs at least 2 players, got {}",
                config.players_per_job
            )));
        }
        let payoff = PayoffTable::new(config.payoff_decay, config.payoff_prior);
        let matchmaker = Matchmaker::new(
            config.opponent_selection.create_policy(config.seed),
            config.players_per_job,
            config.episode_length,
        );
        Ok(League {
            config,
            registry,
            payoff,
            matchmaker,
        })
    }

    /// Startup check: a league must have an active player before serving jobs.
    pub fn validate(&self) -> Result<(), LeagueError> {
        if self.registry.active_count() == 0 {
            return Err(LeagueError::NoActivePlayers);
        }
        Ok(())
    }

    /// Next job of the matchmaker, not bound to any actor.
    pub fn next_job(&mut self) -> Result<Job, LeagueError> {
        self.matchmaker.next_job(MatchContext {
            registry: &self.registry,
            payoff: &self.payoff,
        })
    }

    /// Never-ending stream of unbound jobs.
    pub fn jobs(&mut self) -> JobStream<'_> {
        JobStream { league: self }
    }

    /// Pulls the next job and binds it to `actor_id` (`created -> dispatched`).
    pub fn generate_job_for(&mut self, actor_id: &ActorId) -> Result<Job, LeagueError> {
        let mut job = self.next_job()?;
        job.bind(actor_id.clone());
        Ok(job)
    }

    /// Records a completed job, then applies the player meta it carries, if any.
    ///
    /// # Errors
    /// [`LeagueError::InvalidJob`] if the job was never dispatched,
    /// [`LeagueError::UnknownPlayer`] if a participant is gone. Nothing is recorded then.
    /// Errors from the piggybacked meta are those of [`apply_player_meta`](Self::apply_player_meta);
    /// the outcome is already recorded when they are returned.
    pub fn apply_result(&mut self, result: JobResult) -> Result<(), LeagueError> {
        if !result.job.is_dispatched() {
            return Err(LeagueError::InvalidJob(format!(
                "job {} was never dispatched",
                result.job.job_id
            )));
        }
        self.payoff.record_outcome(&result, &self.registry)?;
        debug!(job = %result.job, outcome = ?result.outcome, "result applied");

        if let Some(meta) = result.player_meta {
            self.apply_player_meta(meta)?;
        }
        Ok(())
    }

    /// Moves the active player to the announced checkpoint and freezes a historical
    /// copy of it. Returns the historical id.
    ///
    /// # Errors
    /// [`LeagueError::NotFound`] / [`LeagueError::NotActive`] if `meta.player_id` is
    /// not an active player. The league is unchanged then.
    #[instrument(skip_all, fields(player = %meta.player_id, train_iter = meta.train_iter))]
    pub fn apply_player_meta(&mut self, meta: PlayerMeta) -> Result<PlayerId, LeagueError> {
        self.registry.update_active_checkpoint(
            &meta.player_id,
            meta.checkpoint.clone(),
            meta.train_iter,
        )?;
        let historical =
            self.registry
                .promote_to_historical(&meta.player_id, meta.checkpoint, meta.train_iter)?;
        info!(%historical, "new historical player");
        self.enforce_retention();
        Ok(historical)
    }

    fn enforce_retention(&mut self) {
        let Some(max) = self.config.max_historical else {
            return;
        };
        while self.registry.historical_count() > max {
            let Some(evicted) = self.registry.evict_oldest_historical() else {
                break;
            };
            self.payoff.remove_player(&evicted);
            info!(%evicted, "historical player evicted");
        }
    }

    /// Active player trained by the learner running on `node_id`.
    pub fn learner_player(&self, node_id: usize) -> Result<PlayerId, LeagueError> {
        let active = self.registry.list_active_ids();
        if active.is_empty() {
            return Err(LeagueError::NoActivePlayers);
        }
        Ok(active[node_id % active.len()].clone())
    }

    pub fn active_ids(&self) -> Vec<PlayerId> {
        self.registry.list_active_ids()
    }

    pub fn win_rate(&self, a: &PlayerId, b: &PlayerId) -> f64 {
        self.payoff.win_rate(a, b)
    }

    pub fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    pub fn payoff(&self) -> &PayoffTable {
        &self.payoff
    }

    pub fn config(&self) -> &LeagueConfig {
        &self.config
    }

    pub fn jobs_generated(&self) -> u64 {
        self.matchmaker.jobs_generated()
    }

    /// Point-in-time copy, safe to hand to monitoring.
    pub fn snapshot(&self) -> LeagueSnapshot {
        LeagueSnapshot {
            players: self.registry.players().to_vec(),
            payoff: self.payoff.rows(),
            jobs_generated: self.matchmaker.jobs_generated(),
            results_applied: self.payoff.results_applied(),
        }
    }

    /// Writes [`snapshot`](Self::snapshot) as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("could not create checkpoint {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.snapshot())
            .context("could not serialize league")?;
        info!(path = %path.display(), "league saved");
        Ok(())
    }

    /// Rebuilds a league from a file written by [`save`](Self::save).
    ///
    /// Players of the checkpoint keep their kind and checkpoint; active players of
    /// `config` missing from it are added. Payoff rows naming unknown players are dropped.
    pub fn restore(config: LeagueConfig, path: impl AsRef<Path>) -> anyhow::Result<League> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("could not open checkpoint {}", path.display()))?;
        let snapshot: LeagueSnapshot = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("could not parse checkpoint {}", path.display()))?;

        let mut registry = PlayerRegistry::new();
        for player in snapshot.players {
            registry.insert(player)?;
        }
        for player in &config.active_players {
            if !registry.contains(&player.id) {
                registry.register_active(player.clone())?;
            }
        }

        let mut league = Self::with_registry(config, registry)?;
        let (known, unknown): (Vec<_>, Vec<_>) = snapshot.payoff.into_iter().partition(|row| {
            league.registry.contains(&row.player) && league.registry.contains(&row.opponent)
        });
        if !unknown.is_empty() {
            warn!(dropped = unknown.len(), "payoff rows with unknown players");
        }
        league.payoff.restore(known, snapshot.results_applied);
        league.matchmaker.resume_job_ids(snapshot.jobs_generated);
        info!(path = %path.display(), players = league.registry.len(), "league restored");
        Ok(league)
    }
}

/// Iterator over [`League::next_job`].
///
/// Only ends if the league has no active player, which [`League::validate`] rules out.
pub struct JobStream<'a> {
    league: &'a mut League,
}

impl Iterator for JobStream<'_> {
    type Item = Job;

    fn next(&mut self) -> Option<Job> {
        match self.league.next_job() {
            Ok(job) => Some(job),
            Err(e) => {
                warn!("job stream stopped: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::LeagueConfigBuilder;
    use crate::job::Outcome;

    fn league(ids: &[&str]) -> League {
        let config = LeagueConfigBuilder::new()
            .with_active_players(ids.iter().copied())
            .build()
            .unwrap();
        League::new(config).unwrap()
    }

    #[test]
    fn generated_jobs_are_bound() {
        let mut league = league(&["a", "b"]);
        let job = league.generate_job_for(&"actor-1".into()).unwrap();
        assert_eq!(job.actor_id, Some(ActorId::new("actor-1")));
        assert_eq!(job.launch_player().as_str(), "a");
    }

    #[test]
    fn undispatched_result_is_rejected() {
        let mut league = league(&["a", "b"]);
        let job = league.next_job().unwrap();
        let err = league
            .apply_result(JobResult::new(job, Outcome::Win))
            .unwrap_err();
        assert!(matches!(err, LeagueError::InvalidJob(_)));
        assert_eq!(league.payoff().results_applied(), 0);
    }

    #[test]
    fn piggybacked_meta_is_applied() {
        let mut league = league(&["a", "b"]);
        let job = league.generate_job_for(&"x".into()).unwrap();
        let result = JobResult::new(job, Outcome::Loss)
            .with_player_meta(PlayerMeta::new("a", "a_c7", 7));
        league.apply_result(result).unwrap();
        assert_eq!(league.win_rate(&"b".into(), &"a".into()), 1.0);
        assert_eq!(league.registry().historical_count(), 1);
        assert!(league.registry().contains(&"a_7_historical".into()));
    }

    #[test]
    fn unknown_meta_leaves_league_untouched() {
        let mut league = league(&["a"]);
        let err = league
            .apply_player_meta(PlayerMeta::new("ghost", "c", 1))
            .unwrap_err();
        assert_eq!(err, LeagueError::NotFound(PlayerId::new("ghost")));
        assert_eq!(league.registry().len(), 1);
    }

    #[test]
    fn retention_cap_evicts_oldest_and_its_payoff() {
        let config = LeagueConfigBuilder::new()
            .with_active_players(["a", "b"])
            .with_max_historical(1)
            .build()
            .unwrap();
        let mut league = League::new(config).unwrap();
        let first = league
            .apply_player_meta(PlayerMeta::new("a", "a1", 1))
            .unwrap();

        let mut job = league.next_job().unwrap();
        job.players = vec!["b".into(), first.clone()];
        job.bind("x".into());
        league
            .apply_result(JobResult::new(job, Outcome::Win))
            .unwrap();
        assert!(league.payoff().stats(&"b".into(), &first).is_some());

        let second = league
            .apply_player_meta(PlayerMeta::new("a", "a2", 2))
            .unwrap();
        assert!(!league.registry().contains(&first));
        assert!(league.registry().contains(&second));
        assert!(league.payoff().is_empty());
    }

    #[test]
    fn learner_assignment_wraps() {
        let league = league(&["a", "b"]);
        assert_eq!(league.learner_player(0).unwrap().as_str(), "a");
        assert_eq!(league.learner_player(3).unwrap().as_str(), "b");
    }

    #[test]
    fn stream_is_endless_round_robin() {
        let mut league = league(&["p0", "p1", "p2"]);
        let primaries = league
            .jobs()
            .take(7)
            .map(|job| job.launch_player().to_string())
            .collect::<Vec<_>>();
        assert_eq!(primaries, ["p0", "p1", "p2", "p0", "p1", "p2", "p0"]);
        assert_eq!(league.jobs_generated(), 7);
    }

    #[test]
    fn empty_league_fails_validation() {
        let league = League::new(LeagueConfig::default()).unwrap();
        assert_eq!(league.validate(), Err(LeagueError::NoActivePlayers));
    }
}
