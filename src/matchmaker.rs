//! Job generation.
//!
//! The [`Matchmaker`] is a stateful, never-ending job source. Each call to
//! [`Matchmaker::next_job`] picks the primary player round-robin over the active players
//! (`counter % active_count`) and lets an [`OpponentPolicy`] fill the remaining slots.
//! The round-robin counter is the only fairness guarantee: over `M` consecutive calls
//! with `N` active players, each of them is primary `floor(M/N)` or `ceil(M/N)` times.
//!
//! # Provided policies
//! - [`Rotation`]: the players registered right after the primary, deterministic. Default.
//! - [`SelfPlay`]: the primary against copies of itself.
//! - [`UniformHistorical`]: uniformly sampled historical snapshots.
//! - [`Prioritized`]: prioritized fictitious self-play, favouring opponents the primary
//!   struggles against according to the payoff table.

use std::{fmt::Display, str::FromStr};

use anyhow::bail;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::LeagueError;
use crate::job::Job;
use crate::payoff::PayoffTable;
use crate::player::PlayerId;
use crate::registry::PlayerRegistry;

/// Read-only view of the league handed to opponent policies.
#[derive(Clone, Copy)]
pub struct MatchContext<'a> {
    pub registry: &'a PlayerRegistry,
    pub payoff: &'a PayoffTable,
}

/// How the non-primary slots of a job are filled.
pub trait OpponentPolicy: Send {
    /// Short name, reported in each job's rationale.
    fn name(&self) -> &'static str;

    /// Returns exactly `count` opponent ids for `primary`, all registered in `ctx.registry`.
    fn select_opponents(
        &mut self,
        primary: &PlayerId,
        ctx: &MatchContext<'_>,
        count: usize,
    ) -> Vec<PlayerId>;
}

/// Built-in opponent policies, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpponentSelection {
    #[default]
    Rotation,
    SelfPlay,
    UniformHistorical,
    /// `exponent` shapes the `(1 - win_rate)^exponent` weighting.
    Prioritized { exponent: f64 },
}

impl OpponentSelection {
    /// Creates the policy, seeded when `seed` is given.
    pub fn create_policy(&self, seed: Option<u64>) -> Box<dyn OpponentPolicy> {
        let rng = || match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        match *self {
            Self::Rotation => Box::new(Rotation),
            Self::SelfPlay => Box::new(SelfPlay),
            Self::UniformHistorical => Box::new(UniformHistorical { rng: rng() }),
            Self::Prioritized { exponent } => Box::new(Prioritized {
                exponent,
                rng: rng(),
            }),
        }
    }
}

impl FromStr for OpponentSelection {
    type Err = anyhow::Error;

    /// `rotation`, `self_play`, `uniform_historical`, `pfsp` or `pfsp:<exponent>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let selection = match s.split_once(':') {
            None if s == "rotation" => Self::Rotation,
            None if s == "self_play" => Self::SelfPlay,
            None if s == "uniform_historical" => Self::UniformHistorical,
            None if s == "pfsp" => Self::Prioritized { exponent: 2.0 },
            Some(("pfsp", exponent)) => {
                let exponent: f64 = exponent.parse()?;
                if !(exponent.is_finite() && exponent >= 0.0) {
                    bail!("pfsp exponent must be finite and non-negative, got {exponent}");
                }
                Self::Prioritized { exponent }
            }
            _ => bail!("unknown opponent policy '{s}'"),
        };
        Ok(selection)
    }
}

impl Display for OpponentSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rotation => write!(f, "rotation"),
            Self::SelfPlay => write!(f, "self_play"),
            Self::UniformHistorical => write!(f, "uniform_historical"),
            Self::Prioritized { exponent } => write!(f, "pfsp:{exponent}"),
        }
    }
}

/// Opponents are the players registered after the primary, wrapping around.
pub struct Rotation;

impl OpponentPolicy for Rotation {
    fn name(&self) -> &'static str {
        "rotation"
    }

    fn select_opponents(
        &mut self,
        primary: &PlayerId,
        ctx: &MatchContext<'_>,
        count: usize,
    ) -> Vec<PlayerId> {
        let all = ctx.registry.list_all_ids();
        let start = all.iter().position(|id| id == primary).unwrap_or(0);
        let candidates = all
            .iter()
            .cycle()
            .skip(start + 1)
            .take(all.len())
            .filter(|id| *id != primary)
            .cloned()
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return vec![primary.clone(); count];
        }
        (0..count)
            .map(|k| candidates[k % candidates.len()].clone())
            .collect()
    }
}

pub struct SelfPlay;

impl OpponentPolicy for SelfPlay {
    fn name(&self) -> &'static str {
        "self_play"
    }

    fn select_opponents(
        &mut self,
        primary: &PlayerId,
        _ctx: &MatchContext<'_>,
        count: usize,
    ) -> Vec<PlayerId> {
        vec![primary.clone(); count]
    }
}

/// Uniform sampling over historical players, self-play while there is none.
pub struct UniformHistorical {
    rng: SmallRng,
}

impl OpponentPolicy for UniformHistorical {
    fn name(&self) -> &'static str {
        "uniform_historical"
    }

    fn select_opponents(
        &mut self,
        primary: &PlayerId,
        ctx: &MatchContext<'_>,
        count: usize,
    ) -> Vec<PlayerId> {
        let historical = ctx.registry.historical().collect::<Vec<_>>();
        if historical.is_empty() {
            return vec![primary.clone(); count];
        }
        (0..count)
            .map(|_| historical[self.rng.random_range(0..historical.len())].id.clone())
            .collect()
    }
}

/// Prioritized fictitious self-play.
///
/// Every other player is weighted by `(1 - win_rate(primary, opponent))^exponent`,
/// uniform if all weights vanish.
pub struct Prioritized {
    exponent: f64,
    rng: SmallRng,
}

impl Prioritized {
    fn sample(&mut self, weights: &[f64]) -> usize {
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return self.rng.random_range(0..weights.len());
        }
        let mut target = self.rng.random::<f64>() * total;
        for (i, w) in weights.iter().enumerate() {
            if target < *w {
                return i;
            }
            target -= w;
        }
        weights.len() - 1
    }
}

impl OpponentPolicy for Prioritized {
    fn name(&self) -> &'static str {
        "pfsp"
    }

    fn select_opponents(
        &mut self,
        primary: &PlayerId,
        ctx: &MatchContext<'_>,
        count: usize,
    ) -> Vec<PlayerId> {
        let candidates = ctx
            .registry
            .list_all_ids()
            .into_iter()
            .filter(|id| id != primary)
            .collect::<Vec<_>>();
        if candidates.is_empty() {
            return vec![primary.clone(); count];
        }
        let weights = candidates
            .iter()
            .map(|c| (1.0 - ctx.payoff.win_rate(primary, c)).powf(self.exponent))
            .collect::<Vec<_>>();
        (0..count)
            .map(|_| candidates[self.sample(&weights)].clone())
            .collect()
    }
}

/// Never-ending job source.
pub struct Matchmaker {
    counter: u64,
    next_job_id: u64,
    players_per_job: usize,
    episode_length: Option<u32>,
    policy: Box<dyn OpponentPolicy>,
}

impl Matchmaker {
    pub fn new(
        policy: Box<dyn OpponentPolicy>,
        players_per_job: usize,
        episode_length: Option<u32>,
    ) -> Self {
        assert!(players_per_job >= 2, "a job needs at least two players");
        Self {
            counter: 0,
            next_job_id: 0,
            players_per_job,
            episode_length,
            policy,
        }
    }

    /// Next job of the sequence. Two calls never return the same job.
    ///
    /// # Errors
    /// [`LeagueError::NoActivePlayers`] (fatal) when the league has no active player,
    /// [`LeagueError::UnknownPlayer`] if the policy picked an unregistered opponent.
    pub fn next_job(&mut self, ctx: MatchContext<'_>) -> Result<Job, LeagueError> {
        let active = ctx.registry.list_active_ids();
        if active.is_empty() {
            return Err(LeagueError::NoActivePlayers);
        }
        let primary = active[(self.counter % active.len() as u64) as usize].clone();
        self.counter += 1;

        let opponents = self
            .policy
            .select_opponents(&primary, &ctx, self.players_per_job - 1);
        let rationale = format!(
            "{}: {} against {}",
            self.policy.name(),
            primary,
            opponents
                .iter()
                .map(PlayerId::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let players = std::iter::once(primary).chain(opponents).collect::<Vec<_>>();
        let checkpoints = players
            .iter()
            .map(|id| {
                ctx.registry
                    .get(id)
                    .map(|p| p.checkpoint.clone())
                    .ok_or_else(|| LeagueError::UnknownPlayer(id.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let job = Job {
            job_id: self.next_job_id,
            players,
            checkpoints,
            actor_id: None,
            episode_length: self.episode_length,
            rationale: Some(rationale),
        };
        self.next_job_id += 1;
        trace!(%job, "job created");
        Ok(job)
    }

    /// How many jobs were handed out.
    pub fn jobs_generated(&self) -> u64 {
        self.next_job_id
    }

    /// Continues job numbering after a restored league.
    pub(crate) fn resume_job_ids(&mut self, next_job_id: u64) {
        self.next_job_id = next_job_id;
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::job::{JobResult, Outcome};
    use crate::player::Player;

    fn registry(ids: &[&str]) -> PlayerRegistry {
        let mut registry = PlayerRegistry::new();
        for id in ids {
            registry
                .register_active(Player::active(*id).with_checkpoint(format!("{id}.ckpt")))
                .unwrap();
        }
        registry
    }

    fn primaries(
        matchmaker: &mut Matchmaker,
        registry: &PlayerRegistry,
        payoff: &PayoffTable,
        calls: usize,
    ) -> Vec<String> {
        (0..calls)
            .map(|_| {
                matchmaker
                    .next_job(MatchContext { registry, payoff })
                    .unwrap()
                    .launch_player()
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn round_robin_primary() {
        let registry = registry(&["p0", "p1", "p2"]);
        let payoff = PayoffTable::default();
        let mut mm = Matchmaker::new(Box::new(Rotation), 2, None);
        assert_eq!(
            primaries(&mut mm, &registry, &payoff, 6),
            vec!["p0", "p1", "p2", "p0", "p1", "p2"]
        );
    }

    #[test]
    fn fairness_bounds() {
        let registry = registry(&["a", "b", "c", "d"]);
        let payoff = PayoffTable::default();
        let mut mm = Matchmaker::new(OpponentSelection::SelfPlay.create_policy(None), 2, None);
        // skip an arbitrary prefix, the window must still be fair
        primaries(&mut mm, &registry, &payoff, 3);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for p in primaries(&mut mm, &registry, &payoff, 10) {
            *counts.entry(p).or_default() += 1;
        }
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&n| n == 2 || n == 3));
    }

    #[test]
    fn new_active_player_changes_modulus() {
        let mut registry = registry(&["a", "b"]);
        let payoff = PayoffTable::default();
        let mut mm = Matchmaker::new(Box::new(Rotation), 2, None);
        assert_eq!(primaries(&mut mm, &registry, &payoff, 2), vec!["a", "b"]);
        registry.register_active(Player::active("c")).unwrap();
        assert_eq!(primaries(&mut mm, &registry, &payoff, 3), vec!["c", "a", "b"]);
    }

    #[test]
    fn empty_league_is_fatal() {
        let registry = PlayerRegistry::new();
        let payoff = PayoffTable::default();
        let mut mm = Matchmaker::new(Box::new(Rotation), 2, None);
        let err = mm
            .next_job(MatchContext {
                registry: &registry,
                payoff: &payoff,
            })
            .unwrap_err();
        assert_eq!(err, LeagueError::NoActivePlayers);
        assert!(err.is_fatal());
    }

    #[test]
    fn jobs_are_distinct_and_carry_checkpoints() {
        let registry = registry(&["a", "b"]);
        let payoff = PayoffTable::default();
        let ctx = MatchContext {
            registry: &registry,
            payoff: &payoff,
        };
        let mut mm = Matchmaker::new(Box::new(Rotation), 2, Some(200));
        let first = mm.next_job(ctx).unwrap();
        let second = mm.next_job(ctx).unwrap();
        assert_ne!(first.job_id, second.job_id);
        assert_eq!(first.players, vec![PlayerId::new("a"), PlayerId::new("b")]);
        assert_eq!(second.players, vec![PlayerId::new("b"), PlayerId::new("a")]);
        assert_eq!(first.checkpoints[1].as_str(), "b.ckpt");
        assert_eq!(first.episode_length, Some(200));
        assert!(first.actor_id.is_none());
        assert_eq!(mm.jobs_generated(), 2);
    }

    #[test]
    fn rotation_alone_is_self_play() {
        let registry = registry(&["solo"]);
        let payoff = PayoffTable::default();
        let mut policy = Rotation;
        let ctx = MatchContext {
            registry: &registry,
            payoff: &payoff,
        };
        assert_eq!(
            policy.select_opponents(&"solo".into(), &ctx, 2),
            vec![PlayerId::new("solo"), PlayerId::new("solo")]
        );
    }

    #[test]
    fn uniform_historical_picks_snapshots() {
        let mut registry = registry(&["a"]);
        let payoff = PayoffTable::default();
        let mut policy = OpponentSelection::UniformHistorical.create_policy(Some(7));
        {
            let ctx = MatchContext {
                registry: &registry,
                payoff: &payoff,
            };
            assert_eq!(
                policy.select_opponents(&"a".into(), &ctx, 1),
                vec![PlayerId::new("a")]
            );
        }
        let h = registry
            .promote_to_historical(&"a".into(), "a1".into(), 1)
            .unwrap();
        let ctx = MatchContext {
            registry: &registry,
            payoff: &payoff,
        };
        assert_eq!(policy.select_opponents(&"a".into(), &ctx, 3), vec![h; 3]);
    }

    #[test]
    fn prioritized_avoids_beaten_opponents() {
        let registry = registry(&["a", "weak", "strong"]);
        let mut payoff = PayoffTable::default();
        for (players, outcome) in [(["a", "weak"], Outcome::Win), (["a", "strong"], Outcome::Loss)] {
            let job = Job {
                job_id: 0,
                players: players.iter().map(|p| PlayerId::new(*p)).collect(),
                checkpoints: vec![Default::default(); 2],
                actor_id: None,
                episode_length: None,
                rationale: None,
            };
            payoff
                .record_outcome(&JobResult::new(job, outcome), &registry)
                .unwrap();
        }
        let ctx = MatchContext {
            registry: &registry,
            payoff: &payoff,
        };
        let mut policy = OpponentSelection::Prioritized { exponent: 2.0 }.create_policy(Some(1));
        let picks = policy.select_opponents(&"a".into(), &ctx, 50);
        assert!(picks.iter().all(|p| p.as_str() == "strong"));
    }

    #[test]
    fn parse_selection() {
        assert_eq!(
            "rotation".parse::<OpponentSelection>().unwrap(),
            OpponentSelection::Rotation
        );
        assert_eq!(
            " PFSP:3 ".parse::<OpponentSelection>().unwrap(),
            OpponentSelection::Prioritized { exponent: 3.0 }
        );
        assert!("elo".parse::<OpponentSelection>().is_err());
        for bad in ["pfsp:-1", "pfsp:nan", "pfsp:inf", "pfsp:"] {
            assert!(bad.parse::<OpponentSelection>().is_err(), "{bad} accepted");
        }
        assert_eq!(
            "pfsp:0".parse::<OpponentSelection>().unwrap(),
            OpponentSelection::Prioritized { exponent: 0.0 }
        );
        assert_eq!(OpponentSelection::UniformHistorical.to_string(), "uniform_historical");
    }
}
