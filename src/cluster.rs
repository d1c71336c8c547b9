//! Whole league in one process.
//!
//! [`LocalCluster`] lays the [`Topology`] out on threads sharing a [`LocalRouter`]:
//! the coordinator node owns the [`League`], actor node `n` plays as actor `"n"` and
//! learner node `n` trains active player `n % active_players`.

use std::{
    thread::JoinHandle,
    time::{Duration, Instant},
};

use anyhow::anyhow;
use tracing::{error, info, instrument};

use crate::actor::{EpisodeRunner, LeagueActor, PolicyProvider};
use crate::configuration::Configuration;
use crate::coordinator::Coordinator;
use crate::learner::{LeagueLearner, Trainer};
use crate::league::League;
use crate::player::{ActorId, PlayerId};
use crate::topology::{Topology, WorkerRole};
use crate::transport::{
    broadcast_shutdown, LocalRouter, Mailbox, Message, Transport, JOB_RESULT_TOPIC,
};

const POLL: Duration = Duration::from_millis(100);

pub struct LocalCluster {
    router: LocalRouter,
    topology: Topology,
    coordinator: JoinHandle<anyhow::Result<League>>,
    actors: Vec<JoinHandle<anyhow::Result<u64>>>,
    learners: Vec<JoinHandle<anyhow::Result<u64>>>,
}

impl LocalCluster {
    /// Starts every node of the topology.
    ///
    /// The topology comes from `config` (`LEAGUE_WORKERS`) or defaults to
    /// [`Topology::for_league`]. `actor_parts` builds the collaborators of each actor,
    /// `make_trainer` the trainer of each learner. Learners announce a checkpoint every
    /// `snapshot_interval` steps.
    #[instrument(skip_all)]
    pub fn launch<P, R, Tr>(
        config: Configuration,
        league: League,
        mut actor_parts: impl FnMut(&ActorId) -> (P, R),
        mut make_trainer: impl FnMut(&PlayerId) -> Tr,
        snapshot_interval: u64,
    ) -> anyhow::Result<Self>
    where
        P: PolicyProvider + 'static,
        R: EpisodeRunner<Policy = P::Policy> + 'static,
        Tr: Trainer + 'static,
    {
        let topology = match &config.workers {
            Some(workers) => workers.parse()?,
            None => Topology::for_league(league.active_ids().len()),
        };
        info!(%topology);

        let router = LocalRouter::new();
        let mut actors = Vec::new();
        let mut learners = Vec::new();
        for (node_id, role) in topology.nodes() {
            match role {
                WorkerRole::Coordinator => {}
                WorkerRole::Actor => {
                    let actor_id = ActorId::new(node_id.to_string());
                    let (provider, runner) = actor_parts(&actor_id);
                    actors.push(LeagueActor::new(actor_id, router.clone(), provider, runner)?);
                }
                WorkerRole::Learner => {
                    let player = league.learner_player(node_id)?;
                    let trainer = make_trainer(&player);
                    learners.push(LeagueLearner::new(
                        player,
                        router.clone(),
                        trainer,
                        snapshot_interval,
                    )?);
                }
            }
        }

        // the coordinator listens before any actor greets
        let coordinator = Coordinator::new(league, router.clone(), config)?.spawn()?;
        let actors = actors
            .into_iter()
            .map(LeagueActor::spawn)
            .collect::<anyhow::Result<Vec<_>>>()?;
        let learners = learners
            .into_iter()
            .map(LeagueLearner::spawn)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            router,
            topology,
            coordinator,
            actors,
            learners,
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn router(&self) -> &LocalRouter {
        &self.router
    }

    /// Lets the league run for `duration`, then shuts it down.
    pub fn run_for(self, duration: Duration) -> anyhow::Result<League> {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline && !self.coordinator.is_finished() {
            std::thread::sleep(POLL.min(deadline.saturating_duration_since(Instant::now())));
        }
        self.shutdown()
    }

    /// Waits for `results` more job results, then shuts the league down.
    ///
    /// Returns early if the coordinator stops on its own.
    pub fn run_until(self, results: u64) -> anyhow::Result<League> {
        let monitor = Mailbox::new();
        self.router.subscribe(JOB_RESULT_TOPIC, &monitor)?;
        let mut seen = 0;
        while seen < results && !self.coordinator.is_finished() {
            if let Some(Message::JobResult(_)) = monitor.recv_timeout(POLL)? {
                seen += 1;
            }
        }
        self.shutdown()
    }

    /// Broadcasts shutdown and joins every node. Returns the coordinator's league.
    ///
    /// # Errors
    /// The first node error, in actor, learner, coordinator order. Every node is joined
    /// before it is returned.
    pub fn shutdown(self) -> anyhow::Result<League> {
        broadcast_shutdown(&self.router)?;
        let mut first_error = None;
        for handle in self.actors {
            match join(handle, "actor") {
                Ok(jobs) => info!(jobs, "actor joined"),
                Err(e) => {
                    error!("actor failed: {e:#}");
                    first_error.get_or_insert(e);
                }
            }
        }
        for handle in self.learners {
            match join(handle, "learner") {
                Ok(steps) => info!(steps, "learner joined"),
                Err(e) => {
                    error!("learner failed: {e:#}");
                    first_error.get_or_insert(e);
                }
            }
        }
        let league = join(self.coordinator, "coordinator");
        match first_error {
            Some(e) => Err(e),
            None => league,
        }
    }
}

fn join<V>(handle: JoinHandle<anyhow::Result<V>>, role: &str) -> anyhow::Result<V> {
    handle
        .join()
        .map_err(|_| anyhow!("{role} thread panicked"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::LeagueConfigBuilder;
    use crate::job::{Job, Outcome};
    use crate::player::CheckpointRef;

    struct Unit;

    impl PolicyProvider for Unit {
        type Policy = ();

        fn load(&mut self, _: &PlayerId, _: &CheckpointRef) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Draws;

    impl EpisodeRunner for Draws {
        type Policy = ();

        fn run_episode(&mut self, _: &Job, _: Vec<()>) -> anyhow::Result<Outcome> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(Outcome::Draw)
        }
    }

    struct Slow;

    impl Trainer for Slow {
        fn train_step(&mut self, player: &PlayerId, train_iter: u64) -> anyhow::Result<CheckpointRef> {
            std::thread::sleep(Duration::from_millis(2));
            Ok(CheckpointRef::new(format!("{player}@{train_iter}")))
        }
    }

    #[test]
    fn runs_and_stops() {
        let league = League::new(
            LeagueConfigBuilder::new()
                .with_active_players(["a", "b"])
                .build()
                .unwrap(),
        )
        .unwrap();
        let config = Configuration::new()
            .with_verbose(false)
            .with_workers("league_coordinator:1,league_actor:2,league_learner:2");

        let cluster =
            LocalCluster::launch(config, league, |_| (Unit, Draws), |_| Slow, 5).unwrap();
        assert_eq!(cluster.topology().len(), 5);
        let league = cluster.run_until(20).unwrap();

        assert!(league.payoff().results_applied() >= 20);
        assert!(league.jobs_generated() >= league.payoff().results_applied());
        assert_eq!(league.registry().active_count(), 2);
    }

    struct Broken;

    impl Trainer for Broken {
        fn train_step(&mut self, _: &PlayerId, _: u64) -> anyhow::Result<CheckpointRef> {
            anyhow::bail!("out of memory")
        }
    }

    #[test]
    fn failed_learner_does_not_skip_other_nodes() {
        let path = std::env::temp_dir().join(format!("league_cluster_{}.json", std::process::id()));
        let league = League::new(
            LeagueConfigBuilder::new()
                .with_active_players(["a", "b"])
                .build()
                .unwrap(),
        )
        .unwrap();
        let config = Configuration::new()
            .with_verbose(false)
            .with_checkpoint_path(&path)
            .with_workers("league_coordinator:1,league_actor:1,league_learner:1");

        let cluster =
            LocalCluster::launch(config, league, |_| (Unit, Draws), |_| Broken, 5).unwrap();
        let err = cluster.run_for(Duration::from_millis(50)).err().expect("learner failed");
        assert!(format!("{err:#}").contains("out of memory"));
        // the coordinator was joined: it saved the league before the error came back
        assert!(path.exists());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn bad_topology_fails_launch() {
        let league = League::new(
            LeagueConfigBuilder::new()
                .with_active_players(["a"])
                .build()
                .unwrap(),
        )
        .unwrap();
        let config = Configuration::new().with_workers("league_actor:2");
        assert!(LocalCluster::launch(config, league, |_| (Unit, Draws), |_| Slow, 5).is_err());
    }
}
