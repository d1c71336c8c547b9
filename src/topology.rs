//! Assignment of league roles to nodes.
//!
//! A deployment is a list of `role:count` entries laid out on consecutive node ids:
//! `"league_coordinator:1,league_actor:3,league_learner:2"` gives node 0 the
//! coordinator, nodes 1 to 3 the actors and nodes 4 and 5 the learners. There is
//! exactly one coordinator.

use std::{fmt::Display, str::FromStr};

use anyhow::{bail, Context};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    Coordinator,
    Actor,
    Learner,
}

impl FromStr for WorkerRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "league_coordinator" => Ok(WorkerRole::Coordinator),
            "league_actor" => Ok(WorkerRole::Actor),
            "league_learner" => Ok(WorkerRole::Learner),
            other => bail!("Undefined worker type: {other:?}"),
        }
    }
}

impl Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            WorkerRole::Coordinator => "league_coordinator",
            WorkerRole::Actor => "league_actor",
            WorkerRole::Learner => "league_learner",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    workers: Vec<(WorkerRole, usize)>,
}

impl Topology {
    /// # Errors
    /// Unless there is exactly one coordinator.
    pub fn new(workers: Vec<(WorkerRole, usize)>) -> anyhow::Result<Self> {
        let topology = Self { workers };
        let coordinators = topology.count(WorkerRole::Coordinator);
        if coordinators != 1 {
            bail!("a league needs exactly one coordinator, got {coordinators}");
        }
        Ok(topology)
    }

    /// One coordinator, one actor per physical core and one learner per active player.
    pub fn for_league(active_players: usize) -> Self {
        Self {
            workers: vec![
                (WorkerRole::Coordinator, 1),
                (WorkerRole::Actor, num_cpus::get_physical().max(1)),
                (WorkerRole::Learner, active_players),
            ],
        }
    }

    /// Total number of nodes.
    pub fn len(&self) -> usize {
        self.workers.iter().map(|(_, n)| n).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, role: WorkerRole) -> usize {
        self.workers
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, n)| n)
            .sum()
    }

    /// # Errors
    /// If `node_id` is outside the deployment.
    pub fn role_of(&self, node_id: usize) -> anyhow::Result<WorkerRole> {
        self.nodes()
            .find_map(|(id, role)| (id == node_id).then_some(role))
            .with_context(|| format!("node {node_id} is outside a {} node league", self.len()))
    }

    /// `(node_id, role)` of every node, in order.
    pub fn nodes(&self) -> impl Iterator<Item = (usize, WorkerRole)> + '_ {
        self.workers
            .iter()
            .flat_map(|&(role, n)| std::iter::repeat(role).take(n))
            .enumerate()
    }
}

impl FromStr for Topology {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let workers = s
            .split(',')
            .filter(|entry| !entry.trim().is_empty())
            .map(|entry| -> anyhow::Result<(WorkerRole, usize)> {
                let (role, count) = entry.split_once(':').unwrap_or((entry, "1"));
                let count = count
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("invalid worker count in {entry:?}"))?;
                Ok((role.parse()?, count))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Self::new(workers)
    }
}

impl Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self
            .workers
            .iter()
            .map(|(role, n)| format!("{role}:{n}"))
            .collect::<Vec<_>>();
        write!(f, "{}", entries.join(","))
    }
}
