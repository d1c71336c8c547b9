//! # Ai League
//!
//! Orchestration core of a self-play league: a population of players trained against
//! each other and against frozen copies of their past selves.
//!
//! It provides:
//! - The league state: a [`PlayerRegistry`](crate::registry::PlayerRegistry) of active
//!   and historical players and a [`PayoffTable`](crate::payoff::PayoffTable) of
//!   pairwise results
//! - Matchmaking through pluggable opponent policies (`OpponentPolicy`)
//! - A single-writer [`Coordinator`](crate::coordinator::Coordinator) event loop that
//!   hands jobs to actors, folds their results back and freezes the checkpoints learners
//!   announce
//! - Actor and learner roles driven by user-provided collaborators
//!   ([`PolicyProvider`](crate::actor::PolicyProvider),
//!   [`EpisodeRunner`](crate::actor::EpisodeRunner), [`Trainer`](crate::learner::Trainer))
//! - An in-process [`LocalCluster`](crate::cluster::LocalCluster) wiring all of it on threads
//!
//! Training, episode simulation and checkpoint storage are not part of this crate: the
//! league only moves opaque [`CheckpointRef`](crate::player::CheckpointRef)s around.
//!
//! # Documentation Overview
//!
//! - For the league aggregate and its persistence, see the [`league`] module.
//! - For the event loop and its error policy, see the [`coordinator`] module.
//! - For configuring the league and the processes, see
//!   [`LeagueConfigBuilder`](crate::configuration::LeagueConfigBuilder) and
//!   [`Configuration`](crate::configuration::Configuration).
//! - For the message topics, see the [`transport`] module.
//!
//! # Usage Example
//!
//! ```no_run
//! use std::time::Duration;
//! use ai_league::prelude::*;
//!
//! struct Checkpoints;
//! impl PolicyProvider for Checkpoints {
//!     type Policy = CheckpointRef;
//!     fn load(&mut self, _: &PlayerId, ckpt: &CheckpointRef) -> anyhow::Result<CheckpointRef> {
//!         Ok(ckpt.clone())
//!     }
//! }
//!
//! struct AlwaysDraw;
//! impl EpisodeRunner for AlwaysDraw {
//!     type Policy = CheckpointRef;
//!     fn run_episode(&mut self, _: &Job, _: Vec<CheckpointRef>) -> anyhow::Result<Outcome> {
//!         Ok(Outcome::Draw)
//!     }
//! }
//!
//! struct NoOp;
//! impl Trainer for NoOp {
//!     fn train_step(&mut self, player: &PlayerId, iter: u64) -> anyhow::Result<CheckpointRef> {
//!         Ok(CheckpointRef::new(format!("{player}_{iter}.ckpt")))
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let league = League::new(
//!         LeagueConfigBuilder::new()
//!             .with_active_players(["main", "exploiter"])
//!             .with_opponent_selection("pfsp".parse()?)
//!             .build()?,
//!     )?;
//!     let config = Configuration::new().with_workers("league_coordinator:1,league_actor:4,league_learner:2");
//!
//!     let cluster = LocalCluster::launch(config, league, |_| (Checkpoints, AlwaysDraw), |_| NoOp, 100)?;
//!     let league = cluster.run_for(Duration::from_secs(10))?;
//!
//!     for row in league.payoff().rows() {
//!         println!("{} VS {}: {:.2}", row.player, row.opponent, row.win_rate);
//!     }
//!     Ok(())
//! }
//! ```

pub use anyhow;

pub mod actor;
pub mod cluster;
pub mod configuration;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod league;
pub mod learner;
mod logger;
pub mod matchmaker;
pub mod payoff;
pub mod player;
pub mod registry;
pub mod topology;
pub mod transport;

pub use logger::init_logger;

/// Commonly used types and traits for quick access.
///
/// ```rust
/// use ai_league::prelude::*;
/// ```
pub mod prelude {
    pub use crate::actor::{EpisodeRunner, LeagueActor, PolicyProvider};
    pub use crate::cluster::LocalCluster;
    pub use crate::configuration::{Configuration, LeagueConfig, LeagueConfigBuilder};
    pub use crate::coordinator::Coordinator;
    pub use crate::error::LeagueError;
    pub use crate::init_logger;
    pub use crate::job::{Job, JobResult, Outcome};
    pub use crate::league::League;
    pub use crate::learner::{LeagueLearner, Trainer};
    pub use crate::matchmaker::OpponentSelection;
    pub use crate::player::{ActorId, CheckpointRef, Player, PlayerId, PlayerMeta};
    pub use crate::transport::{LocalRouter, Mailbox, Message, Transport};
}
