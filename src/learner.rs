//! Learner role: trains one active player and announces its checkpoints.
//!
//! Every `snapshot_interval` training steps the learner publishes a
//! [`PlayerMeta`] on the player meta topic; the coordinator then moves the active
//! player to that checkpoint and freezes a historical copy of it.

use anyhow::{bail, Context};
use tracing::{info, instrument, trace};

use crate::player::{CheckpointRef, PlayerId, PlayerMeta};
use crate::transport::{Mailbox, Message, Transport, PLAYER_META_TOPIC, SHUTDOWN_TOPIC};

/// Optimisation step of a learner.
pub trait Trainer: Send {
    /// Runs training iteration `train_iter` of `player` and returns the resulting checkpoint.
    fn train_step(&mut self, player: &PlayerId, train_iter: u64) -> anyhow::Result<CheckpointRef>;
}

pub struct LeagueLearner<T, Tr> {
    player_id: PlayerId,
    transport: T,
    mailbox: Mailbox,
    trainer: Tr,
    snapshot_interval: u64,
    train_iter: u64,
}

impl<T: Transport, Tr: Trainer> LeagueLearner<T, Tr> {
    /// # Errors
    /// If `snapshot_interval` is 0.
    pub fn new(
        player_id: PlayerId,
        transport: T,
        trainer: Tr,
        snapshot_interval: u64,
    ) -> anyhow::Result<Self> {
        if snapshot_interval == 0 {
            bail!("snapshot interval must be at least 1");
        }
        let mailbox = Mailbox::new();
        transport.subscribe(SHUTDOWN_TOPIC, &mailbox)?;
        Ok(Self {
            player_id,
            transport,
            mailbox,
            trainer,
            snapshot_interval,
            train_iter: 0,
        })
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    /// One training step, announcing the checkpoint when the interval is reached.
    pub fn step(&mut self) -> anyhow::Result<Option<PlayerMeta>> {
        let checkpoint = self
            .trainer
            .train_step(&self.player_id, self.train_iter)
            .with_context(|| format!("training {} failed", self.player_id))?;
        self.train_iter += 1;
        trace!(player = %self.player_id, train_iter = self.train_iter);

        if self.train_iter % self.snapshot_interval != 0 {
            return Ok(None);
        }
        let meta = PlayerMeta::new(self.player_id.clone(), checkpoint, self.train_iter);
        self.transport
            .publish(PLAYER_META_TOPIC, &Message::PlayerSnapshot(meta.clone()))?;
        Ok(Some(meta))
    }

    /// Trains until shutdown. Returns the number of training steps done.
    #[instrument(skip_all, fields(player = %self.player_id))]
    pub fn run(mut self) -> anyhow::Result<u64> {
        loop {
            match self.mailbox.try_recv()? {
                Some(Message::Shutdown) => break,
                Some(other) => bail!("learner cannot handle {}", other.kind()),
                None => {}
            }
            if let Some(meta) = self.step()? {
                info!(checkpoint = %meta.checkpoint, train_iter = meta.train_iter, "checkpoint announced");
            }
        }
        info!(steps = self.train_iter, "learner stopped");
        Ok(self.train_iter)
    }

    /// Runs the learner loop on its own thread.
    pub fn spawn(self) -> anyhow::Result<std::thread::JoinHandle<anyhow::Result<u64>>>
    where
        T: 'static,
        Tr: 'static,
    {
        std::thread::Builder::new()
            .name(format!("league-learner-{}", self.player_id))
            .spawn(move || self.run())
            .context("could not spawn learner thread")
    }
}
