//! Actor role: plays the jobs the coordinator addresses to it.
//!
//! The loop is: greet, wait for a job on the actor's own topic, load one policy per
//! participant, run the episode, publish the result, wait again. An actor never holds
//! more than one job, so it only greets once at startup and after a failed episode.

use std::fmt::Debug;

use anyhow::{bail, Context};
use tracing::{debug, error, info, instrument, warn};

use crate::job::{Job, JobResult, Outcome};
use crate::player::{ActorId, CheckpointRef, PlayerId};
use crate::transport::{
    job_topic, Mailbox, Message, Transport, GREETING_TOPIC, JOB_RESULT_TOPIC, SHUTDOWN_TOPIC,
};

/// Turns a checkpoint into something able to act.
pub trait PolicyProvider: Send {
    type Policy;

    fn load(&mut self, player: &PlayerId, checkpoint: &CheckpointRef)
        -> anyhow::Result<Self::Policy>;
}

/// Plays one episode of a job.
///
/// `policies[i]` plays for `job.players[i]`; the returned outcome is expressed from the
/// point of view of `job.players[0]`.
pub trait EpisodeRunner: Send {
    type Policy;

    fn run_episode(&mut self, job: &Job, policies: Vec<Self::Policy>) -> anyhow::Result<Outcome>;
}

pub struct LeagueActor<T, P, R> {
    actor_id: ActorId,
    transport: T,
    mailbox: Mailbox,
    provider: P,
    runner: R,
    jobs_done: u64,
}

impl<T, P, R> LeagueActor<T, P, R>
where
    T: Transport,
    P: PolicyProvider,
    R: EpisodeRunner<Policy = P::Policy>,
{
    /// Subscribes to the actor's job topic and to shutdown.
    ///
    /// # Errors
    /// If `actor_id` is empty: an actor without identity cannot be addressed.
    pub fn new(actor_id: ActorId, transport: T, provider: P, runner: R) -> anyhow::Result<Self> {
        if actor_id.is_empty() {
            bail!("an actor needs a non-empty id");
        }
        let mailbox = Mailbox::new();
        transport.subscribe(&job_topic(&actor_id), &mailbox)?;
        transport.subscribe(SHUTDOWN_TOPIC, &mailbox)?;
        Ok(Self {
            actor_id,
            transport,
            mailbox,
            provider,
            runner,
            jobs_done: 0,
        })
    }

    pub fn actor_id(&self) -> &ActorId {
        &self.actor_id
    }

    fn greet(&self) -> anyhow::Result<()> {
        let delivered = self.transport.publish(
            GREETING_TOPIC,
            &Message::Greeting {
                actor_id: self.actor_id.clone(),
            },
        )?;
        if delivered == 0 {
            warn!(actor_id = %self.actor_id, "no coordinator listening");
        }
        Ok(())
    }

    /// Plays jobs until shutdown. Returns the number of jobs completed.
    #[instrument(skip_all, fields(actor_id = %self.actor_id))]
    pub fn run(mut self) -> anyhow::Result<u64> {
        self.greet()?;
        loop {
            match self.mailbox.recv()? {
                Message::Job { actor_id, job } => {
                    if actor_id != self.actor_id {
                        warn!(%actor_id, %job, "job addressed to another actor ignored");
                        continue;
                    }
                    match self.play(&job) {
                        Ok(outcome) => {
                            self.transport.publish(
                                JOB_RESULT_TOPIC,
                                &Message::JobResult(JobResult::new(job, outcome)),
                            )?;
                            self.jobs_done += 1;
                        }
                        Err(e) => {
                            // the job is abandoned, ask for another one
                            error!("job {job} failed: {e:#}");
                            self.greet()?;
                        }
                    }
                }
                Message::Shutdown => break,
                other => bail!("actor cannot handle {}", other.kind()),
            }
        }
        info!(jobs = self.jobs_done, "actor stopped");
        Ok(self.jobs_done)
    }

    fn play(&mut self, job: &Job) -> anyhow::Result<Outcome> {
        job.check_shape()?;
        if job.checkpoints.len() != job.players.len() {
            bail!(
                "{} checkpoints for {} players",
                job.checkpoints.len(),
                job.players.len()
            );
        }
        let policies = job
            .players
            .iter()
            .zip(&job.checkpoints)
            .map(|(player, checkpoint)| {
                self.provider
                    .load(player, checkpoint)
                    .with_context(|| format!("could not load {player} at {checkpoint}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let outcome = self.runner.run_episode(job, policies)?;
        if let Outcome::Scores(scores) = &outcome {
            // JSON has no NaN or infinity
            if scores.iter().any(|score| !score.is_finite()) {
                bail!("non-finite scores {scores:?}");
            }
        }
        debug!(%job, ?outcome);
        Ok(outcome)
    }

    /// Runs the actor loop on its own thread.
    pub fn spawn(self) -> anyhow::Result<std::thread::JoinHandle<anyhow::Result<u64>>>
    where
        T: 'static,
        P: 'static,
        R: 'static,
    {
        std::thread::Builder::new()
            .name(format!("league-actor-{}", self.actor_id))
            .spawn(move || self.run())
            .context("could not spawn actor thread")
    }
}

impl<T, P, R> Debug for LeagueActor<T, P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeagueActor")
            .field("actor_id", &self.actor_id)
            .field("jobs_done", &self.jobs_done)
            .finish()
    }
}
