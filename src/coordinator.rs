//! League coordinator.
//!
//! The [`Coordinator`] is the single writer of a [`League`]. Every inbound event
//! (greetings, job results, player announcements, shutdown) is funneled into one
//! [`Mailbox`] and handled to completion before the next one, so the league never sees
//! concurrent mutation.
//!
//! | Event              | Reaction                                                          |
//! |--------------------|-------------------------------------------------------------------|
//! | actor greeting     | generate a job for the actor, send it on the actor's job topic    |
//! | job result         | update the payoff table, then send the same actor its next job     |
//! | player snapshot    | move the active player to the new checkpoint, freeze a historical |
//! | shutdown           | stop, optionally saving the league                                |
//!
//! Each actor has at most one job outstanding: it only receives a new one after
//! greeting or returning a result. When an actor timeout is configured, actors whose job
//! is outstanding for longer are evicted: their job is not dispatched again, and their
//! results are dropped until they greet again.
//!
//! Errors tied to one message (unknown player, malformed payload, ...) are logged and
//! the message dropped. Errors that leave the league unable to serve jobs, and events the
//! coordinator does not know, stop the loop.

use std::{
    collections::HashMap,
    thread::JoinHandle,
    time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{debug, error, info, instrument, warn};

use crate::configuration::Configuration;
use crate::error::LeagueError;
use crate::job::JobResult;
use crate::league::League;
use crate::player::{ActorId, PlayerMeta};
use crate::transport::{
    job_topic, Mailbox, Message, Transport, GREETING_TOPIC, JOB_RESULT_TOPIC, PLAYER_META_TOPIC,
    SHUTDOWN_TOPIC,
};

const MIN_TICK: Duration = Duration::from_millis(10);
const MAX_TICK: Duration = Duration::from_secs(1);

/// What the event loop does after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct Coordinator<T: Transport> {
    league: League,
    transport: T,
    mailbox: Mailbox,
    config: Configuration,
    outstanding: HashMap<ActorId, Instant>,
    results: u64,
}

impl<T: Transport> Coordinator<T> {
    /// Subscribes to the coordinator topics.
    ///
    /// # Errors
    /// If the league has no active player: a coordinator that cannot serve jobs must
    /// not start.
    #[instrument(skip_all)]
    pub fn new(league: League, transport: T, config: Configuration) -> anyhow::Result<Self> {
        league
            .validate()
            .context("league cannot serve jobs, refusing to start")?;

        let mailbox = Mailbox::new();
        for topic in [
            GREETING_TOPIC,
            JOB_RESULT_TOPIC,
            PLAYER_META_TOPIC,
            SHUTDOWN_TOPIC,
        ] {
            transport.subscribe(topic, &mailbox)?;
        }
        info!(players = ?league.active_ids(), ?config);

        Ok(Self {
            league,
            transport,
            mailbox,
            config,
            outstanding: HashMap::new(),
            results: 0,
        })
    }

    /// Handles one event to completion.
    ///
    /// Recoverable errors are logged and swallowed; only fatal ones are returned.
    pub fn handle(&mut self, message: Message) -> anyhow::Result<Flow> {
        match message {
            Message::Greeting { actor_id } => self.on_actor_greeting(actor_id)?,
            Message::JobResult(result) => self.on_actor_job(result)?,
            Message::PlayerSnapshot(meta) => self.on_learner_player_meta(meta)?,
            Message::Shutdown => return Ok(Flow::Stop),
            other => {
                return Err(LeagueError::UnexpectedEvent(other.kind().to_string()).into())
            }
        }
        Ok(Flow::Continue)
    }

    fn on_actor_greeting(&mut self, actor_id: ActorId) -> anyhow::Result<()> {
        if actor_id.is_empty() {
            warn!("greeting without actor id dropped");
            return Ok(());
        }
        if self.outstanding.contains_key(&actor_id) {
            debug!(%actor_id, "greeted again, previous job abandoned");
        }
        self.dispatch(actor_id)
    }

    fn on_actor_job(&mut self, mut result: JobResult) -> anyhow::Result<()> {
        let Some(actor_id) = result.job.actor_id.clone() else {
            recoverable::<()>(Err(LeagueError::InvalidJob(format!(
                "result of job {} has no actor",
                result.job.job_id
            ))))?;
            return Ok(());
        };
        if self.outstanding.remove(&actor_id).is_none() {
            // evicted, or never greeted: it is re-admitted by its next greeting
            warn!(
                %actor_id,
                job = result.job.job_id,
                "result from an actor with no outstanding job dropped"
            );
            return Ok(());
        }

        // the meta is applied on its own, the outcome counts even if it is rejected
        let meta = result.player_meta.take();
        if recoverable(self.league.apply_result(result))?.is_some() {
            self.results += 1;
            self.report();
        }
        if let Some(meta) = meta {
            self.on_learner_player_meta(meta)?;
        }

        // the actor is idle again
        self.dispatch(actor_id)
    }

    fn on_learner_player_meta(&mut self, meta: PlayerMeta) -> anyhow::Result<()> {
        recoverable(self.league.apply_player_meta(meta))?;
        Ok(())
    }

    fn dispatch(&mut self, actor_id: ActorId) -> anyhow::Result<()> {
        let job = self.league.generate_job_for(&actor_id)?;
        debug!(%actor_id, %job, rationale = job.rationale.as_deref().unwrap_or_default());

        let delivered = self
            .transport
            .publish(&job_topic(&actor_id), &Message::Job {
                actor_id: actor_id.clone(),
                job,
            })?;
        if delivered == 0 {
            warn!(%actor_id, "no actor listening, job lost");
        }
        self.outstanding.insert(actor_id, Instant::now());
        Ok(())
    }

    /// Forgets actors whose job is outstanding for longer than the actor timeout.
    fn evict_stalled(&mut self) {
        let Some(timeout) = self.config.actor_timeout else {
            return;
        };
        self.outstanding.retain(|actor_id, since| {
            let alive = since.elapsed() <= timeout;
            if !alive {
                warn!(%actor_id, "actor timed out, evicted");
            }
            alive
        });
    }

    fn report(&self) {
        let interval = self.config.report_interval;
        if interval == 0 || self.results % interval != 0 {
            return;
        }
        let registry = self.league.registry();
        info!(
            results = self.results,
            jobs = self.league.jobs_generated(),
            active = registry.active_count(),
            historical = registry.historical_count(),
            pairs = self.league.payoff().len(),
            "league progress"
        );
        if self.config.verbose {
            print_progress(&self.league, self.results);
        }
    }

    /// Runs the event loop until a shutdown message or a fatal error.
    ///
    /// Returns the league, saved first if a checkpoint path is configured.
    #[instrument(skip_all)]
    pub fn run(mut self) -> anyhow::Result<League> {
        info!("coordinator started");
        if let Err(e) = self.event_loop() {
            error!("coordinator stopped: {e:#}");
            return Err(e);
        }

        info!(
            results = self.results,
            jobs = self.league.jobs_generated(),
            "coordinator stopped"
        );
        if let Some(path) = &self.config.checkpoint_path {
            self.league.save(path)?;
        }
        Ok(self.league)
    }

    /// How often the loop wakes up to evict stalled actors, if at all.
    fn tick(&self) -> Option<Duration> {
        self.config
            .actor_timeout
            .map(|timeout| timeout.clamp(MIN_TICK, MAX_TICK))
    }

    fn event_loop(&mut self) -> anyhow::Result<()> {
        let tick = self.tick();
        loop {
            let received = match tick {
                Some(tick) => self.mailbox.recv_timeout(tick),
                None => self.mailbox.recv().map(Some),
            };
            let message = match received {
                Ok(message) => message,
                Err(e) => match e.downcast_ref::<LeagueError>().map(LeagueError::is_fatal) {
                    Some(false) => {
                        warn!("message dropped: {e:#}");
                        None
                    }
                    Some(true) => return Err(e),
                    None => return Err(LeagueError::UnexpectedEvent(format!("{e:#}")).into()),
                },
            };

            if let Some(message) = message {
                if self.handle(message)? == Flow::Stop {
                    return Ok(());
                }
            }
            self.evict_stalled();
        }
    }

    /// Runs the event loop on its own thread.
    pub fn spawn(self) -> anyhow::Result<JoinHandle<anyhow::Result<League>>>
    where
        T: 'static,
    {
        std::thread::Builder::new()
            .name("league-coordinator".into())
            .spawn(move || self.run())
            .context("could not spawn coordinator thread")
    }

    pub fn league(&self) -> &League {
        &self.league
    }

    /// Whether `actor_id` currently holds a job.
    pub fn is_outstanding(&self, actor_id: &ActorId) -> bool {
        self.outstanding.contains_key(actor_id)
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}

/// Logs and swallows recoverable errors, propagates fatal ones.
fn recoverable<V>(result: Result<V, LeagueError>) -> anyhow::Result<Option<V>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_fatal() => Err(e.into()),
        Err(e) => {
            warn!("message dropped: {e}");
            Ok(None)
        }
    }
}

fn print_progress(league: &League, results: u64) {
    // clear line, green header, default, start of line
    println!(
        "\x1b[2K\x1b[32m{results} results:\x1b[39m {} active, {} historical, {} jobs\x1b[0G",
        league.registry().active_count(),
        league.registry().historical_count(),
        league.jobs_generated()
    );
}
