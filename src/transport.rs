//! Addressed publish/subscribe between league processes.
//!
//! A topic routes a [`Message`] to every [`Mailbox`] subscribed to it. Jobs are
//! addressed by giving each actor its own topic ([`job_topic`]), so only the named
//! actor ever sees them. Messages cross the transport as JSON bytes and are decoded by
//! the receiving mailbox.
//!
//! Delivery is best effort: a message published on a topic without subscriber is
//! dropped, and nothing is retried or deduplicated.

use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::LeagueError;
use crate::job::{Job, JobResult};
use crate::player::{ActorId, PlayerMeta};

/// Actor -> coordinator: "I am idle, give me work".
pub const GREETING_TOPIC: &str = "league_actor_greeting";
/// Actor -> coordinator: a finished job.
pub const JOB_RESULT_TOPIC: &str = "league_actor_job";
/// Learner -> coordinator: checkpoint announcements.
pub const PLAYER_META_TOPIC: &str = "league_learner_player_meta";
/// Broadcast to every process.
pub const SHUTDOWN_TOPIC: &str = "league_shutdown";

/// Topic on which `actor_id`, and only it, receives its jobs.
pub fn job_topic(actor_id: &ActorId) -> String {
    format!("league_job_actor_{actor_id}")
}

const KINDS: [&str; 5] = ["greeting", "job", "job_result", "player_snapshot", "shutdown"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Message {
    Greeting { actor_id: ActorId },
    Job { actor_id: ActorId, job: Job },
    JobResult(JobResult),
    PlayerSnapshot(PlayerMeta),
    Shutdown,
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Greeting { .. } => "greeting",
            Message::Job { .. } => "job",
            Message::JobResult(_) => "job_result",
            Message::PlayerSnapshot(_) => "player_snapshot",
            Message::Shutdown => "shutdown",
        }
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        serde_json::to_vec(self).with_context(|| format!("could not encode {}", self.kind()))
    }

    /// Decodes a message received from the transport.
    ///
    /// # Errors
    /// [`LeagueError::UnexpectedEvent`] if the event tag is missing or unknown, and
    /// [`LeagueError::MalformedMessage`] if a known event carries a payload that does not
    /// fit it (non-finite scores are encoded as `null`, for instance).
    pub fn decode(bytes: &[u8]) -> anyhow::Result<Message> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).context("could not decode message")?;
        let event = value
            .get("event")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("<none>")
            .to_string();
        if !KINDS.contains(&event.as_str()) {
            return Err(LeagueError::UnexpectedEvent(event).into());
        }
        serde_json::from_value(value).map_err(|e| {
            LeagueError::MalformedMessage {
                event,
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Inbox of one subscriber. Several topics may feed the same mailbox, which then
/// serializes them into a single queue.
#[derive(Debug)]
pub struct Mailbox {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl Default for Mailbox {
    fn default() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn sender(&self) -> Sender<Vec<u8>> {
        self.tx.clone()
    }

    /// Blocks until a message arrives.
    pub fn recv(&self) -> anyhow::Result<Message> {
        let bytes = self.rx.recv().context("mailbox closed")?;
        Message::decode(&bytes)
    }

    /// `Ok(None)` if nothing arrived within `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> anyhow::Result<Option<Message>> {
        match self.rx.recv_timeout(timeout) {
            Ok(bytes) => Message::decode(&bytes).map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("mailbox closed")),
        }
    }

    /// `Ok(None)` if the mailbox is empty.
    pub fn try_recv(&self) -> anyhow::Result<Option<Message>> {
        match self.rx.try_recv() {
            Ok(bytes) => Message::decode(&bytes).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(anyhow!("mailbox closed")),
        }
    }
}

/// Addressed publish/subscribe primitive.
pub trait Transport: Send + Sync {
    /// Sends `message` to every mailbox subscribed to `topic`, returning how many were reached.
    fn publish(&self, topic: &str, message: &Message) -> anyhow::Result<usize>;

    /// Routes `topic` into `mailbox` until the mailbox is dropped.
    fn subscribe(&self, topic: &str, mailbox: &Mailbox) -> anyhow::Result<()>;
}

/// In-process router, cheap to clone (clones share the same routing table).
#[derive(Debug, Clone, Default)]
pub struct LocalRouter {
    routes: Arc<Mutex<HashMap<String, Vec<Sender<Vec<u8>>>>>>,
}

impl LocalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live subscriptions on `topic`.
    pub fn subscribers(&self, topic: &str) -> usize {
        self.routes
            .lock()
            .map(|routes| routes.get(topic).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl Transport for LocalRouter {
    fn publish(&self, topic: &str, message: &Message) -> anyhow::Result<usize> {
        let bytes = message.encode()?;
        let mut routes = self
            .routes
            .lock()
            .map_err(|_| anyhow!("router lock poisoned"))?;
        let Some(senders) = routes.get_mut(topic) else {
            trace!(topic, kind = message.kind(), "no subscriber, message dropped");
            return Ok(0);
        };
        // dropped mailboxes unsubscribe themselves here
        senders.retain(|tx| tx.send(bytes.clone()).is_ok());
        trace!(topic, kind = message.kind(), delivered = senders.len());
        Ok(senders.len())
    }

    fn subscribe(&self, topic: &str, mailbox: &Mailbox) -> anyhow::Result<()> {
        self.routes
            .lock()
            .map_err(|_| anyhow!("router lock poisoned"))?
            .entry(topic.to_string())
            .or_default()
            .push(mailbox.sender());
        Ok(())
    }
}

/// Asks every process of the league to stop.
pub fn broadcast_shutdown(transport: &impl Transport) -> anyhow::Result<usize> {
    transport.publish(SHUTDOWN_TOPIC, &Message::Shutdown)
}
