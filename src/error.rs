//! Error taxonomy of the league core.
//!
//! Errors are either *fatal* (the process is misconfigured and must stop) or
//! *recoverable* (a stale or malformed message, logged and dropped by the coordinator).

use thiserror::Error;

use crate::player::PlayerId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LeagueError {
    #[error("player '{0}' is already registered")]
    DuplicateId(PlayerId),

    #[error("no active player named '{0}'")]
    NotFound(PlayerId),

    #[error("player '{0}' is historical and cannot be updated")]
    NotActive(PlayerId),

    #[error("unknown player '{0}'")]
    UnknownPlayer(PlayerId),

    #[error("league has no active player, cannot generate jobs")]
    NoActivePlayers,

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("unexpected event '{0}' on coordinator")]
    UnexpectedEvent(String),

    #[error("malformed '{event}' message: {reason}")]
    MalformedMessage { event: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl LeagueError {
    /// Whether this error must stop the process instead of being logged and dropped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LeagueError::NoActivePlayers | LeagueError::UnexpectedEvent(_) | LeagueError::Config(_)
        )
    }
}
