//! Player identities and the descriptors learners send about them.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Stable identity of a player, active or historical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Wraps any string-like value as a player identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identity of an actor process, used to address its job topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque reference to learned parameters (a path, an URI, a blob key...).
///
/// The league never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointRef(String);

impl CheckpointRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CheckpointRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CheckpointRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerKind {
    /// Still trained by a learner, its checkpoint keeps moving.
    Active,
    /// Frozen snapshot of an active player.
    Historical,
}

/// A member of the league population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub kind: PlayerKind,
    pub checkpoint: CheckpointRef,
    /// Training progress of the checkpoint (learner iteration counter).
    pub train_iter: u64,
    /// Active player a historical snapshot was taken from.
    pub parent: Option<PlayerId>,
}

impl Player {
    /// A fresh active player with no checkpoint yet.
    pub fn active(id: impl Into<PlayerId>) -> Self {
        Self {
            id: id.into(),
            kind: PlayerKind::Active,
            checkpoint: CheckpointRef::default(),
            train_iter: 0,
            parent: None,
        }
    }

    #[must_use]
    pub fn with_checkpoint(self, checkpoint: impl Into<CheckpointRef>) -> Self {
        Self {
            checkpoint: checkpoint.into(),
            ..self
        }
    }

    pub fn is_active(&self) -> bool {
        self.kind == PlayerKind::Active
    }

    pub fn is_historical(&self) -> bool {
        self.kind == PlayerKind::Historical
    }
}

impl From<String> for PlayerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<String> for CheckpointRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Checkpoint announcement sent by a learner.
///
/// Consumed once by the coordinator: it refreshes the active player and freezes a
/// historical copy at the announced checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerMeta {
    pub player_id: PlayerId,
    pub checkpoint: CheckpointRef,
    pub train_iter: u64,
}

impl PlayerMeta {
    pub fn new(
        player_id: impl Into<PlayerId>,
        checkpoint: impl Into<CheckpointRef>,
        train_iter: u64,
    ) -> Self {
        Self {
            player_id: player_id.into(),
            checkpoint: checkpoint.into(),
            train_iter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_strings() {
        let meta = PlayerMeta::new("main", "ckpt/main_10.bin", 10);
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(
            json,
            r#"{"player_id":"main","checkpoint":"ckpt/main_10.bin","train_iter":10}"#
        );
    }

    #[test]
    fn active_player_defaults() {
        let player = Player::active("main").with_checkpoint("c0");
        assert!(player.is_active());
        assert!(!player.is_historical());
        assert_eq!(player.checkpoint.as_str(), "c0");
        assert_eq!(player.train_iter, 0);
        assert!(player.parent.is_none());
    }
}
