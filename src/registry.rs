//! Population of players, active and historical.
//!
//! Players are kept in insertion order; ids are looked up through a side index.
//! Active players are never removed. Historical players are only removed by
//! [`PlayerRegistry::evict_oldest_historical`] when a retention cap is configured.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::error::LeagueError;
use crate::player::{CheckpointRef, Player, PlayerId, PlayerKind};

#[derive(Debug, Clone, Default)]
pub struct PlayerRegistry {
    players: Vec<Player>,
    index: HashMap<PlayerId, usize>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new active player.
    ///
    /// # Errors
    /// [`LeagueError::DuplicateId`] if the id is already taken.
    pub fn register_active(&mut self, player: Player) -> Result<(), LeagueError> {
        let player = Player {
            kind: PlayerKind::Active,
            parent: None,
            ..player
        };
        self.insert(player)
    }

    /// Freezes `checkpoint` of the active player `active_id` into a new historical player.
    ///
    /// The source active player is left untouched. The historical id is
    /// `{active_id}_{train_iter}_historical`, suffixed with a counter if that id is taken.
    ///
    /// # Errors
    /// [`LeagueError::NotFound`] if `active_id` is unknown, [`LeagueError::NotActive`]
    /// if it names a historical player.
    pub fn promote_to_historical(
        &mut self,
        active_id: &PlayerId,
        checkpoint: CheckpointRef,
        train_iter: u64,
    ) -> Result<PlayerId, LeagueError> {
        self.active(active_id)?;

        let base = format!("{active_id}_{train_iter}_historical");
        let mut id = PlayerId::new(base.clone());
        let mut n = 1;
        while self.index.contains_key(&id) {
            id = PlayerId::new(format!("{base}_{n}"));
            n += 1;
        }

        self.insert(Player {
            id: id.clone(),
            kind: PlayerKind::Historical,
            checkpoint,
            train_iter,
            parent: Some(active_id.clone()),
        })?;
        debug!(%active_id, historical_id = %id, "historical player created");
        Ok(id)
    }

    /// Refreshes the checkpoint of an active player.
    ///
    /// # Errors
    /// [`LeagueError::NotFound`] if the id is unknown, [`LeagueError::NotActive`] if it
    /// names a historical player.
    pub fn update_active_checkpoint(
        &mut self,
        active_id: &PlayerId,
        checkpoint: CheckpointRef,
        train_iter: u64,
    ) -> Result<(), LeagueError> {
        let pos = self.active(active_id)?;
        let player = &mut self.players[pos];
        trace!(%active_id, from = %player.checkpoint, to = %checkpoint, "checkpoint update");
        player.checkpoint = checkpoint;
        player.train_iter = train_iter;
        Ok(())
    }

    /// Active ids, in registration order.
    pub fn list_active_ids(&self) -> Vec<PlayerId> {
        self.players
            .iter()
            .filter(|p| p.is_active())
            .map(|p| p.id.clone())
            .collect()
    }

    /// Every id, in registration order.
    pub fn list_all_ids(&self) -> Vec<PlayerId> {
        self.players.iter().map(|p| p.id.clone()).collect()
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn historical(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.is_historical())
    }

    pub fn get(&self, id: &PlayerId) -> Option<&Player> {
        self.index.get(id).map(|&pos| &self.players[pos])
    }

    pub fn contains(&self, id: &PlayerId) -> bool {
        self.index.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_active()).count()
    }

    pub fn historical_count(&self) -> usize {
        self.players.len() - self.active_count()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Removes the oldest historical player, returning its id.
    pub fn evict_oldest_historical(&mut self) -> Option<PlayerId> {
        let pos = self.players.iter().position(Player::is_historical)?;
        let removed = self.players.remove(pos);
        self.reindex();
        debug!(historical_id = %removed.id, "historical player evicted");
        Some(removed.id)
    }

    /// Restores a player as-is, kind included.
    pub(crate) fn insert(&mut self, player: Player) -> Result<(), LeagueError> {
        if self.index.contains_key(&player.id) {
            return Err(LeagueError::DuplicateId(player.id));
        }
        self.index.insert(player.id.clone(), self.players.len());
        self.players.push(player);
        Ok(())
    }

    fn active(&self, id: &PlayerId) -> Result<usize, LeagueError> {
        let pos = *self
            .index
            .get(id)
            .ok_or_else(|| LeagueError::NotFound(id.clone()))?;
        if !self.players[pos].is_active() {
            return Err(LeagueError::NotActive(id.clone()));
        }
        Ok(pos)
    }

    fn reindex(&mut self) {
        self.index = self
            .players
            .iter()
            .enumerate()
            .map(|(pos, p)| (p.id.clone(), pos))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(ids: &[&str]) -> PlayerRegistry {
        let mut registry = PlayerRegistry::new();
        for id in ids {
            registry
                .register_active(Player::active(*id).with_checkpoint(format!("{id}_c0")))
                .unwrap();
        }
        registry
    }

    #[test]
    fn duplicate_active_is_rejected() {
        let mut registry = registry(&["a"]);
        let err = registry.register_active(Player::active("a")).unwrap_err();
        assert_eq!(err, LeagueError::DuplicateId(PlayerId::new("a")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn ids_keep_insertion_order() {
        let mut registry = registry(&["c", "a", "b"]);
        registry
            .promote_to_historical(&"a".into(), "a_c1".into(), 1)
            .unwrap();
        assert_eq!(
            registry.list_active_ids(),
            vec![PlayerId::new("c"), PlayerId::new("a"), PlayerId::new("b")]
        );
        assert_eq!(
            registry.list_all_ids(),
            vec![
                PlayerId::new("c"),
                PlayerId::new("a"),
                PlayerId::new("b"),
                PlayerId::new("a_1_historical")
            ]
        );
    }

    #[test]
    fn promotion_leaves_active_untouched() {
        let mut registry = registry(&["a"]);
        let id = registry
            .promote_to_historical(&"a".into(), "a_c1".into(), 1)
            .unwrap();

        let historical = registry.get(&id).unwrap();
        assert!(historical.is_historical());
        assert_eq!(historical.checkpoint.as_str(), "a_c1");
        assert_eq!(historical.parent, Some(PlayerId::new("a")));

        let active = registry.get(&"a".into()).unwrap();
        assert!(active.is_active());
        assert_eq!(active.checkpoint.as_str(), "a_c0");
    }

    #[test]
    fn promotion_at_same_iteration_gets_a_fresh_id() {
        let mut registry = registry(&["a"]);
        let first = registry
            .promote_to_historical(&"a".into(), "x".into(), 5)
            .unwrap();
        let second = registry
            .promote_to_historical(&"a".into(), "y".into(), 5)
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(second.as_str(), "a_5_historical_1");
        assert_eq!(registry.historical_count(), 2);
    }

    #[test]
    fn update_requires_known_active() {
        let mut registry = registry(&["a"]);
        assert_eq!(
            registry.update_active_checkpoint(&"ghost".into(), "c".into(), 1),
            Err(LeagueError::NotFound(PlayerId::new("ghost")))
        );

        let id = registry
            .promote_to_historical(&"a".into(), "a_c1".into(), 1)
            .unwrap();
        assert_eq!(
            registry.update_active_checkpoint(&id, "c".into(), 2),
            Err(LeagueError::NotActive(id.clone()))
        );
        assert!(registry.promote_to_historical(&id, "c".into(), 2).is_err());

        registry
            .update_active_checkpoint(&"a".into(), "a_c2".into(), 2)
            .unwrap();
        let a = registry.get(&"a".into()).unwrap();
        assert_eq!(a.checkpoint.as_str(), "a_c2");
        assert_eq!(a.train_iter, 2);
    }

    #[test]
    fn eviction_removes_oldest_historical_only() {
        let mut registry = registry(&["a", "b"]);
        let h1 = registry
            .promote_to_historical(&"a".into(), "a1".into(), 1)
            .unwrap();
        let h2 = registry
            .promote_to_historical(&"b".into(), "b1".into(), 1)
            .unwrap();

        assert_eq!(registry.evict_oldest_historical(), Some(h1.clone()));
        assert!(!registry.contains(&h1));
        assert!(registry.contains(&h2));
        assert_eq!(registry.get(&h2).unwrap().checkpoint.as_str(), "b1");
        assert_eq!(registry.evict_oldest_historical(), Some(h2));
        assert_eq!(registry.evict_oldest_historical(), None);
        assert_eq!(registry.active_count(), 2);
    }
}
