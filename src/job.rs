//! Matchmaking jobs and the results actors report for them.
//!
//! A [`Job`] is created by the matchmaker without an actor, bound to an actor when the
//! coordinator dispatches it, and discarded once its [`JobResult`] has been applied to
//! the payoff table.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::LeagueError;
use crate::player::{ActorId, CheckpointRef, PlayerId, PlayerMeta};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Sequence number assigned by the matchmaker.
    pub job_id: u64,
    /// Participants, slot 0 is the learning side.
    pub players: Vec<PlayerId>,
    /// Checkpoints of `players`, slot for slot.
    pub checkpoints: Vec<CheckpointRef>,
    /// Unset until dispatch.
    pub actor_id: Option<ActorId>,
    pub episode_length: Option<u32>,
    /// Why these opponents were picked.
    pub rationale: Option<String>,
}

impl Job {
    /// The primary (learning) player.
    pub fn launch_player(&self) -> &PlayerId {
        &self.players[0]
    }

    pub fn opponents(&self) -> &[PlayerId] {
        &self.players[1..]
    }

    pub fn is_dispatched(&self) -> bool {
        self.actor_id.is_some()
    }

    /// `created -> dispatched`
    pub fn bind(&mut self, actor_id: ActorId) {
        self.actor_id = Some(actor_id);
    }

    pub(crate) fn check_shape(&self) -> Result<(), LeagueError> {
        if self.players.len() < 2 {
            return Err(LeagueError::InvalidJob(format!(
                "job {} has {} participant(s), at least 2 are required",
                self.job_id,
                self.players.len()
            )));
        }
        Ok(())
    }
}

impl Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self
            .players
            .iter()
            .map(PlayerId::as_str)
            .collect::<Vec<_>>()
            .join(" VS ");
        write!(f, "#{} [{s}]", self.job_id)
    }
}

/// Outcome signal produced by an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Slot 0 beat every opponent.
    Win,
    /// Slot 0 lost to every opponent.
    Loss,
    Draw,
    /// One scalar per participant, every pair is compared by score.
    Scores(Vec<f64>),
}

/// Pairwise verdict from the point of view of the first player of the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairVerdict {
    Win,
    Loss,
    Draw,
}

impl PairVerdict {
    pub fn flip(self) -> Self {
        match self {
            PairVerdict::Win => PairVerdict::Loss,
            PairVerdict::Loss => PairVerdict::Win,
            PairVerdict::Draw => PairVerdict::Draw,
        }
    }
}

impl Outcome {
    /// Expands the outcome into `(slot_a, slot_b, verdict of a against b)` triples.
    pub(crate) fn pairs(
        &self,
        num_players: usize,
    ) -> Result<Vec<(usize, usize, PairVerdict)>, LeagueError> {
        let verdict = match self {
            Outcome::Win => PairVerdict::Win,
            Outcome::Loss => PairVerdict::Loss,
            Outcome::Draw => PairVerdict::Draw,
            Outcome::Scores(scores) => return score_pairs(scores, num_players),
        };
        Ok((1..num_players).map(|j| (0, j, verdict)).collect())
    }
}

fn score_pairs(
    scores: &[f64],
    num_players: usize,
) -> Result<Vec<(usize, usize, PairVerdict)>, LeagueError> {
    if scores.len() != num_players {
        return Err(LeagueError::InvalidJob(format!(
            "{} scores reported for {num_players} players",
            scores.len()
        )));
    }
    let mut pairs = vec![];
    for i in 0..num_players {
        for j in (i + 1)..num_players {
            let diff = scores[i] - scores[j];
            let verdict = if diff.abs() < f64::EPSILON {
                PairVerdict::Draw
            } else if diff > 0.0 {
                PairVerdict::Win
            } else {
                PairVerdict::Loss
            };
            pairs.push((i, j, verdict));
        }
    }
    Ok(pairs)
}

/// What an actor sends back once the episode of a job is over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job: Job,
    pub outcome: Outcome,
    /// Checkpoint announcement piggybacked on the result, if any.
    pub player_meta: Option<PlayerMeta>,
}

impl JobResult {
    pub fn new(job: Job, outcome: Outcome) -> Self {
        Self {
            job,
            outcome,
            player_meta: None,
        }
    }

    #[must_use]
    pub fn with_player_meta(self, meta: PlayerMeta) -> Self {
        Self {
            player_meta: Some(meta),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(players: &[&str]) -> Job {
        Job {
            job_id: 3,
            players: players.iter().map(|p| PlayerId::new(*p)).collect(),
            checkpoints: vec![CheckpointRef::default(); players.len()],
            actor_id: None,
            episode_length: None,
            rationale: None,
        }
    }

    #[test]
    fn lifecycle_binding() {
        let mut job = job(&["a", "b"]);
        assert!(!job.is_dispatched());
        job.bind(ActorId::new("actor-0"));
        assert!(job.is_dispatched());
        assert_eq!(job.launch_player().as_str(), "a");
        assert_eq!(job.opponents(), &[PlayerId::new("b")]);
        assert_eq!(job.to_string(), "#3 [a VS b]");
    }

    #[test]
    fn single_participant_is_rejected() {
        assert!(matches!(
            job(&["a"]).check_shape(),
            Err(LeagueError::InvalidJob(_))
        ));
    }

    #[test]
    fn win_expands_against_every_opponent() {
        let pairs = Outcome::Win.pairs(3).unwrap();
        assert_eq!(
            pairs,
            vec![(0, 1, PairVerdict::Win), (0, 2, PairVerdict::Win)]
        );
    }

    #[test]
    fn scores_compare_every_pair() {
        let pairs = Outcome::Scores(vec![1.0, 3.0, 1.0]).pairs(3).unwrap();
        assert_eq!(
            pairs,
            vec![
                (0, 1, PairVerdict::Loss),
                (0, 2, PairVerdict::Draw),
                (1, 2, PairVerdict::Win)
            ]
        );
        assert!(Outcome::Scores(vec![1.0]).pairs(2).is_err());
    }
}
