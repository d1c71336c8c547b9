//! Configuration of the league and of the processes running it.
//!
//! Two objects are involved:
//! - [`Configuration`]: runtime behaviour of the coordinator and roles (logging,
//!   liveness, reporting, checkpointing, worker topology).
//! - [`LeagueConfig`]: the league itself (initial population, job shape, opponent
//!   policy, payoff statistics), built and validated through [`LeagueConfigBuilder`].
//!
//! Both can be created programmatically or read from environment variables.
//!
//! # Environment Variables
//!
//! Runtime ([`Configuration::from_env()`]), flags are enabled by `"true"` (case-insensitive):
//! - `LEAGUE_VERBOSE`: Print progress to stdout (default: `true`)
//! - `LEAGUE_LOG`: Log to a timestamped file instead of stderr (default: `false`)
//! - `LEAGUE_ACTOR_TIMEOUT_SECS`: Evict actors silent for longer (default: never, `0` is ignored)
//! - `LEAGUE_REPORT_INTERVAL`: Log a payoff summary every N results (default: `100`)
//! - `LEAGUE_CHECKPOINT_PATH`: Save the league there on shutdown (default: none)
//! - `LEAGUE_WORKERS`: Worker topology, e.g. `league_coordinator:1,league_actor:4`
//!
//! League ([`LeagueConfigBuilder::from_env()`]):
//! - `LEAGUE_ACTIVE_PLAYERS`: Comma-separated active player ids
//! - `LEAGUE_PLAYERS_PER_JOB`: Participants per job (default: `2`)
//! - `LEAGUE_OPPONENT_POLICY`: `rotation`, `self_play`, `uniform_historical`, `pfsp[:exponent]`
//! - `LEAGUE_PAYOFF_DECAY`: Decay factor in `(0, 1]` (default: `1`, no decay)
//! - `LEAGUE_PAYOFF_PRIOR`: Neutral pseudo-games blended into win rates (default: `0`)
//! - `LEAGUE_MAX_HISTORICAL`: Historical players kept (default: unbounded)
//! - `LEAGUE_EPISODE_LENGTH`: Episode length forwarded to actors (default: unset)
//! - `LEAGUE_SEED`: Seed of the opponent policy RNG (default: random)

use std::{
    collections::HashSet,
    env,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{bail, Context};
use tracing::warn;

use crate::matchmaker::OpponentSelection;
use crate::player::{Player, PlayerId};

/// Runtime behaviour of the league processes.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) verbose: bool,
    pub(crate) log: bool,
    pub(crate) actor_timeout: Option<Duration>,
    pub(crate) report_interval: u64,
    pub(crate) checkpoint_path: Option<PathBuf>,
    pub(crate) workers: Option<String>,
}

impl Configuration {
    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - Progress is printed to stdout.
    /// - Logs go to stderr, not to a file.
    /// - Silent actors are never evicted.
    /// - A payoff summary is logged every 100 results.
    /// - The league is not saved on shutdown.
    /// - The worker topology is derived from the league (see [`crate::topology`]).
    pub fn new() -> Self {
        Self {
            verbose: true,
            log: false,
            actor_timeout: None,
            report_interval: 100,
            checkpoint_path: None,
            workers: None,
        }
    }

    /// Create configuration from environment variables (see module documentation).
    ///
    /// Unset or unparsable values fall back to the defaults of [`Configuration::new`].
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        let default = Self::new();
        Self {
            verbose: get_env_flag("LEAGUE_VERBOSE", default.verbose),
            log: get_env_flag("LEAGUE_LOG", default.log),
            actor_timeout: parse_env::<u64>("LEAGUE_ACTOR_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .and_then(non_zero_timeout),
            report_interval: parse_env("LEAGUE_REPORT_INTERVAL").unwrap_or(default.report_interval),
            checkpoint_path: env::var("LEAGUE_CHECKPOINT_PATH").ok().map(PathBuf::from),
            workers: env::var("LEAGUE_WORKERS").ok(),
        }
    }

    /// Enable or disable progress output.
    pub fn with_verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Evict actors whose job is outstanding for longer than `timeout`.
    ///
    /// A zero timeout would evict every actor right after dispatch; it is ignored.
    pub fn with_actor_timeout(mut self, timeout: Duration) -> Self {
        self.actor_timeout = non_zero_timeout(timeout);
        self
    }

    /// Log a payoff summary every `interval` results (0 disables it).
    pub fn with_report_interval(mut self, interval: u64) -> Self {
        self.report_interval = interval;
        self
    }

    /// Save the league to `path` when the coordinator shuts down.
    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    /// Worker topology, e.g. `"league_coordinator:1,league_actor:4,league_learner:2"`.
    pub fn with_workers(mut self, workers: &str) -> Self {
        self.workers = Some(workers.to_string());
        self
    }

    pub fn actor_timeout(&self) -> Option<Duration> {
        self.actor_timeout
    }

    pub fn checkpoint_path(&self) -> Option<&Path> {
        self.checkpoint_path.as_deref()
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

fn non_zero_timeout(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() {
        warn!("zero actor timeout ignored, actors are never evicted");
        return None;
    }
    Some(timeout)
}

fn parse_env<T: FromStr>(var: &str) -> Option<T> {
    env::var(var).ok()?.trim().parse().ok()
}

/// Validated league settings, obtained using [`LeagueConfigBuilder`].
///
/// The `Default` value has no active player: a league built from it refuses to
/// generate jobs.
#[derive(Debug, Clone)]
pub struct LeagueConfig {
    pub(crate) active_players: Vec<Player>,
    pub(crate) players_per_job: usize,
    pub(crate) opponent_selection: OpponentSelection,
    pub(crate) payoff_decay: f64,
    pub(crate) payoff_prior: f64,
    pub(crate) max_historical: Option<usize>,
    pub(crate) episode_length: Option<u32>,
    pub(crate) seed: Option<u64>,
}

impl Default for LeagueConfig {
    fn default() -> Self {
        Self {
            active_players: vec![],
            players_per_job: 2,
            opponent_selection: OpponentSelection::default(),
            payoff_decay: 1.0,
            payoff_prior: 0.0,
            max_historical: None,
            episode_length: None,
            seed: None,
        }
    }
}

impl LeagueConfig {
    /// create a LeagueConfigBuilder
    pub fn builder() -> LeagueConfigBuilder {
        LeagueConfigBuilder::new()
    }

    pub fn active_ids(&self) -> Vec<PlayerId> {
        self.active_players.iter().map(|p| p.id.clone()).collect()
    }

    pub fn players_per_job(&self) -> usize {
        self.players_per_job
    }

    pub fn opponent_selection(&self) -> OpponentSelection {
        self.opponent_selection
    }
}

/// A builder for [`LeagueConfig`].
///
/// # Examples
///
/// ```
/// use ai_league::configuration::LeagueConfigBuilder;
/// use ai_league::matchmaker::OpponentSelection;
///
/// let config = LeagueConfigBuilder::new()
///     .with_active_players(["main", "exploiter"])
///     .with_opponent_selection(OpponentSelection::Prioritized { exponent: 2.0 })
///     .with_payoff_decay(0.99)
///     .with_max_historical(50)
///     .build()
///     .unwrap();
/// assert_eq!(config.active_ids().len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct LeagueConfigBuilder {
    active_players: Vec<Player>,
    players_per_job: Option<usize>,
    opponent_selection: Option<OpponentSelection>,
    payoff_decay: Option<f64>,
    payoff_prior: Option<f64>,
    max_historical: Option<usize>,
    episode_length: Option<u32>,
    seed: Option<u64>,
}

impl LeagueConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pre-filled from `LEAGUE_*` environment variables (see module documentation).
    ///
    /// # Errors
    /// Returns an error if a set variable cannot be parsed.
    pub fn from_env() -> anyhow::Result<Self> {
        fn parse<T: FromStr>(var: &str) -> anyhow::Result<Option<T>>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            match env::var(var) {
                Ok(val) => Ok(Some(
                    val.trim()
                        .parse()
                        .with_context(|| format!("could not parse {var}={val}"))?,
                )),
                Err(_) => Ok(None),
            }
        }

        let active_players = env::var("LEAGUE_ACTIVE_PLAYERS")
            .map(|ids| parse_id_list(&ids))
            .unwrap_or_default()
            .into_iter()
            .map(|id| Player::active(id))
            .collect();

        let opponent_selection = match env::var("LEAGUE_OPPONENT_POLICY") {
            Ok(val) => Some(
                val.parse::<OpponentSelection>()
                    .context("could not parse LEAGUE_OPPONENT_POLICY")?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            active_players,
            players_per_job: parse("LEAGUE_PLAYERS_PER_JOB")?,
            opponent_selection,
            payoff_decay: parse("LEAGUE_PAYOFF_DECAY")?,
            payoff_prior: parse("LEAGUE_PAYOFF_PRIOR")?,
            max_historical: parse("LEAGUE_MAX_HISTORICAL")?,
            episode_length: parse("LEAGUE_EPISODE_LENGTH")?,
            seed: parse("LEAGUE_SEED")?,
        })
    }

    /// Adds an active player, its checkpoint included.
    #[must_use]
    pub fn with_active_player(mut self, player: Player) -> Self {
        self.active_players.push(player);
        self
    }

    /// Adds active players with empty checkpoints.
    #[must_use]
    pub fn with_active_players<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PlayerId>,
    {
        self.active_players
            .extend(ids.into_iter().map(|id| Player::active(id)));
        self
    }

    /// Participants per job, default two.
    #[must_use]
    pub fn with_players_per_job(self, n: usize) -> Self {
        Self {
            players_per_job: Some(n),
            ..self
        }
    }

    #[must_use]
    pub fn with_opponent_selection(self, selection: OpponentSelection) -> Self {
        Self {
            opponent_selection: Some(selection),
            ..self
        }
    }

    /// Per-result decay of payoff entries, in `(0, 1]`.
    #[must_use]
    pub fn with_payoff_decay(self, decay: f64) -> Self {
        Self {
            payoff_decay: Some(decay),
            ..self
        }
    }

    /// Pseudo-games at 0.5 blended into every win rate.
    #[must_use]
    pub fn with_payoff_prior(self, games: f64) -> Self {
        Self {
            payoff_prior: Some(games),
            ..self
        }
    }

    /// Keep at most `max` historical players, evicting the oldest first.
    #[must_use]
    pub fn with_max_historical(self, max: usize) -> Self {
        Self {
            max_historical: Some(max),
            ..self
        }
    }

    #[must_use]
    pub fn with_episode_length(self, length: u32) -> Self {
        Self {
            episode_length: Some(length),
            ..self
        }
    }

    #[must_use]
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..self
        }
    }

    /// Consumes the builder and returns the validated [`LeagueConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error when the league could never run: no active player, duplicate or
    /// empty ids, fewer than two players per job, decay outside `(0, 1]`, negative prior,
    /// prioritized sampling with a negative or non-finite exponent.
    pub fn build(self) -> anyhow::Result<LeagueConfig> {
        if self.active_players.is_empty() {
            bail!("a league needs at least one active player");
        }

        let mut seen = HashSet::new();
        for player in &self.active_players {
            if player.id.as_str().is_empty() {
                bail!("active player ids must not be empty");
            }
            if !seen.insert(&player.id) {
                bail!("active player '{}' is declared twice", player.id);
            }
        }

        let players_per_job = self.players_per_job.unwrap_or(2);
        if players_per_job < 2 {
            bail!("a job needs at least 2 players, got {players_per_job}");
        }

        let payoff_decay = self.payoff_decay.unwrap_or(1.0);
        if !(payoff_decay > 0.0 && payoff_decay <= 1.0) {
            bail!("payoff decay must be in (0, 1], got {payoff_decay}");
        }

        let payoff_prior = self.payoff_prior.unwrap_or(0.0);
        if payoff_prior < 0.0 {
            bail!("payoff prior must be non-negative, got {payoff_prior}");
        }

        let opponent_selection = self.opponent_selection.unwrap_or_default();
        if let OpponentSelection::Prioritized { exponent } = &opponent_selection {
            if !(exponent.is_finite() && *exponent >= 0.0) {
                bail!("pfsp exponent must be finite and non-negative, got {exponent}");
            }
        }

        if self.max_historical == Some(0) {
            warn!("`with_max_historical(0)` evicts every snapshot right after its creation");
        }

        Ok(LeagueConfig {
            active_players: self.active_players,
            players_per_job,
            opponent_selection,
            payoff_decay,
            payoff_prior,
            max_historical: self.max_historical,
            episode_length: self.episode_length,
            seed: self.seed,
        })
    }
}

/// Splits a comma-separated id list, ignoring blanks.
pub(crate) fn parse_id_list(s: &str) -> Vec<PlayerId> {
    s.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(PlayerId::new)
        .collect()
}
