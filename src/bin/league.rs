//! Runs a toy league for a while and prints its payoff table.
//!
//! Usage: `league [seconds]` (default 10). The league is configured from `LEAGUE_*`
//! environment variables; without `LEAGUE_ACTIVE_PLAYERS` it trains `main` and
//! `exploiter`. If `LEAGUE_CHECKPOINT_PATH` points to an existing file, the league resumes
//! from it, and it is saved there on shutdown.
//!
//! The game is a weighted coin flip: a checkpoint `player@n` has strength `n`, and the
//! first player wins with probability `(a + 1) / (a + b + 2)`.

use std::{env, thread, time::Duration};

use ai_league::prelude::*;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use tracing::info;

struct Strength;

impl PolicyProvider for Strength {
    type Policy = u64;

    fn load(&mut self, _: &PlayerId, checkpoint: &CheckpointRef) -> anyhow::Result<u64> {
        Ok(checkpoint
            .as_str()
            .rsplit_once('@')
            .and_then(|(_, n)| n.parse().ok())
            .unwrap_or(0))
    }
}

struct CoinFlip {
    rng: SmallRng,
}

impl EpisodeRunner for CoinFlip {
    type Policy = u64;

    fn run_episode(&mut self, _: &Job, strengths: Vec<u64>) -> anyhow::Result<Outcome> {
        thread::sleep(Duration::from_millis(5));
        let (a, b) = (strengths[0] as f64, strengths[1] as f64);
        if self.rng.random::<f64>() < (a + 1.0) / (a + b + 2.0) {
            Ok(Outcome::Win)
        } else {
            Ok(Outcome::Loss)
        }
    }
}

struct Counting;

impl Trainer for Counting {
    fn train_step(&mut self, player: &PlayerId, train_iter: u64) -> anyhow::Result<CheckpointRef> {
        thread::sleep(Duration::from_millis(20));
        Ok(CheckpointRef::new(format!("{player}@{}", train_iter + 1)))
    }
}

fn main() -> anyhow::Result<()> {
    let seconds = match env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 10,
    };

    let config = Configuration::from_env();
    init_logger(&config)?;

    let mut builder = LeagueConfigBuilder::from_env()?;
    if env::var("LEAGUE_ACTIVE_PLAYERS").is_err() {
        builder = builder.with_active_players(["main", "exploiter"]);
    }
    let league_config = builder.build()?;

    let league = match config.checkpoint_path() {
        Some(path) if path.exists() => League::restore(league_config, path)?,
        _ => League::new(league_config)?,
    };
    info!(seconds, "league starting");

    let cluster = LocalCluster::launch(
        config,
        league,
        |_| {
            let rng = SmallRng::from_os_rng();
            (Strength, CoinFlip { rng })
        },
        |_| Counting,
        10,
    )?;
    let league = cluster.run_for(Duration::from_secs(seconds))?;

    println!(
        "{} results, {} players",
        league.payoff().results_applied(),
        league.registry().len()
    );
    let mut rows = league.payoff().rows();
    rows.sort_by(|a, b| b.stats.games().total_cmp(&a.stats.games()));
    for row in rows.iter().take(20) {
        println!(
            "{} VS {}: {:.2} over {:.0} games",
            row.player,
            row.opponent,
            row.win_rate,
            row.stats.games()
        );
    }
    Ok(())
}
