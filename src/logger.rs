use std::fs::File;

use anyhow::{anyhow, Context};
use time::{
    format_description::{self, parse},
    OffsetDateTime,
};
use tracing::{subscriber::set_global_default, Level};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, FmtSubscriber};

use crate::configuration::Configuration;

/// Installs the global tracing subscriber.
///
/// With `config.log` set, everything down to `TRACE` goes to a timestamped file in the
/// working directory. Otherwise `INFO` and above go to stderr, or `DEBUG` when verbose.
///
/// # Errors
/// If the log file cannot be created or a global subscriber is already installed.
pub fn init_logger(config: &Configuration) -> anyhow::Result<()> {
    let (writer, level) = if config.log {
        let file_name = get_log_file_name()?;
        let file = File::create(&file_name)
            .with_context(|| format!("could not create log file {file_name}"))?;
        (BoxMakeWriter::new(file), Level::TRACE)
    } else if config.verbose {
        (BoxMakeWriter::new(std::io::stderr), Level::DEBUG)
    } else {
        (BoxMakeWriter::new(std::io::stderr), Level::INFO)
    };

    let local_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        local_offset,
        format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")?,
    );

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_ansi(false)
        .with_timer(timer)
        .with_thread_names(true)
        .with_writer(writer)
        .finish();

    set_global_default(subscriber).map_err(|_| {
        anyhow!("a global tracing subscriber is already set, consider disabling league logs")
    })
}

fn get_log_file_name() -> anyhow::Result<String> {
    let format = parse("[year]-[month]-[day]_[hour]:[minute]:[second]_league_log.txt")?;
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    Ok(now.format(&format)?)
}
