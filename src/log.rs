use std::{
    collections::HashMap,
    fs::OpenOptions,
    path::PathBuf,
    sync::Arc,
};
use serde::Deserialize;
use tracing_subscriber::{
    filter::{FilterFn, LevelFilter},
    prelude::*,
};

use crate::prelude::*;


#[derive(Debug, confique::Config)]
pub struct LogConfig {
    /// Specifies what log messages to emit, based on the module path and log
    /// level. Note that these are diagnostics only; the per-step pass/fail
    /// lines of `run` are always printed.
    ///
    /// This is a map from a module path prefix to a minimum log level. For
    /// each log message, the entry with the longest matching prefix wins; if
    /// no entry matches, the message is not emitted. Valid levels: off,
    /// error, warn, info, debug, trace.
    ///
    /// For example, to see the full request/response flow of the lifecycle
    /// driver, but keep everything else at the default:
    ///
    ///    [log]
    ///    filters.relic = "info"
    ///    filters."relic::check" = "trace"
    #[config(default = { "relic": "info" })]
    pub filters: Filters,

    /// If this is set, log messages are also written to this file.
    pub file: Option<PathBuf>,

    /// If this is set to `false`, log messages are not written to stdout.
    #[config(default = true)]
    pub stdout: bool,
}

#[derive(Debug, Deserialize)]
#[serde(try_from = "HashMap<String, String>")]
pub struct Filters(HashMap<String, LevelFilter>);

impl TryFrom<HashMap<String, String>> for Filters {
    type Error = String;
    fn try_from(value: HashMap<String, String>) -> Result<Self, Self::Error> {
        value.into_iter()
            .map(|(target_prefix, level)| Ok((target_prefix, parse_level_filter(&level)?)))
            .collect::<Result<_, _>>()
            .map(Self)
    }
}

fn parse_level_filter(s: &str) -> Result<LevelFilter, String> {
    match s {
        "off" => Ok(LevelFilter::OFF),
        "trace" => Ok(LevelFilter::TRACE),
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" => Ok(LevelFilter::WARN),
        "error" => Ok(LevelFilter::ERROR),
        other => Err(format!("invalid log level '{other}'")),
    }
}

pub fn init(config: &LogConfig) -> Result<()> {
    let filter = {
        let filters = config.filters.0.clone();
        let max_level = filters.values().max().copied().unwrap_or(LevelFilter::OFF);

        // A handful of entries at most, so a linear scan per message is fine.
        let filter = FilterFn::new(move |metadata| {
            filters.iter()
                .filter(|(target_prefix, _)| metadata.target().starts_with(*target_prefix))
                .max_by_key(|(target_prefix, _)| target_prefix.len())
                .map(|(_, level_filter)| metadata.level() <= level_filter)
                .unwrap_or(false)
        });
        filter.with_max_level_hint(max_level)
    };

    let stdout_output = config.stdout
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stdout));

    let file_output = match &config.file {
        Some(path) => {
            use std::io::Write as _;

            let mut file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .with_context(|| format!("failed to open/create log file '{}'", path.display()))?;

            // An empty line separator makes repeated runs easier to tell apart.
            file.write_all(b"\n\n").context("could not write to log file")?;

            Some(tracing_subscriber::fmt::layer().with_writer(Arc::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_output)
        .with(stdout_output)
        .init();

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_parse_valid_levels() {
        let map = HashMap::from([
            ("relic".to_owned(), "info".to_owned()),
            ("relic::check".to_owned(), "trace".to_owned()),
        ]);
        let filters = Filters::try_from(map).unwrap();
        assert_eq!(filters.0["relic"], LevelFilter::INFO);
        assert_eq!(filters.0["relic::check"], LevelFilter::TRACE);
    }

    #[test]
    fn filters_reject_unknown_level() {
        let map = HashMap::from([("relic".to_owned(), "verbose".to_owned())]);
        assert!(Filters::try_from(map).is_err());
    }
}
