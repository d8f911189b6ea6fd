use std::path::PathBuf;

use crate::check::Scenario;


#[derive(clap::Parser)]
#[command(version, about)]
pub struct Cli {
    #[clap(subcommand)]
    pub cmd: Command,

    /// Specifies config file location. Default locations are: 'config.toml'
    /// and '/etc/relic/config.toml'. Can also be set via env
    /// `RELIC_CONFIG_PATH`.
    #[clap(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, clap::Parser)]
pub enum Command {
    /// Runs the resource lifecycle conformance check: create, retrieve,
    /// patch and delete one resource against the configured API, printing
    /// one pass/fail line per step. Exits non-zero if any step failed.
    Run {
        /// Which update acceptance policy to exercise. 'with-precondition'
        /// sends `If-Match` and expects the patch to be accepted (200);
        /// 'without-precondition' deliberately omits `If-Match` and expects
        /// the server to reject the patch (400).
        #[clap(long, value_enum, default_value_t = Scenario::WithPrecondition)]
        scenario: Scenario,
    },

    /// Checks config and credentials: loads the configuration, decodes the
    /// bearer token and prints the derived identity and target URLs, without
    /// sending any requests. Useful before pointing `run` at a live API.
    Check,

    /// Outputs a template of the configuration, including all config options
    /// with descriptions, great as a starting point.
    GenConfigTemplate {
        /// File to write it to. If unspecified, written to stdout.
        #[clap(short, long)]
        out: Option<PathBuf>,
    },
}
