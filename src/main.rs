use std::{
    fs,
    io::{self, Write as _},
    path::Path,
    process::ExitCode,
};

use anyhow::Result;
use clap::Parser as _;
use tracing::info;

use relic::{api, check, cli::{Cli, Command}, config, log, token, util};


#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match &cli.cmd {
        Command::Run { scenario } => run(&cli, *scenario).await,
        Command::Check => check_setup(&cli),
        Command::GenConfigTemplate { out } => gen_config_template(out.as_deref()),
    }
}

/// Performs one conformance run against the configured API.
async fn run(cli: &Cli, scenario: check::Scenario) -> Result<ExitCode> {
    let config = config::load(cli)?;
    log::init(&config.log)?;
    let credential = token::load(&config.token)?;
    info!(identity = %credential.identity, "loaded bearer token");
    let ctx = api::RequestContext::new(&config.api, &credential)?;
    let client = util::http_client()?;

    let report = check::run(&ctx, &client, scenario).await;
    println!("{}", report.summary());

    Ok(if report.passed() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Loads config and token and prints what a run would use, without sending
/// a single request.
fn check_setup(cli: &Cli) -> Result<ExitCode> {
    let config = config::load(cli)?;
    let credential = token::load(&config.token)?;
    let ctx = api::RequestContext::new(&config.api, &credential)?;

    println!("token identity:  {}", credential.identity);
    println!("  query-encoded: {}", credential.identity.query_encoded());
    println!("API base:        {}", ctx.base());
    println!("collection URL:  {}", ctx.collection_url());

    Ok(ExitCode::SUCCESS)
}

fn gen_config_template(out: Option<&Path>) -> Result<ExitCode> {
    let template = config::template();
    match out {
        Some(path) => fs::write(path, &template)?,
        None => io::stdout().write_all(template.as_bytes())?,
    }
    Ok(ExitCode::SUCCESS)
}
