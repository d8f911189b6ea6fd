use std::{fmt, path::PathBuf};

use confique::Config as _;
use hyper::{Uri, http::uri::{Authority, PathAndQuery, Scheme}};

use crate::{cli::Cli, prelude::*};


#[derive(Debug, confique::Config)]
pub struct Config {
    #[config(nested)]
    pub api: crate::api::ApiConfig,

    #[config(nested)]
    pub token: crate::token::TokenConfig,

    #[config(nested)]
    pub log: crate::log::LogConfig,
}

/// Loads the configuration from environment variables, layered on top of an
/// optional TOML file. An explicitly given file (CLI flag or env var) must
/// exist; the default locations are skipped silently when absent, so a pure
/// env-var setup works without any file.
pub fn load(cli: &Cli) -> Result<Config> {
    let explicit = cli.config.clone()
        .or_else(|| std::env::var_os("RELIC_CONFIG_PATH").map(PathBuf::from));
    if let Some(path) = &explicit {
        if !path.exists() {
            bail!("config file '{}' does not exist", path.display());
        }
    }

    let mut builder = Config::builder().env();
    if let Some(path) = explicit {
        builder = builder.file(path);
    }
    builder
        .file("config.toml")
        .file("/etc/relic/config.toml")
        .load()
        .context("failed to load configuration")
}

pub fn template() -> String {
    let mut options = confique::toml::FormatOptions::default();
    options.general.nested_field_gap = 2;
    confique::toml::template::<Config>(options)
}


/// A `scheme://authority` pair like `https://api.example.com:8443`: the fixed
/// part of every URL this tool requests.
#[derive(Debug, Clone)]
pub struct HttpHost {
    pub scheme: Scheme,
    pub authority: Authority,
}

impl HttpHost {
    /// Builds a host from separately configured scheme and authority strings.
    pub fn from_parts(scheme: &str, authority: &str) -> Result<Self, String> {
        let scheme = Scheme::try_from(scheme)
            .map_err(|e| format!("invalid URL scheme: {e}"))?;
        if scheme != Scheme::HTTP && scheme != Scheme::HTTPS {
            return Err("scheme must be 'http' or 'https'".into());
        }

        let authority = Authority::try_from(authority)
            .map_err(|e| format!("invalid authority: {e}"))?;
        if authority.as_str().contains('@') {
            return Err("authority must not contain a user part".into());
        }

        Ok(Self { scheme, authority })
    }

    /// Combines this host with a path (and optional query) into a full URI.
    pub fn with_path_and_query(&self, pq: PathAndQuery) -> Uri {
        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(pq)
            .build()
            .expect("failed to build URI from verified parts")
    }
}

impl fmt::Display for HttpHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}


/// Makes sure that the given string is a valid URL path.
pub fn validate_url_path(value: &String) -> Result<(), &'static str> {
    match PathAndQuery::try_from(value) {
        Ok(pq) if pq.query().is_none() => Ok(()),
        _ => Err("not a valid URI path"),
    }
}
