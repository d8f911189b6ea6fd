use std::{borrow::Cow, fmt, fs, path::PathBuf};

use base64::{Engine as _, alphabet, engine};
use serde::Deserialize;

use crate::prelude::*;


#[derive(Debug, confique::Config)]
pub struct TokenConfig {
    /// The bearer token presented on every request. Usually set via the env
    /// variable `TOKEN`; a value in the config file works too, but is
    /// discouraged for real credentials.
    #[config(env = "TOKEN")]
    pub value: Option<String>,

    /// File to read the bearer token from when `TOKEN` is not set. Plain
    /// text, surrounding whitespace is ignored.
    #[config(default = "token.txt")]
    pub file: PathBuf,
}

/// A loaded bearer token plus the identity extracted from its claims.
///
/// The token is completely opaque to this tool otherwise: no signature
/// verification, no expiry checks. Whether it actually grants access is
/// exactly what the conformance run finds out.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,
    pub identity: Identity,
}

/// Loads the bearer token from the configured source (env/config value
/// first, token file as fallback) and decodes its claims segment.
pub fn load(config: &TokenConfig) -> Result<Credential> {
    let raw = match &config.value {
        Some(value) => {
            debug!("using bearer token from environment/config");
            value.clone()
        }
        None => {
            debug!(file = %config.file.display(), "reading bearer token from file");
            fs::read_to_string(&config.file).with_context(|| format!(
                "no token in env `TOKEN` and failed to read token file '{}'",
                config.file.display(),
            ))?
        }
    };

    let token = raw.trim().to_owned();
    if token.is_empty() {
        bail!("bearer token is empty");
    }

    let identity = decode_identity(&token)?;
    Ok(Credential { token, identity })
}


/// Who the token was issued to, extracted from its claims. For display and
/// query parameters only; all authorization decisions happen on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identity in a form safe to embed in a query parameter, most
    /// importantly with `#` encoded as `%23`.
    pub fn query_encoded(&self) -> String {
        form_urlencoded::byte_serialize(self.0.as_bytes()).collect()
    }

    fn from_claims(claims: &RawClaims<'_>) -> Result<Self> {
        match (&claims.iss, &claims.sub) {
            (Some(iss), Some(sub)) => Ok(Self(format!("{iss}#{sub}"))),
            _ => match &claims.user_id {
                Some(user_id) => Ok(Self(user_id.clone().into_owned())),
                None => bail!("token claims contain neither `iss` + `sub` nor `user_id`"),
            },
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}


/// The claims this tool cares about. Issuer + subject is the current shape;
/// tokens from the older issuer carry a single `user_id` claim instead.
#[derive(Debug, Deserialize)]
struct RawClaims<'a> {
    iss: Option<Cow<'a, str>>,
    sub: Option<Cow<'a, str>>,
    user_id: Option<Cow<'a, str>>,
}

fn decode_identity(token: &str) -> Result<Identity> {
    let segment = claims_segment(token)?;
    let bytes = decode_base64(segment)
        .context("token claims segment is not valid base64")?;
    let claims: RawClaims = serde_json::from_slice(&bytes)
        .context("token claims segment is not valid JSON")?;
    trace!(?claims, "decoded token claims");
    Identity::from_claims(&claims)
}

/// Returns the second dot-separated segment of the token, i.e. the claims of
/// a `header.claims.signature` JWT. A missing signature part is tolerated.
fn claims_segment(token: &str) -> Result<&str> {
    let (_, rest) = token.split_once('.')
        .context("token is not a JWT: contains no '.'")?;
    match rest.split_once('.') {
        Some((claims, _signature)) => Ok(claims),
        None => Ok(rest),
    }
}

/// Decodes a claims segment, tolerating missing padding. JWTs use the
/// URL-safe alphabet per RFC 7515, but tokens of the older issuer were
/// encoded with the standard alphabet, so that is accepted as well.
fn decode_base64(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    const CONFIG: engine::GeneralPurposeConfig = engine::GeneralPurposeConfig::new()
        .with_decode_padding_mode(engine::DecodePaddingMode::Indifferent);
    const URL_SAFE: engine::GeneralPurpose = engine::GeneralPurpose::new(&alphabet::URL_SAFE, CONFIG);
    const STANDARD: engine::GeneralPurpose = engine::GeneralPurpose::new(&alphabet::STANDARD, CONFIG);

    URL_SAFE.decode(s).or_else(|_| STANDARD.decode(s))
}
