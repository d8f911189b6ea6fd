use std::borrow::Cow;

use bytes::Bytes;
use http::uri::PathAndQuery;
use http_body_util::{BodyExt as _, Full};
use hyper::{
    Method, Request, StatusCode, Uri,
    header::{self, HeaderMap, HeaderValue},
    http::request,
};

use crate::{config::HttpHost, prelude::*, token::Credential, util::ApiClient};


/// Media type sent and accepted for resource representations.
pub const MEDIA_TYPE_JSON: &str = "application/json";

/// Media type for partial updates, per RFC 7386.
pub const MEDIA_TYPE_MERGE_PATCH: &str = "application/merge-patch+json";


#[derive(Debug, confique::Config)]
pub struct ApiConfig {
    /// Name of the component under test, e.g. "examples". Doubles as the
    /// default collection path segment.
    #[config(env = "COMPONENT")]
    pub component: String,

    /// URL scheme of the resource API: "http" or "https".
    #[config(env = "SCHEME", validate = validate_scheme)]
    pub scheme: String,

    /// Network authority of the resource API as `host[:port]`, e.g.
    /// "localhost:3000".
    #[config(env = "AUTHORITY")]
    pub authority: String,

    /// Path prefix under which resource collections live. Must start and
    /// end with '/'.
    #[config(default = "/", env = "BASE_RESOURCE", validate = validate_base_resource)]
    pub base_resource: String,

    /// Overrides the collection path segment appended to `base_resource`.
    /// Defaults to `component`.
    #[config(env = "RESOURCES_PROPERTY")]
    pub resources_property: Option<String>,
}

fn validate_scheme(value: &String) -> Result<(), &'static str> {
    match value.as_str() {
        "http" | "https" => Ok(()),
        _ => Err("must be 'http' or 'https'"),
    }
}

fn validate_base_resource(value: &String) -> Result<(), &'static str> {
    crate::config::validate_url_path(value)?;
    if !value.ends_with('/') {
        return Err("must end with '/'");
    }
    Ok(())
}


/// Everything derived from config and credential once at startup: where to
/// send requests and the headers to send them with. Immutable for the life
/// of a run.
#[derive(Debug)]
pub struct RequestContext {
    base: HttpHost,
    collection: Uri,
    auth: HeaderValue,
}

impl RequestContext {
    pub fn new(config: &ApiConfig, credential: &Credential) -> Result<Self> {
        let base = HttpHost::from_parts(&config.scheme, &config.authority)
            .map_err(|e| anyhow!("invalid API address in config: {e}"))?;

        let property = config.resources_property.as_deref()
            .unwrap_or(&config.component);
        if property.is_empty() || property.contains('/') {
            bail!("collection segment '{property}' must be a single non-empty path segment");
        }

        let path = format!("{}{}", config.base_resource, property);
        let pq = PathAndQuery::try_from(&path)
            .with_context(|| format!("collection path '{path}' is not a valid URI path"))?;
        let collection = base.with_path_and_query(pq);

        // `BEARER <token>`, uppercase, is the wire format this API family
        // expects. Built once; also catches tokens with stray characters.
        let auth = HeaderValue::try_from(format!("BEARER {}", credential.token))
            .context("bearer token contains characters not allowed in an HTTP header")?;

        debug!(collection = %collection, "derived request context");
        Ok(Self { base, collection, auth })
    }

    /// Scheme and authority of the API, i.e. what relative `Location`
    /// values are resolved against.
    pub fn base(&self) -> &HttpHost {
        &self.base
    }

    /// URL of the resource collection, i.e. the target of the create step.
    pub fn collection_url(&self) -> &Uri {
        &self.collection
    }

    /// Resolves a `Location` header value like `urljoin` would: absolute
    /// URLs pass through, relative paths get scheme and authority of the
    /// configured API prepended.
    pub fn resolve_location(&self, location: &str) -> Result<Uri> {
        let uri: Uri = location.parse()
            .with_context(|| format!("invalid Location '{location}'"))?;
        if uri.scheme().is_some() {
            if uri.authority() != Some(&self.base.authority) {
                warn!(%uri, "Location points away from the configured authority");
            }
            return Ok(uri);
        }

        let pq = uri.path_and_query()
            .ok_or_else(|| anyhow!("Location '{location}' has no path"))?;
        Ok(self.base.with_path_and_query(pq.clone()))
    }

    /// Starts a request with `Accept` and `Authorization` preloaded.
    pub fn request(&self, method: Method, url: &Uri) -> request::Builder {
        Request::builder()
            .method(method)
            .uri(url.clone())
            .header(header::ACCEPT, MEDIA_TYPE_JSON)
            .header(header::AUTHORIZATION, self.auth.clone())
    }
}


/// A completed request/response exchange with the body fully collected.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    /// The named header as a string, if present and readable as one.
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Body as text, for failure lines and description comparison.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Sends one request and collects the response. Blocks (in async terms)
/// until the full body arrived; the driver never pipelines steps.
pub async fn exchange(client: &ApiClient, req: Request<Full<Bytes>>) -> Result<ApiResponse> {
    let method = req.method().clone();
    let url = req.uri().clone();
    trace!(%method, %url, "sending request");

    let response = client.request(req).await
        .with_context(|| format!("{method} {url} failed"))?;
    let (parts, body) = response.into_parts();
    let body = body.collect().await
        .with_context(|| format!("failed to read response body of {method} {url}"))?
        .to_bytes();

    trace!(status = %parts.status, body_len = body.len(), "got response");
    Ok(ApiResponse { status: parts.status, headers: parts.headers, body })
}
