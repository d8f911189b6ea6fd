use bytes::Bytes;
use http_body_util::Full;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{Client as HyperClient, connect::HttpConnector};

use crate::prelude::*;


/// HTTP client for requests against the resource API. All requests use a
/// `Full<Bytes>` body; GET and DELETE simply send an empty one.
pub type ApiClient = HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>;

pub fn http_client() -> Result<ApiClient> {
    let https = HttpsConnectorBuilder::new()
        .with_native_roots()
        .context("failed to load native certificate roots")?
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();
    let out = HyperClient::builder(hyper_util::rt::TokioExecutor::new()).build(https);
    Ok(out)
}
