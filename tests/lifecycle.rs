//! End-to-end runs of the lifecycle driver against an in-process mock
//! resource API. The mock implements the behavior a conforming API shows,
//! with switches to misbehave in the ways the driver must detect.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::{
    Method, Request, Response, StatusCode,
    body::Incoming,
    header::{self, HeaderValue},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::net::TcpListener;

use relic::{
    api::{ApiConfig, RequestContext},
    check::{self, Scenario, Step},
    token::{self, TokenConfig},
    util::{self, ApiClient},
};


#[tokio::test]
async fn with_precondition_lifecycle_passes() {
    let (mock, ctx, client) = setup(MockOptions::default()).await;
    let report = check::run(&ctx, &client, Scenario::WithPrecondition).await;

    assert!(report.passed(), "{report:#?}");
    assert!(!report.aborted);
    let steps: Vec<Step> = report.steps.iter().map(|s| s.step).collect();
    assert_eq!(steps, [Step::Create, Step::Verify, Step::Update, Step::Verify, Step::Delete]);
    assert!(report.steps[0].line.starts_with("correctly created resource"));
    assert!(report.steps[2].line.starts_with("correctly patched resource"));
    assert_eq!(report.summary(), "scenario 'with-precondition': all 5 steps passed");

    // Create, two retrieves, patch, delete and the delete confirmation.
    let store = mock.store.lock().unwrap();
    assert_eq!(store.hits, 6);
    assert!(store.resources.is_empty());
}

#[tokio::test]
async fn without_precondition_lifecycle_passes() {
    let (mock, ctx, client) = setup(MockOptions::default()).await;
    let report = check::run(&ctx, &client, Scenario::WithoutPrecondition).await;

    assert!(report.passed(), "{report:#?}");
    assert_eq!(
        report.steps[2].line,
        "correctly refused to patch resource without If-Match header",
    );
    let store = mock.store.lock().unwrap();
    assert_eq!(store.hits, 6);
    assert!(store.resources.is_empty());
}

#[tokio::test]
async fn failed_creation_aborts_the_run() {
    let options = MockOptions { refuse_create: true, ..Default::default() };
    let (mock, ctx, client) = setup(options).await;
    let report = check::run(&ctx, &client, Scenario::WithPrecondition).await;

    assert!(!report.passed());
    assert!(report.aborted);
    assert_eq!(report.steps.len(), 1);
    assert_eq!(report.steps[0].step, Step::Create);
    assert!(!report.steps[0].passed);
    assert!(report.steps[0].line.starts_with("failed to create resource"));
    assert!(report.summary().contains("aborted"));
    assert_eq!(mock.store.lock().unwrap().hits, 1);
}

#[tokio::test]
async fn create_response_must_carry_etag() {
    let options = MockOptions { omit_etag_on_create: true, ..Default::default() };
    let (_mock, ctx, client) = setup(options).await;
    let report = check::run(&ctx, &client, Scenario::WithPrecondition).await;

    assert!(report.aborted);
    assert!(report.steps[0].line.contains("no ETag header"));
}

#[tokio::test]
async fn wrong_description_fails_verification_but_run_continues() {
    let options = MockOptions { lie_about_description: true, ..Default::default() };
    let (mock, ctx, client) = setup(options).await;
    let report = check::run(&ctx, &client, Scenario::WithPrecondition).await;

    assert!(!report.passed());
    assert!(!report.aborted);
    assert_eq!(report.steps.len(), 5);
    assert!(!report.steps[1].passed);
    assert!(report.steps[1].line.contains("description"));
    // Patch and delete still went through.
    assert!(report.steps[2].passed);
    assert!(report.steps[4].passed);
    assert_eq!(mock.store.lock().unwrap().hits, 6);
}

#[tokio::test]
async fn unenforced_precondition_fails_the_update_step() {
    let options = MockOptions { accept_patch_without_if_match: true, ..Default::default() };
    let (_mock, ctx, client) = setup(options).await;
    let report = check::run(&ctx, &client, Scenario::WithoutPrecondition).await;

    assert!(!report.passed());
    assert!(!report.aborted);
    assert!(!report.steps[2].passed);
    assert!(report.steps[2].line.contains("expected 400"));
    // The patch was wrongly applied, so the later retrieve fails too.
    assert!(!report.steps[3].passed);
}

#[tokio::test]
async fn stale_etag_precondition_rejects_the_update() {
    let options = MockOptions { bump_etag_behind_back: true, ..Default::default() };
    let (_mock, ctx, client) = setup(options).await;
    let report = check::run(&ctx, &client, Scenario::WithPrecondition).await;

    // The resource changed between create and patch, so the patch carries a
    // stale `If-Match` and a conforming API rejects it.
    assert!(!report.passed());
    assert!(!report.aborted);
    assert!(!report.steps[2].passed);
    assert!(report.steps[2].line.contains("does not match"));
    assert!(!report.steps[3].passed);
    assert!(report.steps[4].passed);
}

#[tokio::test]
async fn deletion_must_be_terminal() {
    let options = MockOptions { keep_after_delete: true, ..Default::default() };
    let (_mock, ctx, client) = setup(options).await;
    let report = check::run(&ctx, &client, Scenario::WithPrecondition).await;

    assert!(!report.passed());
    let delete = report.steps.last().unwrap();
    assert_eq!(delete.step, Step::Delete);
    assert!(!delete.passed);
    assert!(delete.line.contains("still retrievable"));
}


fn test_token() -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let claims = URL_SAFE_NO_PAD.encode(
        r#"{"iss":"https://login.example.com","sub":"users/conformance"}"#,
    );
    format!("{header}.{claims}.sig")
}

async fn setup(options: MockOptions) -> (MockApi, RequestContext, ApiClient) {
    let token = test_token();
    let mock = start_mock(&token, options).await;

    let config = ApiConfig {
        component: "examples".into(),
        scheme: "http".into(),
        authority: mock.authority.clone(),
        base_resource: "/".into(),
        resources_property: None,
    };
    let credential = token::load(&TokenConfig {
        value: Some(token),
        file: "token.txt".into(),
    }).unwrap();
    let ctx = RequestContext::new(&config, &credential).unwrap();
    let client = util::http_client().unwrap();

    (mock, ctx, client)
}


/// Ways in which the mock can deviate from a conforming API, plus one
/// conforming behavior (`bump_etag_behind_back`) that simulates a concurrent
/// modification between create and patch.
#[derive(Default)]
struct MockOptions {
    refuse_create: bool,
    omit_etag_on_create: bool,
    lie_about_description: bool,
    accept_patch_without_if_match: bool,
    bump_etag_behind_back: bool,
    keep_after_delete: bool,
}

#[derive(Default)]
struct Store {
    hits: u64,
    next_id: u64,
    resources: HashMap<String, StoredResource>,
}

struct StoredResource {
    body: Value,
    etag: u64,
}

struct MockApi {
    authority: String,
    store: Arc<Mutex<Store>>,
}

async fn start_mock(token: &str, options: MockOptions) -> MockApi {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let authority = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
    let store = Arc::new(Mutex::new(Store::default()));
    let options = Arc::new(options);
    let expected_auth = format!("BEARER {token}");

    let accept_store = Arc::clone(&store);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { continue };
            let store = Arc::clone(&accept_store);
            let options = Arc::clone(&options);
            let expected_auth = expected_auth.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let store = Arc::clone(&store);
                    let options = Arc::clone(&options);
                    let expected_auth = expected_auth.clone();
                    async move { handle(req, store, options, expected_auth).await }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    MockApi { authority, store }
}

async fn handle(
    req: Request<Incoming>,
    store: Arc<Mutex<Store>>,
    options: Arc<MockOptions>,
    expected_auth: String,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();

    let authorized = parts.headers.get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(expected_auth.as_str());
    if !authorized {
        return Ok(plain(StatusCode::UNAUTHORIZED, "unauthorized"));
    }

    let mut store = store.lock().unwrap();
    store.hits += 1;

    let path = parts.uri.path();
    let response = if parts.method == Method::POST && path == "/examples" {
        create(&mut store, &options, &body)
    } else if let Some(id) = path.strip_prefix("/examples/") {
        match parts.method {
            Method::GET => retrieve(&store, &options, id),
            Method::PATCH => patch(&mut store, &options, id, parts.headers.get(header::IF_MATCH), &body),
            Method::DELETE => delete(&mut store, &options, id),
            _ => plain(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
        }
    } else {
        plain(StatusCode::NOT_FOUND, "no such route")
    };
    Ok(response)
}

fn create(store: &mut Store, options: &MockOptions, body: &Bytes) -> Response<Full<Bytes>> {
    if options.refuse_create {
        return plain(StatusCode::INTERNAL_SERVER_ERROR, "the backend is sad today");
    }
    let Ok(resource) = serde_json::from_slice::<Value>(body) else {
        return plain(StatusCode::BAD_REQUEST, "invalid JSON");
    };

    store.next_id += 1;
    let id = store.next_id.to_string();
    let stored = StoredResource { body: resource, etag: 1 };

    // Deliberately a relative Location, as the original API family sends.
    let mut response = Response::builder()
        .status(StatusCode::CREATED)
        .header(header::LOCATION, format!("/examples/{id}"))
        .header(header::CONTENT_TYPE, "application/json");
    if !options.omit_etag_on_create {
        response = response.header(header::ETAG, quoted(stored.etag));
    }
    let response = response
        .body(Full::new(Bytes::from(stored.body.to_string())))
        .unwrap();
    store.resources.insert(id, stored);
    response
}

fn retrieve(store: &Store, options: &MockOptions, id: &str) -> Response<Full<Bytes>> {
    let Some(resource) = store.resources.get(id) else {
        return plain(StatusCode::NOT_FOUND, "no such resource");
    };
    let mut body = resource.body.clone();
    if options.lie_about_description {
        body["description"] = Value::from("suspiciously different");
    }
    Response::builder()
        .status(StatusCode::OK)
        .header(header::ETAG, quoted(resource.etag))
        .header(header::CONTENT_LOCATION, format!("/examples/{id}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn patch(
    store: &mut Store,
    options: &MockOptions,
    id: &str,
    if_match: Option<&HeaderValue>,
    body: &Bytes,
) -> Response<Full<Bytes>> {
    let Some(resource) = store.resources.get_mut(id) else {
        return plain(StatusCode::NOT_FOUND, "no such resource");
    };
    if options.bump_etag_behind_back {
        resource.etag += 1;
    }

    match if_match.and_then(|v| v.to_str().ok()) {
        None if !options.accept_patch_without_if_match => {
            return plain(StatusCode::BAD_REQUEST, "missing If-Match header");
        }
        Some(tag) if tag != quoted(resource.etag) => {
            return plain(StatusCode::BAD_REQUEST, "If-Match header does not match etag");
        }
        _ => {}
    }

    let Ok(patch) = serde_json::from_slice::<Value>(body) else {
        return plain(StatusCode::BAD_REQUEST, "invalid JSON");
    };
    apply_merge_patch(&mut resource.body, &patch);
    resource.etag += 1;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::ETAG, quoted(resource.etag))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(resource.body.to_string())))
        .unwrap()
}

fn delete(store: &mut Store, options: &MockOptions, id: &str) -> Response<Full<Bytes>> {
    let removed = if options.keep_after_delete {
        store.resources.get(id).map(|r| r.body.clone())
    } else {
        store.resources.remove(id).map(|r| r.body)
    };
    match removed {
        Some(body) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap(),
        None => plain(StatusCode::NOT_FOUND, "no such resource"),
    }
}

/// Shallow merge is all the fixed patch of the driver needs.
fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) else {
        return;
    };
    for (key, value) in patch {
        if value.is_null() {
            target.remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn quoted(etag: u64) -> String {
    format!("\"{etag}\"")
}

fn plain(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(message.to_owned())))
        .unwrap()
}
