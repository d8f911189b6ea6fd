//! The conformance driver: runs one full resource lifecycle against the API
//! and grades every step.

use std::fmt;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, StatusCode, Uri, header};
use serde::{Deserialize, Serialize};

use crate::{
    api::{self, MEDIA_TYPE_JSON, MEDIA_TYPE_MERGE_PATCH, RequestContext},
    prelude::*,
    util::ApiClient,
};

mod report;

pub use self::report::{RunReport, Step, StepReport};


/// The fixed payload every run creates.
const RESOURCE_TYPE: &str = "Example";
const INITIAL_DESCRIPTION: &str = "example resource";
const UPDATED_DESCRIPTION: &str = "better description";


/// The two update acceptance policies a run can exercise. Both drive the
/// same lifecycle; they differ only in whether the patch carries `If-Match`
/// and in what the server is expected to do about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    /// Send `If-Match` with the creation ETag; the patch must be accepted.
    WithPrecondition,
    /// Withhold `If-Match`; the server must reject the patch, proving it
    /// enforces its concurrency precondition.
    WithoutPrecondition,
}

impl Scenario {
    fn sends_if_match(self) -> bool {
        matches!(self, Self::WithPrecondition)
    }

    fn expected_update_status(self) -> StatusCode {
        match self {
            Self::WithPrecondition => StatusCode::OK,
            Self::WithoutPrecondition => StatusCode::BAD_REQUEST,
        }
    }

    /// What the resource's description must read after the update step: the
    /// new value if the patch was supposed to be accepted, the initial one
    /// if it was supposed to be rejected.
    fn description_after_update(self) -> &'static str {
        match self {
            Self::WithPrecondition => UPDATED_DESCRIPTION,
            Self::WithoutPrecondition => INITIAL_DESCRIPTION,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WithPrecondition => "with-precondition",
            Self::WithoutPrecondition => "without-precondition",
        };
        f.write_str(name)
    }
}


#[derive(Serialize)]
struct NewResource<'a> {
    #[serde(rename = "isA")]
    is_a: &'a str,
    description: &'a str,
}

/// The slice of a retrieved representation the checks care about. Anything
/// else the server sends is ignored.
#[derive(Deserialize)]
struct RetrievedResource {
    description: Option<String>,
}

/// What the create step captured: where the resource lives and its initial
/// concurrency token.
struct Created {
    url: Uri,
    etag: String,
}


/// Runs the full lifecycle: create, retrieve, patch, retrieve again, delete.
/// Strictly sequential, each step printing one line as it completes. A
/// failed creation aborts the run since no later step has a target; any
/// other failure is recorded and the run continues.
pub async fn run(ctx: &RequestContext, client: &ApiClient, scenario: Scenario) -> RunReport {
    info!(%scenario, collection = %ctx.collection_url(), "starting lifecycle conformance run");
    let mut report = RunReport::new(scenario);

    let (step, created) = create(ctx, client).await;
    record(&mut report, step);
    let Some(created) = created else {
        error!("resource creation failed, skipping all remaining steps");
        report.aborted = true;
        return report;
    };

    record(&mut report, verify(ctx, client, &created.url, INITIAL_DESCRIPTION).await);
    record(&mut report, update(ctx, client, &created, scenario).await);
    record(&mut report, verify(ctx, client, &created.url, scenario.description_after_update()).await);
    record(&mut report, delete(ctx, client, &created.url).await);

    debug!(passed = report.passed(), "lifecycle run finished");
    report
}

fn record(report: &mut RunReport, step: StepReport) {
    println!("{}", step.line);
    report.steps.push(step);
}

/// POSTs the fixed payload to the collection. Passing requires a 201 with
/// both a `Location` and an `ETag` header.
async fn create(ctx: &RequestContext, client: &ApiClient) -> (StepReport, Option<Created>) {
    let payload = NewResource { is_a: RESOURCE_TYPE, description: INITIAL_DESCRIPTION };
    let body = serde_json::to_vec(&payload).expect("failed to serialize fixed payload");
    let req = ctx.request(Method::POST, ctx.collection_url())
        .header(header::CONTENT_TYPE, MEDIA_TYPE_JSON)
        .body(Full::new(Bytes::from(body)))
        .expect("failed to build create request");

    let res = match api::exchange(client, req).await {
        Ok(res) => res,
        Err(e) => return (
            StepReport::fail(Step::Create, format!("failed to create resource: {e:#}")),
            None,
        ),
    };
    if res.status != StatusCode::CREATED {
        return (
            StepReport::fail(Step::Create, format!(
                "failed to create resource: {} {}", res.status, res.body_text(),
            )),
            None,
        );
    }

    let Some(location) = res.header(header::LOCATION) else {
        return (
            StepReport::fail(Step::Create, "failed to create resource: response carries no Location header"),
            None,
        );
    };
    let Some(etag) = res.header(header::ETAG).map(str::to_owned) else {
        return (
            StepReport::fail(Step::Create, "failed to create resource: response carries no ETag header"),
            None,
        );
    };
    let url = match ctx.resolve_location(location) {
        Ok(url) => url,
        Err(e) => return (
            StepReport::fail(Step::Create, format!("failed to create resource: {e:#}")),
            None,
        ),
    };

    let line = format!("correctly created resource. ETag: {etag} Location: {url}");
    (StepReport::pass(Step::Create, line), Some(Created { url, etag }))
}

/// GETs the resource and compares its description against `expected`.
async fn verify(
    ctx: &RequestContext,
    client: &ApiClient,
    url: &Uri,
    expected: &str,
) -> StepReport {
    let req = ctx.request(Method::GET, url)
        .body(Full::new(Bytes::new()))
        .expect("failed to build retrieve request");

    let res = match api::exchange(client, req).await {
        Ok(res) => res,
        Err(e) => return StepReport::fail(
            Step::Verify,
            format!("failed to retrieve resource: {e:#}"),
        ),
    };
    if res.status != StatusCode::OK {
        return StepReport::fail(Step::Verify, format!(
            "failed to retrieve resource: {} {}", res.status, res.body_text(),
        ));
    }

    match serde_json::from_slice::<RetrievedResource>(&res.body) {
        Ok(resource) if resource.description.as_deref() == Some(expected) => {
            StepReport::pass(Step::Verify, format!(
                "correctly retrieved resource. ETag: {} Content-Location: {}",
                res.header(header::ETAG).unwrap_or("-"),
                res.header(header::CONTENT_LOCATION).unwrap_or("-"),
            ))
        }
        Ok(resource) => {
            let got = match resource.description {
                Some(d) => format!("'{d}'"),
                None => "none at all".to_owned(),
            };
            StepReport::fail(Step::Verify, format!(
                "retrieved resource {url} but its description should be '{expected}' and is {got}",
            ))
        }
        Err(e) => StepReport::fail(Step::Verify, format!(
            "retrieved resource {url} but its body is not valid JSON: {e}",
        )),
    }
}

/// PATCHes the description with a merge patch. Depending on the scenario,
/// the request carries `If-Match` and must succeed, or omits it and must be
/// rejected.
async fn update(
    ctx: &RequestContext,
    client: &ApiClient,
    created: &Created,
    scenario: Scenario,
) -> StepReport {
    let patch = serde_json::json!({ "description": UPDATED_DESCRIPTION });
    let body = serde_json::to_vec(&patch).expect("failed to serialize fixed patch");
    let mut req = ctx.request(Method::PATCH, &created.url)
        .header(header::CONTENT_TYPE, MEDIA_TYPE_MERGE_PATCH);
    if scenario.sends_if_match() {
        req = req.header(header::IF_MATCH, &created.etag);
    }
    let req = req.body(Full::new(Bytes::from(body)))
        .expect("failed to build update request");

    let expected = scenario.expected_update_status();
    let res = match api::exchange(client, req).await {
        Ok(res) => res,
        Err(e) => return StepReport::fail(
            Step::Update,
            format!("failed to patch resource: {e:#}"),
        ),
    };
    if res.status != expected {
        return StepReport::fail(Step::Update, format!(
            "failed to patch resource: expected {expected}, got {} {}",
            res.status, res.body_text(),
        ));
    }

    let line = match scenario {
        Scenario::WithPrecondition => format!(
            "correctly patched resource. ETag: {}",
            res.header(header::ETAG).unwrap_or("-"),
        ),
        Scenario::WithoutPrecondition =>
            "correctly refused to patch resource without If-Match header".to_owned(),
    };
    StepReport::pass(Step::Update, line)
}

/// DELETEs the resource, then retrieves it once more to make sure deletion
/// is terminal.
async fn delete(ctx: &RequestContext, client: &ApiClient, url: &Uri) -> StepReport {
    let req = ctx.request(Method::DELETE, url)
        .body(Full::new(Bytes::new()))
        .expect("failed to build delete request");

    let res = match api::exchange(client, req).await {
        Ok(res) => res,
        Err(e) => return StepReport::fail(
            Step::Delete,
            format!("failed to delete resource: {e:#}"),
        ),
    };
    if res.status != StatusCode::OK {
        return StepReport::fail(Step::Delete, format!(
            "failed to delete {url}: {} {}", res.status, res.body_text(),
        ));
    }

    let req = ctx.request(Method::GET, url)
        .body(Full::new(Bytes::new()))
        .expect("failed to build delete confirmation request");
    match api::exchange(client, req).await {
        Ok(res) if res.status == StatusCode::NOT_FOUND =>
            StepReport::pass(Step::Delete, format!("correctly deleted {url}")),
        Ok(res) => StepReport::fail(Step::Delete, format!(
            "deleted {url} but it is still retrievable ({})", res.status,
        )),
        Err(e) => StepReport::fail(Step::Delete, format!(
            "deleted {url} but the confirming retrieve failed: {e:#}",
        )),
    }
}
