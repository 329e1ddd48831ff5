//! Integration tests for the HTTP-facing pieces: `WebhookNotifier` and the
//! `HttpHookWork` payload.
//!
//! Uses `wiremock` to stand up a local HTTP server for each test so no real
//! network traffic is made.

use std::sync::Arc;
use std::time::Duration;

use dsched_core::{parse_jobs_file, JobPolicy, JobStatus};
use dsched_db::MemoryStore;
use dsched_scheduler::{
    job_from_definition, ExecutionHandler, HttpHookWork, Job, Notifier, NotifyError,
    WebhookNotifier,
};
use serde_json::{json, Map, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn options(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn single_attempt() -> JobPolicy {
    JobPolicy {
        retry_count: 1,
        retry_delay: Duration::ZERO,
        timeout: Duration::from_secs(5),
        ..JobPolicy::default()
    }
}

// ---------------------------------------------------------------------------
// WebhookNotifier
// ---------------------------------------------------------------------------

#[tokio::test]
async fn webhook_posts_alert_json() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/alerts"))
        .and(body_partial_json(json!({
            "title": "Job failed: Order sync",
            "message": "boom",
            "level": "error",
            "source": "scheduler"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let notifier =
        WebhookNotifier::new(format!("{}/alerts", server.uri()), Duration::from_secs(5)).unwrap();
    notifier
        .notify("Job failed: Order sync", "boom")
        .await
        .unwrap();
}

#[tokio::test]
async fn webhook_non_success_status_is_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let notifier = WebhookNotifier::new(server.uri(), Duration::from_secs(5)).unwrap();
    let err = notifier.notify("title", "message").await.unwrap_err();

    assert!(
        matches!(err, NotifyError::UnexpectedStatus { status: 502 }),
        "expected UnexpectedStatus(502), got: {err:?}"
    );
}

#[tokio::test]
async fn failed_job_is_delivered_through_webhook() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/alerts"))
        .and(body_partial_json(json!({ "title": "Job failed: Order sync" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/hooks/order-sync"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let notifier =
        WebhookNotifier::new(format!("{}/alerts", server.uri()), Duration::from_secs(5)).unwrap();
    let handler = ExecutionHandler::new(Arc::new(MemoryStore::new()), Arc::new(notifier));

    let work = HttpHookWork::from_options(
        reqwest::Client::new(),
        &options(json!({ "url": format!("{}/hooks/order-sync", server.uri()) })),
    )
    .unwrap();
    let job = Job::new("order_sync", "Order sync", Arc::new(work)).with_policy(single_attempt());

    let result = handler.handle_fire(&job).await;
    assert_eq!(result.status(), JobStatus::Failed);
    assert_eq!(
        result.error(),
        Some("hook returned HTTP 500 Internal Server Error: upstream down")
    );
}

// ---------------------------------------------------------------------------
// HttpHookWork
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hook_json_response_becomes_result() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hooks/collect"))
        .and(header("x-dsched-job-id", "daily_collection"))
        .and(header("x-dsched-attempt", "1"))
        .and(body_partial_json(json!({ "supplier": "all" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "collected": 128 })))
        .expect(1)
        .mount(&server)
        .await;

    let yaml = format!(
        r"
jobs:
  - id: daily_collection
    name: Daily collection
    retry_count: 1
    trigger: {{ kind: cron, fields: {{ hour: 2 }} }}
    options:
      url: {}/hooks/collect
      body: {{ supplier: all }}
",
        server.uri()
    );
    let file = parse_jobs_file(&yaml).unwrap();
    let job = job_from_definition(&file.jobs[0], &reqwest::Client::new()).unwrap();

    let result = job.run().await;

    assert_eq!(result.status(), JobStatus::Completed);
    assert_eq!(result.result(), Some(&json!({ "collected": 128 })));
    assert_eq!(
        result.statistics().and_then(|s| s.get("status_code")),
        Some(&json!(200))
    );
}

#[tokio::test]
async fn hook_text_response_is_wrapped() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/hooks/report"))
        .respond_with(ResponseTemplate::new(200).set_body_string("report queued"))
        .mount(&server)
        .await;

    let work = HttpHookWork::from_options(
        reqwest::Client::new(),
        &options(json!({
            "url": format!("{}/hooks/report", server.uri()),
            "method": "GET"
        })),
    )
    .unwrap();
    let job = Job::new("report_generation", "Report", Arc::new(work)).with_policy(single_attempt());

    let result = job.run().await;

    assert_eq!(result.status(), JobStatus::Completed);
    assert_eq!(result.result(), Some(&json!("report queued")));
}

#[tokio::test]
async fn hook_error_body_is_cut_to_a_short_preview() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hooks/ascii"))
        .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(1 << 20)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hooks/hangul"))
        .respond_with(ResponseTemplate::new(502).set_body_string("재고".repeat(5_000)))
        .mount(&server)
        .await;

    let run = |route: &str| {
        let work = HttpHookWork::from_options(
            reqwest::Client::new(),
            &options(json!({ "url": format!("{}/hooks/{route}", server.uri()) })),
        )
        .unwrap();
        Job::new("inventory_update", "Inventory", Arc::new(work)).with_policy(single_attempt())
    };

    let ascii = run("ascii").run().await;
    assert_eq!(ascii.status(), JobStatus::Failed);
    let expected = format!("hook returned HTTP 500 Internal Server Error: {}", "x".repeat(200));
    assert_eq!(ascii.error(), Some(expected.as_str()));

    let hangul = run("hangul").run().await;
    let expected = format!("hook returned HTTP 502 Bad Gateway: {}", "재고".repeat(100));
    assert_eq!(hangul.error(), Some(expected.as_str()));
}

#[tokio::test]
async fn hook_retries_until_success() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/hooks/prices"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/hooks/prices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "updated": 9 })))
        .mount(&server)
        .await;

    let work = HttpHookWork::from_options(
        reqwest::Client::new(),
        &options(json!({
            "url": format!("{}/hooks/prices", server.uri()),
            "method": "PUT"
        })),
    )
    .unwrap();
    let job = Job::new("price_adjustment", "Price adjustment", Arc::new(work)).with_policy(
        JobPolicy {
            retry_count: 3,
            ..single_attempt()
        },
    );

    let result = job.run().await;

    assert_eq!(result.status(), JobStatus::Completed);
    assert_eq!(result.attempts(), 2);
    assert_eq!(result.result(), Some(&json!({ "updated": 9 })));
}

#[tokio::test]
async fn hook_slow_endpoint_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hooks/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let work = HttpHookWork::from_options(
        reqwest::Client::new(),
        &options(json!({ "url": format!("{}/hooks/slow", server.uri()) })),
    )
    .unwrap();
    let job = Job::new("inventory_update", "Inventory", Arc::new(work)).with_policy(JobPolicy {
        timeout: Duration::from_millis(200),
        ..single_attempt()
    });

    let result = job.run().await;

    assert_eq!(result.status(), JobStatus::Failed);
    assert_eq!(result.error(), Some("timeout after 0.2s"));
}
