//! End-to-end pipeline tests.
//!
//! Every job runs through the real worker pool against fake engine scripts
//! and a wiremock callback receiver, submitted over HTTP.
#![cfg(unix)]

mod common;

use common::{convert_form, Behavior, Engines, TestHarness};
use dr_core::events::EventPayload;
use dr_core::{JobId, JobStatus};
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CALLBACK_PATH: &str = "/check/responseBalikConvert";

async fn submit(addr: std::net::SocketAddr, key: &str, callback: &str) -> JobId {
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/convert"))
        .multipart(convert_form(key, &format!("{key}.docx"), callback))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["job_id"].as_str().unwrap().parse().unwrap()
}

async fn receiver(status: u16, body: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CALLBACK_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(&server)
        .await;
    server
}

fn confirmed() -> serde_json::Value {
    serde_json::json!({"upload_data": {"file": "A123.pdf"}})
}

// ---------------------------------------------------------------------------
// Success path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn confirmed_delivery_completes_and_cleans_up() {
    let receiver = receiver(200, confirmed()).await;
    let (harness, addr) =
        TestHarness::with_server(Engines::new(Behavior::Succeed, Behavior::Succeed)).await;

    let id = submit(addr, "A123", &receiver.uri()).await;
    let record = harness.wait_for_terminal(id).await;

    assert_eq!(record.status, JobStatus::Completed);
    let result = record.result.expect("completed job carries a result");
    assert_eq!(result.engine_used, "libreoffice");
    assert_eq!(result.output_bytes, 4096);
    assert_eq!(result.callback_status, 200);
    assert_eq!(result.delivery_attempts, 1);
    assert!(result.files_cleaned);
    assert_eq!(result.callback_url, format!("{}{CALLBACK_PATH}", receiver.uri()));

    let dir = harness.local_dir();
    assert!(!dir.join("A123.docx").exists());
    assert!(!dir.join("A123.pdf").exists());

    let requests = receiver.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"docupload\""));
    assert!(body.contains("filename=\"A123.pdf\""));
    assert!(body.contains("application/pdf"));

    harness.shutdown().await;
}

#[tokio::test]
async fn upload_variant_uses_upload_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/check/responseBalikUpload"))
        .and(header_exists("user-agent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(confirmed()))
        .expect(1)
        .mount(&server)
        .await;

    let (harness, addr) =
        TestHarness::with_server(Engines::new(Behavior::Succeed, Behavior::Succeed)).await;

    let form = convert_form("U7", "U7.docx", &server.uri()).text("endpoint", "upload");
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/convert"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: serde_json::Value = resp.json().await.unwrap();
    let id: JobId = body["job_id"].as_str().unwrap().parse().unwrap();

    let record = harness.wait_for_terminal(id).await;
    assert_eq!(record.status, JobStatus::Completed);

    harness.shutdown().await;
}

#[tokio::test]
async fn falls_back_when_primary_missing() {
    let receiver = receiver(200, confirmed()).await;
    let (harness, addr) =
        TestHarness::with_server(Engines::new(Behavior::Missing, Behavior::Succeed)).await;

    let id = submit(addr, "B9", &receiver.uri()).await;
    let record = harness.wait_for_terminal(id).await;

    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.result.unwrap().engine_used, "native-office");

    harness.shutdown().await;
}

#[tokio::test]
async fn falls_back_when_primary_crashes() {
    let receiver = receiver(200, confirmed()).await;
    let (harness, addr) =
        TestHarness::with_server(Engines::new(Behavior::Crash, Behavior::Succeed)).await;

    let id = submit(addr, "C1", &receiver.uri()).await;
    let record = harness.wait_for_terminal(id).await;

    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.result.unwrap().engine_used, "native-office");

    let attempts: Vec<_> = harness
        .ctx
        .event_bus
        .recent_events(100)
        .into_iter()
        .filter_map(|e| match e.payload {
            EventPayload::EngineAttempt {
                job_id,
                engine,
                succeeded,
                ..
            } if job_id == id => Some((engine, succeeded)),
            _ => None,
        })
        .collect();
    // Newest first.
    assert_eq!(
        attempts,
        vec![
            ("native-office".to_string(), true),
            ("libreoffice".to_string(), false),
        ]
    );

    harness.shutdown().await;
}

// ---------------------------------------------------------------------------
// Conversion failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hung_primary_and_missing_secondary_fail_with_both_reasons() {
    let receiver = receiver(200, confirmed()).await;
    let (harness, addr) =
        TestHarness::with_server(Engines::new(Behavior::Hang, Behavior::Missing)).await;

    let started = std::time::Instant::now();
    let id = submit(addr, "H1", &receiver.uri()).await;
    let record = harness.wait_for_terminal(id).await;

    assert_eq!(record.status, JobStatus::Failed);
    let error = record.error.expect("failed job carries an error");
    assert!(error.contains("timeout") || error.contains("timed out"), "{error}");
    assert!(error.contains("engine unavailable"), "{error}");
    // Timeout plus grace, nowhere near the 60s the script sleeps.
    assert!(started.elapsed() < std::time::Duration::from_secs(15));

    assert!(receiver.received_requests().await.unwrap().is_empty());

    harness.shutdown().await;
}

#[tokio::test]
async fn empty_output_is_a_failure() {
    let receiver = receiver(200, confirmed()).await;
    let (harness, addr) =
        TestHarness::with_server(Engines::new(Behavior::Empty, Behavior::Missing)).await;

    let id = submit(addr, "E0", &receiver.uri()).await;
    let record = harness.wait_for_terminal(id).await;

    assert_eq!(record.status, JobStatus::Failed);
    assert!(receiver.received_requests().await.unwrap().is_empty());

    harness.shutdown().await;
}

// ---------------------------------------------------------------------------
// Delivery outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn client_error_is_not_retried_and_keeps_artifacts() {
    let receiver = receiver(404, serde_json::json!({"message": "no such record"})).await;
    let (harness, addr) =
        TestHarness::with_server(Engines::new(Behavior::Succeed, Behavior::Succeed)).await;

    let id = submit(addr, "N404", &receiver.uri()).await;
    let record = harness.wait_for_terminal(id).await;

    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error.unwrap().contains("404"));
    assert_eq!(receiver.received_requests().await.unwrap().len(), 1);

    let dir = harness.local_dir();
    assert!(dir.join("N404.docx").exists());
    assert!(dir.join("N404.pdf").exists());

    harness.shutdown().await;
}

#[tokio::test]
async fn server_errors_retry_up_to_the_policy_limit() {
    let receiver = receiver(503, serde_json::json!({})).await;
    let (harness, addr) =
        TestHarness::with_server(Engines::new(Behavior::Succeed, Behavior::Succeed)).await;

    let id = submit(addr, "S503", &receiver.uri()).await;
    let record = harness.wait_for_terminal(id).await;

    assert_eq!(record.status, JobStatus::Failed);
    let max = harness.ctx.config.delivery.callback.max_attempts as usize;
    assert_eq!(receiver.received_requests().await.unwrap().len(), max);
    assert!(harness.local_dir().join("S503.pdf").exists());

    harness.shutdown().await;
}

#[tokio::test]
async fn unconfirmed_success_keeps_artifacts() {
    let receiver = receiver(200, serde_json::json!({"status": "ok"})).await;
    let (harness, addr) =
        TestHarness::with_server(Engines::new(Behavior::Succeed, Behavior::Succeed)).await;

    let id = submit(addr, "K2", &receiver.uri()).await;
    let record = harness.wait_for_terminal(id).await;

    assert_eq!(record.status, JobStatus::Completed);
    let result = record.result.unwrap();
    assert!(!result.files_cleaned);
    assert_eq!(result.callback_response["status"], "ok");

    let dir = harness.local_dir();
    assert!(dir.join("K2.docx").exists());
    assert!(dir.join("K2.pdf").exists());

    harness.shutdown().await;
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_key_jobs_never_overlap() {
    let receiver = receiver(200, confirmed()).await;
    // The exclusive engine exits non-zero if a second copy starts while the
    // first is still running; the secondary is missing so that would fail the job.
    let (harness, addr) = TestHarness::with_server_config(
        Engines::new(Behavior::Exclusive, Behavior::Missing),
        |cfg| cfg.workers.count = 3,
    )
    .await;

    let first = submit(addr, "SAME", &receiver.uri()).await;
    let second = submit(addr, "SAME", &receiver.uri()).await;

    let a = harness.wait_for_terminal(first).await;
    let b = harness.wait_for_terminal(second).await;
    assert_eq!(a.status, JobStatus::Completed, "{:?}", a.error);
    assert_eq!(b.status, JobStatus::Completed, "{:?}", b.error);
    assert_eq!(receiver.received_requests().await.unwrap().len(), 2);

    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lifecycle_events_are_ordered() {
    let receiver = receiver(200, confirmed()).await;
    let (harness, addr) =
        TestHarness::with_server(Engines::new(Behavior::Succeed, Behavior::Succeed)).await;
    let mut rx = harness.ctx.event_bus.subscribe();

    let id = submit(addr, "EV1", &receiver.uri()).await;

    let mut kinds = Vec::new();
    loop {
        let event = tokio::time::timeout(std::time::Duration::from_secs(20), rx.recv())
            .await
            .expect("timed out waiting for events")
            .unwrap();
        if event.payload.job_id() != Some(id) {
            continue;
        }
        let terminal = event.payload.is_terminal();
        kinds.push(match event.payload {
            EventPayload::JobQueued { .. } => "queued",
            EventPayload::JobStarted { .. } => "started",
            EventPayload::EngineAttempt { .. } => "engine",
            EventPayload::DeliveryAttempt { .. } => "delivery",
            EventPayload::JobCompleted { .. } => "completed",
            EventPayload::JobFailed { .. } => "failed",
            EventPayload::ProcessesReaped { .. } => "reaped",
        });
        if terminal {
            break;
        }
    }
    assert_eq!(
        kinds,
        vec!["queued", "started", "engine", "delivery", "completed"]
    );

    harness.shutdown().await;
}
