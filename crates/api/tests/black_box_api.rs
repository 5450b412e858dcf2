use std::sync::Arc;
use std::time::Duration;

use forgecrm_ai::SystemPromptCatalog;
use forgecrm_api::app::{AppServices, Collaborators, build_app};
use forgecrm_client::{
    ClientError, HttpJobApi, JobApi, JobTracker, PushSource, SessionIdentity, SseEventSource, SubmitJob,
    TrackerConfig,
};
use forgecrm_core::{JobState, UserId};
use forgecrm_infra::BulkEmailConfig;
use forgecrm_infra::messaging::{EmailTemplate, InMemoryMailTransport, TemplateCatalog};
use forgecrm_infra::records::InMemoryRecordStore;
use reqwest::StatusCode;
use serde_json::{Value, json};

struct TestServer {
    base_url: String,
    transport: Arc<InMemoryMailTransport>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let records = InMemoryRecordStore::from_json(json!([
            { "name": "A", "first_name": "Ada", "email": "ada@analytical.test", "status": "New" },
            { "name": "B", "first_name": "Bob", "email": "bob@builders.test", "status": "New" },
            { "name": "C", "first_name": "Cy", "email": "cy@cyber.test", "status": "Junk" },
            { "name": "N", "first_name": "Nemo", "status": "New" },
        ]))
        .expect("valid leads");

        let mut templates = TemplateCatalog::new();
        templates
            .insert(EmailTemplate {
                name: "welcome".to_string(),
                subject: "Welcome {{doc.first_name}}".to_string(),
                body: "<p>Hi {{doc.first_name}}</p>".to_string(),
            })
            .expect("valid template");

        let transport = Arc::new(InMemoryMailTransport::new());
        let collaborators = Collaborators {
            records: Arc::new(records),
            templates,
            prompts: SystemPromptCatalog::new(),
            transport: transport.clone(),
            mail_configured: false,
            text_generator: None,
        };
        let config = BulkEmailConfig {
            send_interval: Duration::ZERO,
            ..BulkEmailConfig::default()
        };

        // Build app (same router as prod), but bind to an ephemeral port.
        let services = AppServices::build(&config, collaborators).await.expect("services");
        let app = build_app(Arc::new(services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            transport,
            handle,
        }
    }

    fn api(&self, identity: SessionIdentity) -> HttpJobApi {
        HttpJobApi::new(self.base_url.clone(), identity).unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn grace() -> SessionIdentity {
    SessionIdentity::new(UserId::new())
        .with_email("grace@forge.test")
        .with_full_name("Grace")
}

fn fast() -> TrackerConfig {
    TrackerConfig {
        poll_interval: Duration::from_millis(20),
        max_consecutive_errors: 3,
    }
}

async fn submit_raw(srv: &TestServer, user: UserId, body: Value) -> (StatusCode, Value) {
    let res = reqwest::Client::new()
        .post(format!("{}/bulk-email/jobs", srv.base_url))
        .header("x-user-id", user.to_string())
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = res.status();
    (status, res.json().await.unwrap_or(Value::Null))
}

#[tokio::test]
async fn session_required_for_bulk_email_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(format!("{}/health", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(format!("{}/bulk-email/status", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthenticated");
}

#[tokio::test]
async fn test_mode_job_is_tracked_to_a_finished_summary() {
    let srv = TestServer::spawn().await;
    let api = Arc::new(srv.api(grace()));
    let push: Box<dyn PushSource> = Box::new(SseEventSource::connect(&api).await.unwrap());

    let job_id = api
        .submit(&SubmitJob::for_recipients(["A", "B", "C"], "welcome").test_mode(true))
        .await
        .unwrap();

    let summary = JobTracker::new(api.clone(), fast())
        .track(job_id, Some(push))
        .wait()
        .await
        .unwrap();

    assert_eq!(summary.status, JobState::Finished);
    assert_eq!((summary.sent, summary.failed, summary.total), (3, 0, 3));
    let order: Vec<&str> = summary.outcomes.iter().map(|o| o.recipient_id.as_str()).collect();
    assert_eq!(order, ["A", "B", "C"]);
    assert!(
        summary
            .outcomes
            .iter()
            .all(|o| o.delivered_to.as_deref() == Some("grace@forge.test"))
    );

    let sent = srv.transport.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|m| m.recipient == "grace@forge.test"));
    assert_eq!(sent[0].subject, "Welcome Ada");
}

#[tokio::test]
async fn partial_failures_complete_with_errors() {
    let srv = TestServer::spawn().await;
    let api = Arc::new(srv.api(grace()));

    let job_id = api
        .submit(&SubmitJob::for_filter(json!({ "status": "New" }), "welcome"))
        .await
        .unwrap();
    let summary = JobTracker::new(api, fast()).track(job_id, None).wait().await.unwrap();

    assert_eq!(summary.status, JobState::CompletedWithErrors);
    assert_eq!((summary.sent, summary.failed), (2, 1));
    let failed: Vec<_> = summary.failed_outcomes().collect();
    assert_eq!(failed[0].recipient_id, "N");
    assert_eq!(failed[0].error.as_deref(), Some("lead has no email address"));
    assert!(summary.render().contains("N: lead has no email address"));
}

#[tokio::test]
async fn submission_errors_create_no_job() {
    let srv = TestServer::spawn().await;
    let user = UserId::new();

    let cases = [
        (
            json!({ "filter": { "status": "Converted" }, "template_ref": "welcome" }),
            StatusCode::UNPROCESSABLE_ENTITY,
            "empty_selection",
        ),
        (
            json!({ "filter": {}, "template_ref": "welcome" }),
            StatusCode::BAD_REQUEST,
            "unconfirmed_filter",
        ),
        (
            json!({ "recipient_ids": ["A"], "filter": { "status": "New" }, "template_ref": "welcome" }),
            StatusCode::BAD_REQUEST,
            "selection_mode",
        ),
        (
            json!({ "template_ref": "welcome" }),
            StatusCode::BAD_REQUEST,
            "selection_mode",
        ),
        (
            json!({ "filter": { "status": ["between", 1] }, "template_ref": "welcome" }),
            StatusCode::BAD_REQUEST,
            "resolution_error",
        ),
        (
            json!({ "recipient_ids": "A" }),
            StatusCode::BAD_REQUEST,
            "invalid_request",
        ),
    ];

    for (body, status, code) in cases {
        let (got_status, got_body) = submit_raw(&srv, user, body.clone()).await;
        assert_eq!(got_status, status, "{body}");
        assert_eq!(got_body["error"], code, "{body}");
    }

    let res = reqwest::Client::new()
        .get(format!("{}/bulk-email/jobs", srv.base_url))
        .header("x-user-id", user.to_string())
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["jobs"], json!([]));
    assert!(srv.transport.sent().is_empty());
}

#[tokio::test]
async fn confirmed_unfiltered_selection_reaches_every_lead() {
    let srv = TestServer::spawn().await;
    let api = Arc::new(srv.api(grace()));

    let job_id = api
        .submit(&SubmitJob::for_filter(json!({}), "welcome").confirm_unfiltered().test_mode(true))
        .await
        .unwrap();
    let summary = JobTracker::new(api, fast()).track(job_id, None).wait().await.unwrap();
    assert_eq!(summary.total, 4);
}

#[tokio::test]
async fn jobs_are_scoped_to_their_initiator() {
    let srv = TestServer::spawn().await;
    let owner = Arc::new(srv.api(grace()));
    let stranger = srv.api(SessionIdentity::new(UserId::new()));

    let job_id = owner
        .submit(&SubmitJob::for_recipients(["A"], "welcome"))
        .await
        .unwrap();

    assert_eq!(stranger.status(job_id).await, Err(ClientError::NotFound(job_id)));
    JobTracker::new(owner.clone(), fast()).track(job_id, None).wait().await.unwrap();

    let res = reqwest::Client::new()
        .get(format!("{}/bulk-email/jobs/not-a-job", srv.base_url))
        .header("x-user-id", UserId::new().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");
}

#[tokio::test]
async fn listing_is_newest_first() {
    let srv = TestServer::spawn().await;
    let identity = grace();
    let user = identity.user_id;
    let api = Arc::new(srv.api(identity));
    let tracker = JobTracker::new(api.clone(), fast());

    let first = api.submit(&SubmitJob::for_recipients(["A"], "welcome")).await.unwrap();
    tracker.track(first, None).wait().await.unwrap();
    let second = api.submit(&SubmitJob::for_recipients(["B"], "welcome")).await.unwrap();
    tracker.track(second, None).wait().await.unwrap();

    let res = reqwest::Client::new()
        .get(format!("{}/bulk-email/jobs?limit=10", srv.base_url))
        .header("x-user-id", user.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let ids: Vec<&str> = body["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["job_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, [second.to_string(), first.to_string()]);
    assert_eq!(body["jobs"][0]["status"], "finished");
}

#[tokio::test]
async fn stream_only_carries_the_sessions_own_events() {
    let srv = TestServer::spawn().await;
    let alice = Arc::new(srv.api(grace()));
    let bob = Arc::new(srv.api(SessionIdentity::new(UserId::new()).with_email("bob@forge.test")));

    let mut bob_stream = SseEventSource::connect(&bob).await.unwrap();

    let alice_job = alice.submit(&SubmitJob::for_recipients(["A"], "welcome")).await.unwrap();
    JobTracker::new(alice.clone(), fast()).track(alice_job, None).wait().await.unwrap();

    let bob_job = bob.submit(&SubmitJob::for_recipients(["N"], "welcome")).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), bob_stream.next_event())
        .await
        .expect("terminal event for bob")
        .expect("stream open");

    assert_eq!(event.job_id, bob_job);
    assert_eq!(event.status, JobState::Failed);
    assert_eq!((event.successful_count, event.failed_count), (0, 1));
}

#[tokio::test]
async fn service_status_reports_collaborators() {
    let srv = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .get(format!("{}/bulk-email/status", srv.base_url))
        .header("x-user-id", UserId::new().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["ai_configured"], false);
    assert_eq!(body["mail_configured"], false);
    assert_eq!(body["status_store"], "memory");
    assert_eq!(body["templates"], json!(["welcome"]));
    assert_eq!(body["active_jobs"], 0);
}

#[tokio::test]
async fn preview_renders_one_lead_without_sending() {
    let srv = TestServer::spawn().await;
    let user = UserId::new();
    let client = reqwest::Client::new();
    let preview = |body: Value| {
        client
            .post(format!("{}/bulk-email/preview", srv.base_url))
            .header("x-user-id", user.to_string())
            .json(&body)
            .send()
    };

    let res = preview(json!({ "recipient_id": "N", "template_ref": "welcome" })).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["recipient_id"], "N");
    assert_eq!(body["subject"], "Welcome Nemo");
    assert_eq!(body["content"], "<p>Hi Nemo</p>");
    assert_eq!(body["model_used"], Value::Null);

    let res = preview(json!({ "recipient_id": "ghost", "template_ref": "welcome" })).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let res = preview(json!({
        "recipient_id": "A",
        "template_ref": "default",
        "generation": { "mode": "ai", "tone": "friendly" },
    }))
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "ai_unavailable");

    assert!(srv.transport.sent().is_empty());
    let res = client
        .get(format!("{}/bulk-email/jobs", srv.base_url))
        .header("x-user-id", user.to_string())
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["jobs"], json!([]));
}
