//! Services wired over SQLCipher repositories and a mock Google API.
//!
//! Covers the paths that cross crate boundaries: connecting an account,
//! a manual pull/push pass, webhook notifications feeding the dispatcher,
//! and quarantine when the provider rejects a refresh token.

mod support;

use std::sync::Arc;
use std::time::Duration;

use calsync_core::{
    ConnectionRepository, ConnectionService, EventRepository, LocalEventEditor, NewConnection,
    ProviderRegistry, SyncEngine, TokenLifecycleManager, WebhookSubscriptionManager,
};
use calsync_domain::{CalSyncError, EventContent, Provider, SyncTrigger, TokenGrant};
use calsync_infra::integrations::calendar::{google_notice, GoogleCalendarAdapter};
use calsync_infra::scheduling::{SyncDispatcher, SyncTarget};
use calsync_infra::NotificationRouter;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use support::{at, test_http_client, Repositories, TestDatabase};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    _db: TestDatabase,
    repos: Repositories,
    tokens: Arc<TokenLifecycleManager>,
    webhooks: Arc<WebhookSubscriptionManager>,
    connections: ConnectionService,
    engine: Arc<SyncEngine>,
    editor: LocalEventEditor,
}

impl Harness {
    fn new(server: &MockServer) -> Self {
        let db = TestDatabase::new();
        let repos = db.repositories();

        let client = calsync_domain::OAuthClientConfig {
            client_id: "client-id".into(),
            client_secret: "client-secret".into(),
            api_base_url: Some(server.uri()),
            token_url: Some(format!("{}/token", server.uri())),
        };
        let registry = Arc::new(
            ProviderRegistry::new()
                .with_adapter(Arc::new(GoogleCalendarAdapter::new(&client, test_http_client()))),
        );

        let tokens = Arc::new(TokenLifecycleManager::new(
            repos.connections.clone(),
            repos.credentials.clone(),
            registry.clone(),
        ));
        let webhooks = Arc::new(WebhookSubscriptionManager::new(
            repos.connections.clone(),
            repos.subscriptions.clone(),
            tokens.clone(),
            registry.clone(),
            "https://sync.example.com",
        ));
        let connections = ConnectionService::new(
            repos.connections.clone(),
            repos.calendars.clone(),
            repos.credentials.clone(),
            repos.subscriptions.clone(),
            repos.conflicts.clone(),
            tokens.clone(),
            webhooks.clone(),
        );
        let engine = Arc::new(SyncEngine::new(
            repos.connections.clone(),
            repos.calendars.clone(),
            repos.events.clone(),
            repos.conflicts.clone(),
            tokens.clone(),
            registry,
        ));
        let editor = LocalEventEditor::new(repos.connections.clone(), repos.events.clone());

        Self { _db: db, repos, tokens, webhooks, connections, engine, editor }
    }

    async fn connect(&self, expires_in: i64) -> String {
        let connection = self
            .connections
            .connect(
                NewConnection {
                    user_id: "user-1".into(),
                    provider: Provider::Google,
                    provider_account_id: "me@example.com".into(),
                    primary_calendar_name: Some("Me".into()),
                },
                TokenGrant {
                    access_token: "access-token".into(),
                    refresh_token: Some("refresh-token".into()),
                    expires_in: Some(expires_in),
                    scope: None,
                },
            )
            .await
            .expect("connect should succeed");
        connection.id
    }
}

fn google_event(id: &str, summary: &str) -> serde_json::Value {
    json!({
        "id": id,
        "status": "confirmed",
        "summary": summary,
        "updated": "2025-03-09T08:00:00.000Z",
        "start": {"dateTime": "2025-03-10T10:00:00Z"},
        "end": {"dateTime": "2025-03-10T11:00:00Z"}
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_sync_pulls_remote_events_and_pushes_local_ones() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"items": [google_event("remote-1", "Remote review")]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/calendars/primary/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(google_event("pushed-1", "Local focus")))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new(&server);
    let connection_id = harness.connect(86_400).await;

    let local = harness
        .editor
        .create(
            &connection_id,
            None,
            EventContent::new("Local focus", at(13), at(14)).expect("valid content"),
        )
        .await
        .expect("local create");

    let summary = harness
        .engine
        .sync_connection(&connection_id, SyncTrigger::Manual)
        .await
        .expect("sync should succeed");

    assert!(summary.skipped.is_none());
    assert_eq!(summary.pushed, 1);
    assert_eq!(summary.push_failures, 0);
    assert_eq!(summary.events_synced, 2);
    assert_eq!(summary.open_conflicts, 0);

    let pulled = harness
        .repos
        .events
        .find_by_provider_id(&connection_id, "primary", "remote-1")
        .await
        .expect("lookup")
        .expect("remote event mirrored");
    assert_eq!(pulled.content.summary, "Remote review");
    assert!(!pulled.is_dirty());

    let pushed = harness.repos.events.get(&local.id).await.expect("lookup").expect("local event");
    assert_eq!(pushed.provider_event_id.as_deref(), Some("pushed-1"));
    assert!(!pushed.is_dirty());

    let stored = harness.repos.connections.get(&connection_id).await.expect("get").expect("exists");
    assert!(stored.last_sync_at.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn webhook_notifications_trigger_a_sync_pass() {
    let server = MockServer::start().await;
    let expiration = (Utc::now() + ChronoDuration::days(7)).timestamp_millis().to_string();
    Mock::given(method("POST"))
        .and(path("/calendars/primary/events/watch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "api#channel",
            "id": "ch-1",
            "resourceId": "res-1",
            "expiration": expiration
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"items": [google_event("remote-1", "Pushed by webhook")]})),
        )
        .mount(&server)
        .await;

    let harness = Harness::new(&server);
    let connection_id = harness.connect(86_400).await;
    let subscription = harness.webhooks.subscribe(&connection_id).await.expect("subscribe");
    assert_eq!(subscription.channel_id, "ch-1");

    let target: Arc<dyn SyncTarget> = harness.engine.clone();
    let (dispatcher, mut worker) = SyncDispatcher::spawn(target, 8, 2);
    let router = NotificationRouter::new(harness.webhooks.clone(), dispatcher);

    let stale = google_notice(Some("unknown-channel"), Some("res-1"), Some("exists"))
        .expect("valid headers")
        .expect("not a handshake");
    let matching = google_notice(Some("ch-1"), Some("res-1"), Some("exists"))
        .expect("valid headers")
        .expect("not a handshake");
    let report = router.route(&[stale, matching]).await.expect("route");
    assert_eq!(report.accepted, 1);
    assert_eq!(report.ignored, 1);

    let mut mirrored = None;
    for _ in 0..100 {
        mirrored = harness
            .repos
            .events
            .find_by_provider_id(&connection_id, "primary", "remote-1")
            .await
            .expect("lookup");
        if mirrored.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    worker.shutdown(Duration::from_secs(5)).await.expect("dispatcher shutdown");

    let mirrored = mirrored.expect("webhook pass mirrored the remote event");
    assert_eq!(mirrored.content.summary, "Pushed by webhook");
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_refresh_token_quarantines_the_connection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked."
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new(&server);
    // Already inside the refresh threshold.
    let connection_id = harness.connect(60).await;

    let err = harness
        .engine
        .sync_connection(&connection_id, SyncTrigger::Manual)
        .await
        .expect_err("sync should require reauthorization");
    assert!(matches!(err, CalSyncError::ReauthRequired(_)));

    let stored = harness.repos.connections.get(&connection_id).await.expect("get").expect("exists");
    assert!(!stored.is_active);
    assert!(stored.deactivated_reason.is_some());

    // Quarantined connections are skipped without calling the provider.
    let summary = harness
        .engine
        .sync_connection(&connection_id, SyncTrigger::Reconciliation)
        .await
        .expect("skip is not an error");
    assert!(summary.skipped.is_some());

    // Re-authorizing lifts the quarantine.
    harness
        .tokens
        .register_grant(
            &connection_id,
            TokenGrant {
                access_token: "new-access".into(),
                refresh_token: Some("new-refresh".into()),
                expires_in: Some(3600),
                scope: None,
            },
        )
        .await
        .expect("register grant");
    let stored = harness.repos.connections.get(&connection_id).await.expect("get").expect("exists");
    assert!(stored.is_active);
}
