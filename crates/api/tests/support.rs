#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use calsync_api::{router, AppContext};
use calsync_common::testing::TEST_DB_KEY;
use calsync_domain::{CalDavConfig, Config, DatabaseConfig, OAuthClientConfig, ProvidersConfig};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::MockServer;

pub const PUBLIC_BASE_URL: &str = "https://sync.example.com";

/// ID token whose payload carries `{"email":"me@example.com"}`.
pub const ID_TOKEN: &str = "eyJhbGciOiJub25lIn0.eyJlbWFpbCI6Im1lQGV4YW1wbGUuY29tIn0.sig";

/// Application context over a temporary encrypted database, with Google and
/// CalDAV pointed at a mock server.
pub struct TestApp {
    pub ctx: Arc<AppContext>,
    pub router: Router,
    pub server: MockServer,
    _temp_dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let server = MockServer::start().await;
        let temp_dir = TempDir::new().expect("temp dir should be created");

        let mut config = Config {
            database: DatabaseConfig {
                path: temp_dir.path().join("calsync-api.db").display().to_string(),
                pool_size: 4,
                encryption_key: Some(TEST_DB_KEY.to_string()),
            },
            providers: ProvidersConfig {
                google: Some(OAuthClientConfig {
                    client_id: "client-id".into(),
                    client_secret: "client-secret".into(),
                    api_base_url: Some(server.uri()),
                    token_url: Some(format!("{}/token", server.uri())),
                }),
                outlook: None,
                apple: None,
                caldav: Some(CalDavConfig { base_url: format!("{}/dav/", server.uri()) }),
            },
            ..Config::default()
        };
        config.server.public_base_url = PUBLIC_BASE_URL.to_string();
        config.sync.provider_timeout_secs = 5;

        let ctx = Arc::new(AppContext::new(config).await.expect("context should build"));
        let router = router(Arc::clone(&ctx));
        Self { ctx, router, server, _temp_dir: temp_dir }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response =
            self.router.clone().oneshot(request).await.expect("router should not fail");
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body should read");
        (status, body.to_vec())
    }

    pub async fn json(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request should build");

        let (status, bytes) = self.send(request).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response should be JSON")
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.json(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.json(Method::POST, uri, Some(body)).await
    }

    /// Link a CalDAV account for `user_id` and return the connection id.
    pub async fn connect_caldav(&self, user_id: &str, username: &str) -> String {
        let (status, body) = self
            .post(
                "/connections",
                serde_json::json!({
                    "user_id": user_id,
                    "provider": "caldav",
                    "username": username,
                    "app_password": "app-password"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "connect failed: {body}");
        body["id"].as_str().expect("connection id").to_string()
    }

    pub async fn shutdown(&self) {
        self.ctx.shutdown().await.expect("context should shut down");
    }
}
