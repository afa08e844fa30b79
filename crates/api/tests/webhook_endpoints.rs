//! Inbound webhook endpoints driven through the router.

mod support;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::Value;
use support::TestApp;

fn google_request(channel_id: Option<&str>, state: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/webhooks/google")
        .header("x-goog-resource-id", "res-1")
        .header("x-goog-resource-state", state);
    if let Some(channel_id) = channel_id {
        builder = builder.header("x-goog-channel-id", channel_id);
    }
    builder.body(Body::empty()).expect("request should build")
}

#[tokio::test(flavor = "multi_thread")]
async fn outlook_validation_token_is_echoed_as_plain_text() {
    let app = TestApp::new().await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/webhooks/outlook?validationToken=Validation%3A%20Testing%20client")
        .body(Body::empty())
        .expect("request should build");
    let response = {
        use tower::ServiceExt;
        app.router.clone().oneshot(request).await.expect("router should not fail")
    };

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("text/plain")
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
    assert_eq!(&body[..], b"Validation: Testing client");
}

#[tokio::test(flavor = "multi_thread")]
async fn google_sync_handshake_is_acknowledged() {
    let app = TestApp::new().await;
    let (status, _) = app.send(google_request(Some("ch-new"), "sync")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn google_notice_without_channel_is_rejected() {
    let app = TestApp::new().await;
    let (status, body) = app.send(google_request(None, "exists")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).expect("error body is JSON");
    assert_eq!(body["error"], "invalid_input");
    assert!(body["message"].as_str().is_some_and(|m| m.contains("x-goog-channel-id")));
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_channels_are_acknowledged_without_a_pass() {
    let app = TestApp::new().await;

    let (status, _) = app.send(google_request(Some("unknown-channel"), "exists")).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = app
        .post(
            "/webhooks/outlook",
            serde_json::json!({
                "value": [
                    {"subscriptionId": "sub-unknown", "changeType": "updated"},
                    {"subscriptionId": "sub-unknown", "changeType": "deleted"}
                ]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(app.ctx.dispatcher.pending_len(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_outlook_batch_is_rejected() {
    let app = TestApp::new().await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/webhooks/outlook")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .expect("request should build");
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).expect("error body is JSON");
    assert_eq!(body["error"], "invalid_input");
}
