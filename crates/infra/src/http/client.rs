use std::time::Duration;

use calsync_common::RetryStrategy;
use calsync_domain::{CalSyncError, Result};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, warn};

use crate::errors::InfraError;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);
/// Longest `Retry-After` hint honored before giving the response back.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Shared HTTP client for the provider adapters.
///
/// [`HttpClient::send`] retries rate limits, 5xx and connection failures
/// following a [`RetryStrategy`], honoring short `Retry-After` hints. It is
/// meant for idempotent calls (listing, PUT upserts, deletes). Anything that
/// allocates a resource on the provider side (event inserts, watch channels,
/// token exchanges) goes through [`HttpClient::send_once`].
#[derive(Clone)]
pub struct HttpClient {
    client: ReqwestClient,
    retry: RetryStrategy,
}

impl HttpClient {
    /// Start from the default timeouts and retry policy.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Client with default settings.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Start a request; send it with [`send`](Self::send) or [`send_once`](Self::send_once).
    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    /// Send with retries. Non-retryable statuses are returned as responses so
    /// adapters can map them; only transport failures become errors.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            let request = builder
                .try_clone()
                .ok_or_else(|| CalSyncError::Internal("provider request body is a stream".into()))?
                .build()
                .map_err(InfraError::from)?;
            let method = request.method().clone();
            let url = redacted_url(request.url());
            let last_attempt = attempt + 1 >= attempts;

            match self.client.execute(request).await {
                Ok(response) => {
                    let status = response.status();
                    debug!(attempt = attempt + 1, %method, %url, %status, "provider response");
                    if last_attempt || !is_retryable_status(status) {
                        return Ok(response);
                    }
                    let delay = match retry_after(&response) {
                        Some(hint) if hint > MAX_RETRY_AFTER => {
                            warn!(
                                %url,
                                hint_secs = hint.as_secs(),
                                "provider asked to back off too long; not retrying"
                            );
                            return Ok(response);
                        }
                        Some(hint) => hint,
                        None => self.retry.get_delay(attempt),
                    };
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    debug!(attempt = attempt + 1, %method, %url, error = %err, "provider request failed");
                    if last_attempt || !is_retryable_transport(&err) {
                        return Err(InfraError::from(err).into());
                    }
                    tokio::time::sleep(self.retry.get_delay(attempt)).await;
                }
            }
            attempt += 1;
        }
    }

    /// Send exactly once.
    pub async fn send_once(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder.build().map_err(InfraError::from)?;
        let method = request.method().clone();
        let url = redacted_url(request.url());

        let response = self.client.execute(request).await.map_err(InfraError::from)?;
        debug!(%method, %url, status = %response.status(), "provider response (single attempt)");
        Ok(response)
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Duration,
    connect_timeout: Duration,
    max_attempts: u32,
    base_backoff: Duration,
    user_agent: String,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            user_agent: concat!("calsync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpClientBuilder {
    /// Whole-request timeout, including reading the body.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.connect_timeout = self.connect_timeout.min(timeout);
        self
    }

    /// TCP connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Total attempts for [`HttpClient::send`], including the first.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Delay before the first retry.
    pub fn base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    /// `User-Agent` header sent with every request.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn build(self) -> Result<HttpClient> {
        let retry = RetryStrategy::custom(
            self.max_attempts,
            self.base_backoff,
            DEFAULT_MAX_DELAY.max(self.base_backoff),
        )
        .map_err(|e| CalSyncError::Config(e.to_string()))?;

        let client = ReqwestClient::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(self.user_agent)
            .no_proxy()
            .build()
            .map_err(InfraError::from)?;

        Ok(HttpClient { client, retry })
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn is_retryable_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// `Retry-After` in delta-seconds form. Graph and Google both send it that way.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// URL without its query string, which may carry sync tokens.
fn redacted_url(url: &reqwest::Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn fast_client(attempts: u32) -> HttpClient {
        HttpClient::builder()
            .base_backoff(Duration::from_millis(5))
            .max_attempts(attempts)
            .build()
            .expect("http client")
    }

    #[tokio::test]
    async fn throttled_listing_is_retried_until_it_succeeds() {
        let server = MockServer::start().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        Mock::given(method("GET"))
            .and(path("/calendars/primary/events"))
            .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
                match seen.fetch_add(1, Ordering::SeqCst) {
                    0 => ResponseTemplate::new(503),
                    1 => ResponseTemplate::new(429).insert_header("Retry-After", "0"),
                    _ => ResponseTemplate::new(200).set_body_string(r#"{"items":[]}"#),
                }
            })
            .expect(3)
            .mount(&server)
            .await;

        let client = fast_client(3);
        let url = format!("{}/calendars/primary/events", server.uri());
        let response = client.send(client.request(Method::GET, url)).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn long_retry_after_hands_the_throttle_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3600"))
            .expect(1)
            .mount(&server)
            .await;

        let client = fast_client(3);
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn gone_resources_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(410))
            .expect(1)
            .mount(&server)
            .await;

        let client = fast_client(3);
        let response =
            client.send(client.request(Method::DELETE, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn channel_creation_is_attempted_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let client = fast_client(3);
        let response =
            client.send_once(client.request(Method::POST, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn unreachable_provider_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let client = fast_client(2);
        let err = client
            .send(client.request(Method::GET, format!("http://{addr}")))
            .await
            .expect_err("nothing listens there");
        assert!(err.is_transient(), "{err:?}");
    }
}
