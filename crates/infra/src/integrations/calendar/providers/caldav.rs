//! CalDAV adapter (iCloud and generic servers)
//!
//! Authenticates with HTTP basic auth using the account id and an
//! app-specific password. CalDAV has no push channel and no token refresh, so
//! those operations are rejected.

use async_trait::async_trait;
use calsync_core::{AuthContext, ChangeQuery, ProviderAdapter};
use calsync_domain::{
    CalSyncError, CalDavConfig, EventContent, Provider, RemoteEvent, Result, TokenGrant,
    WebhookChannel, WebhookSubscription,
};
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::errors::InfraError;
use crate::http::HttpClient;
use crate::integrations::calendar::errors::{ensure_deleted, ensure_success};
use crate::integrations::calendar::ics;

const CALDAV_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// CalDAV calendar adapter
pub struct CalDavCalendarAdapter {
    provider: Provider,
    http: HttpClient,
    base_url: String,
}

impl CalDavCalendarAdapter {
    /// Create a CalDAV adapter reporting itself as `provider`.
    pub fn new(provider: Provider, config: &CalDavConfig, http: HttpClient) -> Self {
        Self { provider, http, base_url: config.base_url.trim_end_matches('/').to_string() }
    }

    /// Adapter for iCloud.
    pub fn apple(config: &CalDavConfig, http: HttpClient) -> Self {
        Self::new(Provider::Apple, config, http)
    }

    /// Adapter for any other CalDAV server.
    pub fn generic(config: &CalDavConfig, http: HttpClient) -> Self {
        Self::new(Provider::CalDav, config, http)
    }

    fn calendar_url(&self, auth: &AuthContext, calendar_id: &str) -> String {
        format!(
            "{}/{}/calendars/{}/",
            self.base_url,
            urlencoding::encode(&auth.account_id),
            urlencoding::encode(calendar_id)
        )
    }

    fn resource_url(&self, auth: &AuthContext, calendar_id: &str, uid: &str) -> String {
        format!("{}{}.ics", self.calendar_url(auth, calendar_id), urlencoding::encode(uid))
    }
}

#[async_trait]
impl ProviderAdapter for CalDavCalendarAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    #[instrument(skip(self, auth, query), fields(provider = %self.provider))]
    async fn list_changed_events(
        &self,
        auth: &AuthContext,
        calendar_id: &str,
        query: &ChangeQuery,
    ) -> Result<Vec<RemoteEvent>> {
        let report = Method::from_bytes(b"REPORT")
            .map_err(|e| CalSyncError::Internal(format!("REPORT method: {e}")))?;
        let request = self
            .http
            .request(report, self.calendar_url(auth, calendar_id))
            .basic_auth(&auth.account_id, Some(&auth.access_token))
            .header("Depth", "1")
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(calendar_query(query.window_start, query.window_end));

        let response = ensure_success(self.http.send(request).await?, "caldav report").await?;
        let body = response.text().await.map_err(InfraError::from)?;
        let resources = parse_multistatus(&body)?;

        let mut events = Vec::with_capacity(resources.len());
        for resource in resources {
            match ics::parse_event(&resource.data) {
                // Servers do not filter by modification time; do it here.
                Ok(parsed) if is_unchanged(&parsed.event, query.since) => {}
                Ok(parsed) => events.push(parsed.event),
                Err(e) => {
                    warn!(href = %resource.href, error = %e, "skipping unreadable caldav resource");
                }
            }
        }
        debug!(count = events.len(), "caldav events listed");
        Ok(events)
    }

    #[instrument(skip(self, auth, content), fields(provider = %self.provider))]
    async fn upsert_event(
        &self,
        auth: &AuthContext,
        calendar_id: &str,
        provider_event_id: Option<&str>,
        content: &EventContent,
    ) -> Result<RemoteEvent> {
        let now = Utc::now();
        let uid = provider_event_id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        let request = self
            .http
            .request(Method::PUT, self.resource_url(auth, calendar_id, &uid))
            .basic_auth(&auth.account_id, Some(&auth.access_token))
            .header(CONTENT_TYPE, "text/calendar; charset=utf-8")
            .body(ics::generate_event(&uid, content, now));

        let response = match provider_event_id {
            Some(_) => self.http.send(request).await?,
            None => self.http.send_once(request.header("If-None-Match", "*")).await?,
        };
        ensure_success(response, "caldav put").await?;
        Ok(RemoteEvent::live(uid, content.clone(), now))
    }

    #[instrument(skip(self, auth), fields(provider = %self.provider))]
    async fn delete_event(
        &self,
        auth: &AuthContext,
        calendar_id: &str,
        provider_event_id: &str,
    ) -> Result<()> {
        let request = self
            .http
            .request(Method::DELETE, self.resource_url(auth, calendar_id, provider_event_id))
            .basic_auth(&auth.account_id, Some(&auth.access_token));
        ensure_deleted(self.http.send(request).await?, "caldav delete").await
    }

    async fn create_webhook(
        &self,
        _auth: &AuthContext,
        _calendar_id: &str,
        _callback_url: &str,
    ) -> Result<WebhookChannel> {
        Err(CalSyncError::InvalidInput(format!(
            "provider '{}' does not support push notifications",
            self.provider
        )))
    }

    async fn stop_webhook(
        &self,
        _auth: &AuthContext,
        _subscription: &WebhookSubscription,
    ) -> Result<()> {
        Ok(())
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenGrant> {
        Err(CalSyncError::InvalidInput(format!(
            "provider '{}' uses app-specific passwords and has no token refresh",
            self.provider
        )))
    }
}

fn is_unchanged(event: &RemoteEvent, since: Option<DateTime<Utc>>) -> bool {
    since.is_some_and(|since| event.last_modified <= since)
}

/// calendar-query REPORT body restricted to VEVENTs overlapping the window.
fn calendar_query(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<C:calendar-query xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:prop>
    <D:getetag/>
    <C:calendar-data/>
  </D:prop>
  <C:filter>
    <C:comp-filter name="VCALENDAR">
      <C:comp-filter name="VEVENT">
        <C:time-range start="{}" end="{}"/>
      </C:comp-filter>
    </C:comp-filter>
  </C:filter>
</C:calendar-query>"#,
        start.format(CALDAV_FORMAT),
        end.format(CALDAV_FORMAT)
    )
}

#[derive(Debug)]
struct CalendarResource {
    href: String,
    data: String,
}

/// Resources with calendar data from a 207 multistatus body.
fn parse_multistatus(body: &str) -> Result<Vec<CalendarResource>> {
    let doc = roxmltree::Document::parse(body)
        .map_err(|e| CalSyncError::InvalidInput(format!("invalid multistatus XML: {e}")))?;

    let resources = doc
        .root_element()
        .descendants()
        .filter(|n| n.tag_name().name() == "response")
        .filter_map(|response| {
            let text_of = |name: &str| {
                response
                    .descendants()
                    .find(|n| n.tag_name().name() == name)
                    .and_then(|n| n.text())
                    .map(str::to_string)
            };
            Some(CalendarResource { href: text_of("href")?, data: text_of("calendar-data")? })
        })
        .collect();
    Ok(resources)
}
