//! Google Calendar adapter

use async_trait::async_trait;
use calsync_core::{AuthContext, ChangeQuery, ProviderAdapter};
use calsync_domain::{
    CalSyncError, EventContent, OAuthClientConfig, Provider, RemoteEvent, Result, TokenGrant,
    WebhookChannel, WebhookSubscription,
};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{parse_all_day, parse_instant, MAX_PAGES};
use crate::errors::InfraError;
use crate::http::HttpClient;
use crate::integrations::calendar::errors::{ensure_deleted, ensure_success};
use crate::integrations::calendar::oauth::{OAuthSettings, OAuthTokenClient};

pub const GOOGLE_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Google Calendar v3 adapter
pub struct GoogleCalendarAdapter {
    http: HttpClient,
    oauth: OAuthTokenClient,
    api_base: String,
}

impl GoogleCalendarAdapter {
    /// Create the adapter from the Google OAuth client settings.
    pub fn new(config: &OAuthClientConfig, http: HttpClient) -> Self {
        let oauth = OAuthTokenClient::new(OAuthSettings::google(config), http.clone());
        let api_base = config
            .api_base_url
            .clone()
            .unwrap_or_else(|| GOOGLE_CALENDAR_API_BASE.to_string());
        Self { http, oauth, api_base: api_base.trim_end_matches('/').to_string() }
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!("{}/calendars/{}/events", self.api_base, urlencoding::encode(calendar_id))
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!("{}/{}", self.events_url(calendar_id), urlencoding::encode(event_id))
    }
}

#[async_trait]
impl ProviderAdapter for GoogleCalendarAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    #[instrument(skip(self, auth, query))]
    async fn list_changed_events(
        &self,
        auth: &AuthContext,
        calendar_id: &str,
        query: &ChangeQuery,
    ) -> Result<Vec<RemoteEvent>> {
        let url = self.events_url(calendar_id);
        let mut params: Vec<(&str, String)> = vec![
            ("singleEvents", "true".into()),
            ("showDeleted", "true".into()),
            ("maxResults", "250".into()),
            ("timeMin", rfc3339(query.window_start)),
            ("timeMax", rfc3339(query.window_end)),
        ];
        if let Some(since) = query.since {
            params.push(("updatedMin", rfc3339(since)));
        }

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut request =
                self.http.request(Method::GET, &url).bearer_auth(&auth.access_token).query(&params);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let response = ensure_success(self.http.send(request).await?, "google list events")
                .await?;
            let page: GoogleEventsResponse = response.json().await.map_err(InfraError::from)?;

            events.extend(page.items.into_iter().filter_map(|item| {
                let id = item.id.clone();
                item.into_remote()
                    .map_err(|e| warn!(event_id = %id, error = %e, "skipping malformed google event"))
                    .ok()
            }));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => {
                    debug!(count = events.len(), "google events listed");
                    return Ok(events);
                }
            }
        }

        warn!(pages = MAX_PAGES, "google pagination limit reached, returning partial page set");
        Ok(events)
    }

    #[instrument(skip(self, auth, content))]
    async fn upsert_event(
        &self,
        auth: &AuthContext,
        calendar_id: &str,
        provider_event_id: Option<&str>,
        content: &EventContent,
    ) -> Result<RemoteEvent> {
        let body = GoogleEventBody::from(content);
        let response = match provider_event_id {
            Some(event_id) => {
                let request = self
                    .http
                    .request(Method::PUT, self.event_url(calendar_id, event_id))
                    .bearer_auth(&auth.access_token)
                    .json(&body);
                self.http.send(request).await?
            }
            None => {
                let request = self
                    .http
                    .request(Method::POST, self.events_url(calendar_id))
                    .bearer_auth(&auth.access_token)
                    .json(&body);
                self.http.send_once(request).await?
            }
        };

        let response = ensure_success(response, "google upsert event").await?;
        let event: GoogleEvent = response.json().await.map_err(InfraError::from)?;
        event.into_remote()
    }

    #[instrument(skip(self, auth))]
    async fn delete_event(
        &self,
        auth: &AuthContext,
        calendar_id: &str,
        provider_event_id: &str,
    ) -> Result<()> {
        let request = self
            .http
            .request(Method::DELETE, self.event_url(calendar_id, provider_event_id))
            .bearer_auth(&auth.access_token);
        ensure_deleted(self.http.send(request).await?, "google delete event").await
    }

    #[instrument(skip(self, auth, callback_url))]
    async fn create_webhook(
        &self,
        auth: &AuthContext,
        calendar_id: &str,
        callback_url: &str,
    ) -> Result<WebhookChannel> {
        let body = WatchRequest {
            id: Uuid::new_v4().to_string(),
            kind: "web_hook",
            address: callback_url.to_string(),
        };
        let request = self
            .http
            .request(Method::POST, format!("{}/watch", self.events_url(calendar_id)))
            .bearer_auth(&auth.access_token)
            .json(&body);

        let response = ensure_success(self.http.send_once(request).await?, "google watch").await?;
        let channel: WatchResponse = response.json().await.map_err(InfraError::from)?;
        channel.into_channel()
    }

    #[instrument(skip(self, auth, subscription), fields(channel_id = %subscription.channel_id))]
    async fn stop_webhook(
        &self,
        auth: &AuthContext,
        subscription: &WebhookSubscription,
    ) -> Result<()> {
        let body = StopRequest {
            id: subscription.channel_id.clone(),
            resource_id: subscription.resource_id.clone(),
        };
        let request = self
            .http
            .request(Method::POST, format!("{}/channels/stop", self.api_base))
            .bearer_auth(&auth.access_token)
            .json(&body);
        ensure_deleted(self.http.send(request).await?, "google stop channel").await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.oauth.refresh(refresh_token).await
    }
}

fn rfc3339(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Deserialize)]
struct GoogleEventsResponse {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleEvent {
    id: String,
    status: Option<String>,
    summary: Option<String>,
    location: Option<String>,
    start: Option<EventDateTime>,
    end: Option<EventDateTime>,
    updated: Option<String>,
    attendees: Option<Vec<GoogleAttendee>>,
}

impl GoogleEvent {
    fn into_remote(self) -> Result<RemoteEvent> {
        let last_modified = match self.updated.as_deref() {
            Some(raw) => parse_instant(raw)?,
            None => Utc::now(),
        };
        if self.status.as_deref() == Some("cancelled") {
            return Ok(RemoteEvent::cancelled(self.id, last_modified));
        }

        let (Some(start), Some(end)) = (self.start, self.end) else {
            return Err(CalSyncError::InvalidInput(format!("google event {} has no times", self.id)));
        };
        let mut content =
            EventContent::new(self.summary.unwrap_or_default(), start.instant()?, end.instant()?)?;
        if let Some(location) = self.location {
            content = content.with_location(location);
        }
        if let Some(attendees) = self.attendees {
            content = content.with_attendees(attendees.into_iter().filter_map(|a| a.email));
        }
        Ok(RemoteEvent::live(self.id, content, last_modified))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EventDateTime {
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
}

impl EventDateTime {
    fn instant(&self) -> Result<DateTime<Utc>> {
        match (&self.date_time, &self.date) {
            (Some(date_time), _) => parse_instant(date_time),
            (None, Some(date)) => parse_all_day(date),
            (None, None) => Err(CalSyncError::InvalidInput("google event time is empty".into())),
        }
    }

    fn utc(instant: DateTime<Utc>) -> Self {
        Self { date_time: Some(rfc3339(instant)), date: None, time_zone: Some("UTC".into()) }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GoogleAttendee {
    email: Option<String>,
}

#[derive(Debug, Serialize)]
struct GoogleEventBody {
    summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    start: EventDateTime,
    end: EventDateTime,
    attendees: Vec<GoogleAttendee>,
}

impl From<&EventContent> for GoogleEventBody {
    fn from(content: &EventContent) -> Self {
        Self {
            summary: content.summary.clone(),
            location: content.location.clone(),
            start: EventDateTime::utc(content.start_time),
            end: EventDateTime::utc(content.end_time),
            attendees: content
                .attendees
                .iter()
                .map(|email| GoogleAttendee { email: Some(email.clone()) })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WatchRequest {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    address: String,
}

#[derive(Debug, Deserialize)]
struct WatchResponse {
    id: String,
    #[serde(rename = "resourceId")]
    resource_id: Option<String>,
    /// Milliseconds since the epoch, as a decimal string.
    expiration: Option<String>,
}

impl WatchResponse {
    fn into_channel(self) -> Result<WebhookChannel> {
        let expiration = self
            .expiration
            .as_deref()
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| {
                CalSyncError::InvalidInput(format!("google channel {} has no expiration", self.id))
            })?;
        Ok(WebhookChannel { channel_id: self.id, resource_id: self.resource_id, expiration })
    }
}

#[derive(Debug, Serialize)]
struct StopRequest {
    id: String,
    #[serde(rename = "resourceId", skip_serializing_if = "Option::is_none")]
    resource_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn cancelled_items_carry_no_content() {
        let event: GoogleEvent = serde_json::from_str(
            r#"{"id":"abc","status":"cancelled","updated":"2025-03-01T10:00:00.000Z"}"#,
        )
        .unwrap();
        let remote = event.into_remote().unwrap();
        assert!(remote.is_deleted());
        assert_eq!(remote.last_modified, Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn timed_and_all_day_events_are_normalized_to_utc() {
        let event: GoogleEvent = serde_json::from_str(
            r#"{
                "id": "evt",
                "status": "confirmed",
                "summary": "  Planning ",
                "start": {"dateTime": "2025-03-01T10:00:00+01:00"},
                "end": {"dateTime": "2025-03-01T11:00:00+01:00"},
                "updated": "2025-02-28T08:00:00Z",
                "attendees": [{"email": "B@example.com"}, {"email": "a@example.com"}, {}]
            }"#,
        )
        .unwrap();
        let content = event.into_remote().unwrap().content.unwrap();
        assert_eq!(content.summary, "Planning");
        assert_eq!(content.start_time, Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap());
        assert_eq!(content.attendees, vec!["a@example.com", "b@example.com"]);

        let all_day: GoogleEvent = serde_json::from_str(
            r#"{"id":"d","start":{"date":"2025-03-01"},"end":{"date":"2025-03-02"}}"#,
        )
        .unwrap();
        let content = all_day.into_remote().unwrap().content.unwrap();
        assert_eq!(content.start_time, Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(content.end_time, Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn watch_expiration_is_epoch_millis() {
        let response: WatchResponse = serde_json::from_str(
            r#"{"kind":"api#channel","id":"ch-1","resourceId":"res-1","expiration":"1741255200000"}"#,
        )
        .unwrap();
        let channel = response.into_channel().unwrap();
        assert_eq!(channel.resource_id.as_deref(), Some("res-1"));
        assert_eq!(channel.expiration.timestamp_millis(), 1_741_255_200_000);
    }

    #[test]
    fn request_body_uses_utc_date_times() {
        let content = EventContent::new(
            "Sync",
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap(),
        )
        .unwrap()
        .with_attendees(["x@example.com"]);
        let body = serde_json::to_value(GoogleEventBody::from(&content)).unwrap();
        assert_eq!(body["start"]["dateTime"], "2025-03-01T09:00:00Z");
        assert_eq!(body["attendees"][0]["email"], "x@example.com");
        assert!(body.get("location").is_none());
    }
}
