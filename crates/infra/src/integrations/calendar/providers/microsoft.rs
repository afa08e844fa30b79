//! Microsoft Graph (Outlook / 365) calendar adapter

use async_trait::async_trait;
use calsync_core::{AuthContext, ChangeQuery, ProviderAdapter};
use calsync_domain::constants::PRIMARY_CALENDAR_ID;
use calsync_domain::{
    CalSyncError, EventContent, OAuthClientConfig, Provider, RemoteEvent, Result, TokenGrant,
    WebhookChannel, WebhookSubscription,
};
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{parse_instant, MAX_PAGES};
use crate::errors::InfraError;
use crate::http::HttpClient;
use crate::integrations::calendar::errors::{ensure_deleted, ensure_success};
use crate::integrations::calendar::oauth::{OAuthSettings, OAuthTokenClient};

pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Graph caps calendar event subscriptions at just under three days.
const SUBSCRIPTION_LIFETIME_MINUTES: i64 = 4230;
const PREFER_UTC: &str = "outlook.timezone=\"UTC\"";

/// Outlook adapter over Microsoft Graph
pub struct OutlookCalendarAdapter {
    http: HttpClient,
    oauth: OAuthTokenClient,
    api_base: String,
}

impl OutlookCalendarAdapter {
    /// Create the adapter from the Microsoft OAuth client settings.
    pub fn new(config: &OAuthClientConfig, http: HttpClient) -> Self {
        let oauth = OAuthTokenClient::new(OAuthSettings::microsoft(config), http.clone());
        let api_base = config.api_base_url.clone().unwrap_or_else(|| GRAPH_API_BASE.to_string());
        Self { http, oauth, api_base: api_base.trim_end_matches('/').to_string() }
    }

    /// Graph resource path of a calendar, relative to the API base.
    fn calendar_resource(calendar_id: &str) -> String {
        if calendar_id == PRIMARY_CALENDAR_ID {
            "me/calendar".to_string()
        } else {
            format!("me/calendars/{}", urlencoding::encode(calendar_id))
        }
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{resource}", self.api_base)
    }

    fn event_url(&self, event_id: &str) -> String {
        self.url(&format!("me/events/{}", urlencoding::encode(event_id)))
    }
}

#[async_trait]
impl ProviderAdapter for OutlookCalendarAdapter {
    fn provider(&self) -> Provider {
        Provider::Outlook
    }

    #[instrument(skip(self, auth, query))]
    async fn list_changed_events(
        &self,
        auth: &AuthContext,
        calendar_id: &str,
        query: &ChangeQuery,
    ) -> Result<Vec<RemoteEvent>> {
        let resource = format!("{}/calendarView", Self::calendar_resource(calendar_id));
        let mut params: Vec<(&str, String)> = vec![
            ("startDateTime", rfc3339(query.window_start)),
            ("endDateTime", rfc3339(query.window_end)),
            ("$top", "100".into()),
        ];
        if let Some(since) = query.since {
            params.push(("$filter", format!("lastModifiedDateTime ge {}", rfc3339(since))));
        }

        let mut request = self
            .http
            .request(Method::GET, self.url(&resource))
            .bearer_auth(&auth.access_token)
            .header("Prefer", PREFER_UTC)
            .query(&params);

        let mut events = Vec::new();
        for _ in 0..MAX_PAGES {
            let response =
                ensure_success(self.http.send(request).await?, "outlook list events").await?;
            let page: GraphEventsResponse = response.json().await.map_err(InfraError::from)?;

            events.extend(page.value.into_iter().filter_map(|item| {
                let id = item.id.clone();
                item.into_remote()
                    .map_err(|e| warn!(event_id = %id, error = %e, "skipping malformed outlook event"))
                    .ok()
            }));

            match page.next_link {
                // nextLink already carries every query parameter
                Some(next) => {
                    request = self
                        .http
                        .request(Method::GET, next)
                        .bearer_auth(&auth.access_token)
                        .header("Prefer", PREFER_UTC);
                }
                None => {
                    debug!(count = events.len(), "outlook events listed");
                    return Ok(events);
                }
            }
        }

        warn!(pages = MAX_PAGES, "outlook pagination limit reached, returning partial page set");
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
        let body = GraphEventBody::from(content);
        let response = match provider_event_id {
            Some(event_id) => {
                let request = self
                    .http
                    .request(Method::PATCH, self.event_url(event_id))
                    .bearer_auth(&auth.access_token)
                    .header("Prefer", PREFER_UTC)
                    .json(&body);
                self.http.send(request).await?
            }
            None => {
                let resource = format!("{}/events", Self::calendar_resource(calendar_id));
                let request = self
                    .http
                    .request(Method::POST, self.url(&resource))
                    .bearer_auth(&auth.access_token)
                    .header("Prefer", PREFER_UTC)
                    .json(&body);
                self.http.send_once(request).await?
            }
        };

        let response = ensure_success(response, "outlook upsert event").await?;
        let event: GraphEvent = response.json().await.map_err(InfraError::from)?;
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
            .request(Method::DELETE, self.event_url(provider_event_id))
            .bearer_auth(&auth.access_token);
        ensure_deleted(self.http.send(request).await?, "outlook delete event").await
    }

    #[instrument(skip(self, auth, callback_url))]
    async fn create_webhook(
        &self,
        auth: &AuthContext,
        calendar_id: &str,
        callback_url: &str,
    ) -> Result<WebhookChannel> {
        let expiration = Utc::now() + Duration::minutes(SUBSCRIPTION_LIFETIME_MINUTES);
        let body = SubscriptionRequest {
            change_type: "created,updated,deleted",
            notification_url: callback_url.to_string(),
            resource: format!("{}/events", Self::calendar_resource(calendar_id)),
            expiration_date_time: rfc3339(expiration),
            client_state: Uuid::new_v4().to_string(),
        };
        let request = self
            .http
            .request(Method::POST, self.url("subscriptions"))
            .bearer_auth(&auth.access_token)
            .json(&body);

        let response =
            ensure_success(self.http.send_once(request).await?, "outlook subscribe").await?;
        let created: SubscriptionResponse = response.json().await.map_err(InfraError::from)?;
        Ok(WebhookChannel {
            channel_id: created.id,
            resource_id: None,
            expiration: parse_instant(&created.expiration_date_time)?,
        })
    }

    #[instrument(skip(self, auth, subscription), fields(channel_id = %subscription.channel_id))]
    async fn stop_webhook(
        &self,
        auth: &AuthContext,
        subscription: &WebhookSubscription,
    ) -> Result<()> {
        let url = self.url(&format!(
            "subscriptions/{}",
            urlencoding::encode(&subscription.channel_id)
        ));
        let request = self.http.request(Method::DELETE, url).bearer_auth(&auth.access_token);
        ensure_deleted(self.http.send(request).await?, "outlook unsubscribe").await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.oauth.refresh(refresh_token).await
    }
}

fn rfc3339(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Graph date-times carry no offset; the zone travels separately. With
/// `Prefer: outlook.timezone="UTC"` the zone is always UTC, but events can
/// still come back in the mailbox zone when the header is ignored.
fn parse_graph_time(value: &GraphDateTime) -> Result<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(&value.date_time) {
        return Ok(instant.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(&value.date_time, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| {
            CalSyncError::InvalidInput(format!("invalid graph date-time '{}': {e}", value.date_time))
        })?;

    match value.time_zone.as_deref() {
        None | Some("UTC") | Some("Etc/UTC") => Ok(naive.and_utc()),
        Some(zone) => {
            let tz: chrono_tz::Tz = zone.parse().map_err(|_| {
                CalSyncError::InvalidInput(format!("unsupported graph time zone '{zone}'"))
            })?;
            tz.from_local_datetime(&naive)
                .earliest()
                .map(|local| local.with_timezone(&Utc))
                .ok_or_else(|| {
                    CalSyncError::InvalidInput(format!("nonexistent local time {naive} in {zone}"))
                })
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphEventsResponse {
    #[serde(default)]
    value: Vec<GraphEvent>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEvent {
    id: String,
    subject: Option<String>,
    location: Option<GraphLocation>,
    start: Option<GraphDateTime>,
    end: Option<GraphDateTime>,
    last_modified_date_time: Option<String>,
    #[serde(default)]
    is_cancelled: bool,
    #[serde(rename = "@removed")]
    removed: Option<serde_json::Value>,
    #[serde(default)]
    attendees: Vec<GraphAttendee>,
}

impl GraphEvent {
    fn into_remote(self) -> Result<RemoteEvent> {
        let last_modified = match self.last_modified_date_time.as_deref() {
            Some(raw) => parse_instant(raw)?,
            None => Utc::now(),
        };
        if self.is_cancelled || self.removed.is_some() {
            return Ok(RemoteEvent::cancelled(self.id, last_modified));
        }

        let (Some(start), Some(end)) = (self.start, self.end) else {
            return Err(CalSyncError::InvalidInput(format!(
                "outlook event {} has no times",
                self.id
            )));
        };
        let mut content = EventContent::new(
            self.subject.unwrap_or_default(),
            parse_graph_time(&start)?,
            parse_graph_time(&end)?,
        )?;
        if let Some(location) = self.location.and_then(|l| l.display_name) {
            content = content.with_location(location);
        }
        content = content.with_attendees(
            self.attendees.into_iter().filter_map(|a| a.email_address.and_then(|e| e.address)),
        );
        Ok(RemoteEvent::live(self.id, content, last_modified))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDateTime {
    date_time: String,
    time_zone: Option<String>,
}

impl GraphDateTime {
    fn utc(instant: DateTime<Utc>) -> Self {
        Self {
            date_time: instant.format("%Y-%m-%dT%H:%M:%S").to_string(),
            time_zone: Some("UTC".into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphLocation {
    display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttendee {
    email_address: Option<GraphEmailAddress>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GraphEmailAddress {
    address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphEventBody {
    subject: String,
    location: GraphLocation,
    start: GraphDateTime,
    end: GraphDateTime,
    attendees: Vec<GraphAttendee>,
}

impl From<&EventContent> for GraphEventBody {
    fn from(content: &EventContent) -> Self {
        Self {
            subject: content.summary.clone(),
            location: GraphLocation { display_name: content.location.clone() },
            start: GraphDateTime::utc(content.start_time),
            end: GraphDateTime::utc(content.end_time),
            attendees: content
                .attendees
                .iter()
                .map(|address| GraphAttendee {
                    email_address: Some(GraphEmailAddress { address: Some(address.clone()) }),
                    kind: Some("required".into()),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionRequest {
    change_type: &'static str,
    notification_url: String,
    resource: String,
    expiration_date_time: String,
    client_state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionResponse {
    id: String,
    expiration_date_time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_calendar_maps_to_default_mailbox_calendar() {
        assert_eq!(OutlookCalendarAdapter::calendar_resource("primary"), "me/calendar");
        assert_eq!(OutlookCalendarAdapter::calendar_resource("AAMk=="), "me/calendars/AAMk%3D%3D");
    }

    #[test]
    fn graph_times_without_offset_use_their_zone() {
        let utc = GraphDateTime {
            date_time: "2025-03-01T09:00:00.0000000".into(),
            time_zone: Some("UTC".into()),
        };
        assert_eq!(
            parse_graph_time(&utc).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
        );

        let berlin = GraphDateTime {
            date_time: "2025-03-01T10:00:00.0000000".into(),
            time_zone: Some("Europe/Berlin".into()),
        };
        assert_eq!(
            parse_graph_time(&berlin).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn cancelled_and_removed_events_are_deletions() {
        let cancelled: GraphEvent = serde_json::from_str(
            r#"{"id":"a","isCancelled":true,"lastModifiedDateTime":"2025-03-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert!(cancelled.into_remote().unwrap().is_deleted());

        let removed: GraphEvent =
            serde_json::from_str(r#"{"id":"b","@removed":{"reason":"deleted"}}"#).unwrap();
        assert!(removed.into_remote().unwrap().is_deleted());
    }

    #[test]
    fn live_event_maps_location_and_attendees() {
        let event: GraphEvent = serde_json::from_str(
            r#"{
                "id": "evt",
                "subject": "Review",
                "location": {"displayName": "Room 4"},
                "start": {"dateTime": "2025-03-01T09:00:00.0000000", "timeZone": "UTC"},
                "end": {"dateTime": "2025-03-01T10:00:00.0000000", "timeZone": "UTC"},
                "lastModifiedDateTime": "2025-02-27T12:00:00Z",
                "isCancelled": false,
                "attendees": [{"emailAddress": {"address": "Pat@Example.com"}, "type": "required"}]
            }"#,
        )
        .unwrap();
        let content = event.into_remote().unwrap().content.unwrap();
        assert_eq!(content.location.as_deref(), Some("Room 4"));
        assert_eq!(content.attendees, vec!["pat@example.com"]);
    }
}
