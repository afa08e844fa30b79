//! Scripted provider adapter backed by an in-memory "server" calendar

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use calsync_common::{Clock, MockClock};
use calsync_core::{AuthContext, ChangeQuery, ProviderAdapter};
use calsync_domain::{
    CalSyncError, EventContent, Provider, RemoteEvent, Result as DomainResult, TokenGrant,
    WebhookChannel, WebhookSubscription,
};
use chrono::Duration;

type Hook = Box<dyn FnOnce() + Send>;

/// Fake provider. Remote state is keyed by `(calendar_id, provider_event_id)`
/// and every write is stamped with the shared mock clock.
pub struct ScriptedProvider {
    provider: Provider,
    clock: MockClock,
    remote: Mutex<BTreeMap<(String, String), RemoteEvent>>,
    next_id: AtomicU32,
    pub channel_ttl: Mutex<Duration>,
    list_errors: Mutex<VecDeque<CalSyncError>>,
    upsert_errors: Mutex<VecDeque<CalSyncError>>,
    webhook_errors: Mutex<VecDeque<CalSyncError>>,
    refresh_results: Mutex<VecDeque<DomainResult<TokenGrant>>>,
    list_delay: Mutex<Option<StdDuration>>,
    refresh_delay: Mutex<Option<StdDuration>>,
    before_list: Mutex<Option<Hook>>,
    pub list_calls: AtomicU32,
    pub upsert_calls: AtomicU32,
    pub delete_calls: AtomicU32,
    pub refresh_calls: AtomicU32,
    pub webhook_calls: AtomicU32,
    pub stopped_channels: Mutex<Vec<String>>,
    pub last_since: Mutex<Option<Option<chrono::DateTime<chrono::Utc>>>>,
}

impl ScriptedProvider {
    pub fn new(provider: Provider, clock: MockClock) -> Self {
        Self {
            provider,
            clock,
            remote: Mutex::new(BTreeMap::new()),
            next_id: AtomicU32::new(1),
            channel_ttl: Mutex::new(Duration::days(7)),
            list_errors: Mutex::new(VecDeque::new()),
            upsert_errors: Mutex::new(VecDeque::new()),
            webhook_errors: Mutex::new(VecDeque::new()),
            refresh_results: Mutex::new(VecDeque::new()),
            list_delay: Mutex::new(None),
            refresh_delay: Mutex::new(None),
            before_list: Mutex::new(None),
            list_calls: AtomicU32::new(0),
            upsert_calls: AtomicU32::new(0),
            delete_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            webhook_calls: AtomicU32::new(0),
            stopped_channels: Mutex::new(Vec::new()),
            last_since: Mutex::new(None),
        }
    }

    fn mint(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// An edit made directly on the provider (another device, another user).
    pub fn remote_write(&self, calendar_id: &str, provider_event_id: &str, content: EventContent) {
        let event = RemoteEvent::live(provider_event_id, content, self.clock.now());
        self.remote
            .lock()
            .unwrap()
            .insert((calendar_id.to_string(), provider_event_id.to_string()), event);
    }

    pub fn remote_cancel(&self, calendar_id: &str, provider_event_id: &str) {
        let event = RemoteEvent::cancelled(provider_event_id, self.clock.now());
        self.remote
            .lock()
            .unwrap()
            .insert((calendar_id.to_string(), provider_event_id.to_string()), event);
    }

    pub fn remote_event(&self, calendar_id: &str, provider_event_id: &str) -> Option<RemoteEvent> {
        self.remote
            .lock()
            .unwrap()
            .get(&(calendar_id.to_string(), provider_event_id.to_string()))
            .cloned()
    }

    pub fn remote_events(&self) -> Vec<RemoteEvent> {
        self.remote.lock().unwrap().values().cloned().collect()
    }

    pub fn fail_next_list(&self, error: CalSyncError) {
        self.list_errors.lock().unwrap().push_back(error);
    }

    pub fn fail_next_upsert(&self, error: CalSyncError) {
        self.upsert_errors.lock().unwrap().push_back(error);
    }

    pub fn fail_next_webhook(&self, error: CalSyncError) {
        self.webhook_errors.lock().unwrap().push_back(error);
    }

    pub fn script_refresh(&self, result: DomainResult<TokenGrant>) {
        self.refresh_results.lock().unwrap().push_back(result);
    }

    pub fn delay_list(&self, delay: StdDuration) {
        *self.list_delay.lock().unwrap() = Some(delay);
    }

    /// Hold the next token refresh for `delay`.
    pub fn delay_next_refresh(&self, delay: StdDuration) {
        *self.refresh_delay.lock().unwrap() = Some(delay);
    }

    /// Run `hook` once, right before the next listing is served.
    pub fn before_next_list(&self, hook: impl FnOnce() + Send + 'static) {
        *self.before_list.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

pub fn fresh_grant(access_token: &str) -> TokenGrant {
    TokenGrant {
        access_token: access_token.to_string(),
        refresh_token: None,
        expires_in: Some(3600),
        scope: None,
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn list_changed_events(
        &self,
        _auth: &AuthContext,
        calendar_id: &str,
        query: &ChangeQuery,
    ) -> DomainResult<Vec<RemoteEvent>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_since.lock().unwrap() = Some(query.since);
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let hook = self.before_list.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        if let Some(err) = self.list_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self
            .remote
            .lock()
            .unwrap()
            .iter()
            .filter(|((cal, _), e)| cal == calendar_id && query.since.map_or(true, |s| e.last_modified >= s))
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn upsert_event(
        &self,
        _auth: &AuthContext,
        calendar_id: &str,
        provider_event_id: Option<&str>,
        content: &EventContent,
    ) -> DomainResult<RemoteEvent> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.upsert_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        let id = provider_event_id.map_or_else(|| self.mint("evt"), str::to_string);
        let event = RemoteEvent::live(&id, content.clone(), self.clock.now());
        self.remote.lock().unwrap().insert((calendar_id.to_string(), id), event.clone());
        Ok(event)
    }

    async fn delete_event(
        &self,
        _auth: &AuthContext,
        calendar_id: &str,
        provider_event_id: &str,
    ) -> DomainResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.remote_cancel(calendar_id, provider_event_id);
        Ok(())
    }

    async fn create_webhook(
        &self,
        _auth: &AuthContext,
        _calendar_id: &str,
        _callback_url: &str,
    ) -> DomainResult<WebhookChannel> {
        self.webhook_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.webhook_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        let ttl = *self.channel_ttl.lock().unwrap();
        Ok(WebhookChannel {
            channel_id: self.mint("chan"),
            resource_id: Some(self.mint("res")),
            expiration: self.clock.now() + ttl,
        })
    }

    async fn stop_webhook(&self, _auth: &AuthContext, subscription: &WebhookSubscription) -> DomainResult<()> {
        self.stopped_channels.lock().unwrap().push(subscription.channel_id.clone());
        Ok(())
    }

    async fn refresh_token(&self, _refresh_token: &str) -> DomainResult<TokenGrant> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.refresh_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.refresh_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(fresh_grant(&format!("access-{call}"))))
    }
}
