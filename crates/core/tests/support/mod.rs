//! Shared fixtures for `calsync-core` integration tests.
//!
//! [`Harness`] wires every service against in-memory repositories, scripted
//! providers and one mock clock.

#![allow(dead_code)]

pub mod provider;
pub mod repositories;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use calsync_common::{Clock, MockClock, RetryStrategy};
use calsync_core::{
    AvailabilityAggregator, ConflictResolver, ConnectionService, LocalEventEditor, NewConnection,
    ProviderRegistry, SyncEngine, SyncSettings, TokenLifecycleManager, WebhookSubscriptionManager,
};
use calsync_domain::{
    CalendarConnection, DefaultSchedule, EventContent, Provider, TokenGrant,
};
use chrono::{DateTime, Duration, TimeZone, Utc};

use self::provider::ScriptedProvider;
use self::repositories::{
    MockCalendarRepository, MockConflictRepository, MockConnectionRepository,
    MockCredentialRepository, MockEventRepository, MockSubscriptionRepository,
};

pub const USER: &str = "user-1";
pub const PUBLIC_BASE_URL: &str = "https://sync.example.com";

/// Monday 2025-04-07 08:00 UTC.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 7, 8, 0, 0).unwrap()
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 7, hour, minute, 0).unwrap()
}

pub fn meeting(summary: &str, start_hour: u32) -> EventContent {
    EventContent::new(summary, at(start_hour, 0), at(start_hour + 1, 0)).unwrap()
}

pub fn oauth_grant() -> TokenGrant {
    TokenGrant {
        access_token: "access-0".into(),
        refresh_token: Some("refresh-0".into()),
        expires_in: Some(3600),
        scope: Some("calendar".into()),
    }
}

pub fn test_settings() -> SyncSettings {
    SyncSettings {
        provider_timeout: StdDuration::from_secs(5),
        lease_timeout: StdDuration::from_millis(50),
        push_retry: RetryStrategy::custom(
            3,
            StdDuration::from_millis(1),
            StdDuration::from_millis(5),
        )
        .unwrap()
        .with_jitter_factor(0.0),
        lookback: Duration::days(30),
        lookahead: Duration::days(180),
        max_concurrent_syncs: 4,
    }
}

pub struct Harness {
    pub clock: MockClock,
    pub connection_repo: Arc<MockConnectionRepository>,
    pub calendar_repo: Arc<MockCalendarRepository>,
    pub credential_repo: Arc<MockCredentialRepository>,
    pub event_repo: Arc<MockEventRepository>,
    pub conflict_repo: Arc<MockConflictRepository>,
    pub subscription_repo: Arc<MockSubscriptionRepository>,
    pub google: Arc<ScriptedProvider>,
    pub outlook: Arc<ScriptedProvider>,
    pub caldav: Arc<ScriptedProvider>,
    pub tokens: Arc<TokenLifecycleManager>,
    pub webhooks: Arc<WebhookSubscriptionManager>,
    pub engine: Arc<SyncEngine>,
    pub editor: LocalEventEditor,
    pub resolver: ConflictResolver,
    pub availability: AvailabilityAggregator,
    pub connections: ConnectionService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_schedule(&DefaultSchedule::default())
    }

    pub fn with_schedule(schedule: &DefaultSchedule) -> Self {
        let clock = MockClock::at(t0());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());

        let connection_repo = Arc::new(MockConnectionRepository::default());
        let calendar_repo = Arc::new(MockCalendarRepository::default());
        let credential_repo = Arc::new(MockCredentialRepository::default());
        let event_repo = Arc::new(MockEventRepository::default());
        let conflict_repo = Arc::new(MockConflictRepository::default());
        let subscription_repo = Arc::new(MockSubscriptionRepository::default());

        let google = Arc::new(ScriptedProvider::new(Provider::Google, clock.clone()));
        let outlook = Arc::new(ScriptedProvider::new(Provider::Outlook, clock.clone()));
        let caldav = Arc::new(ScriptedProvider::new(Provider::CalDav, clock.clone()));
        let providers = Arc::new(
            ProviderRegistry::new()
                .with_adapter(google.clone())
                .with_adapter(outlook.clone())
                .with_adapter(caldav.clone()),
        );

        let tokens = Arc::new(
            TokenLifecycleManager::new(
                connection_repo.clone(),
                credential_repo.clone(),
                providers.clone(),
            )
            .with_clock(shared_clock.clone()),
        );
        let webhooks = Arc::new(
            WebhookSubscriptionManager::new(
                connection_repo.clone(),
                subscription_repo.clone(),
                tokens.clone(),
                providers.clone(),
                PUBLIC_BASE_URL,
            )
            .with_clock(shared_clock.clone()),
        );
        let engine = Arc::new(
            SyncEngine::new(
                connection_repo.clone(),
                calendar_repo.clone(),
                event_repo.clone(),
                conflict_repo.clone(),
                tokens.clone(),
                providers,
            )
            .with_clock(shared_clock.clone())
            .with_settings(test_settings()),
        );
        let editor = LocalEventEditor::new(connection_repo.clone(), event_repo.clone())
            .with_clock(shared_clock.clone());
        let resolver = ConflictResolver::new(event_repo.clone(), conflict_repo.clone())
            .with_clock(shared_clock.clone());
        let availability = AvailabilityAggregator::new(
            connection_repo.clone(),
            calendar_repo.clone(),
            event_repo.clone(),
            schedule,
        )
        .unwrap();
        let connections = ConnectionService::new(
            connection_repo.clone(),
            calendar_repo.clone(),
            credential_repo.clone(),
            subscription_repo.clone(),
            conflict_repo.clone(),
            tokens.clone(),
            webhooks.clone(),
        )
        .with_clock(shared_clock);

        Self {
            clock,
            connection_repo,
            calendar_repo,
            credential_repo,
            event_repo,
            conflict_repo,
            subscription_repo,
            google,
            outlook,
            caldav,
            tokens,
            webhooks,
            engine,
            editor,
            resolver,
            availability,
            connections,
        }
    }

    pub async fn connect(&self, provider: Provider, account: &str) -> CalendarConnection {
        self.connections
            .connect(
                NewConnection {
                    user_id: USER.to_string(),
                    provider,
                    provider_account_id: account.to_string(),
                    primary_calendar_name: None,
                },
                oauth_grant(),
            )
            .await
            .unwrap()
    }

    pub async fn connect_google(&self) -> CalendarConnection {
        self.connect(Provider::Google, "alice@example.com").await
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// A second token manager over the same repositories and providers whose
    /// token endpoint calls give up after `timeout`.
    pub fn tokens_with_call_timeout(&self, timeout: StdDuration) -> TokenLifecycleManager {
        let providers = Arc::new(
            ProviderRegistry::new()
                .with_adapter(self.google.clone())
                .with_adapter(self.outlook.clone())
                .with_adapter(self.caldav.clone()),
        );
        let clock: Arc<dyn Clock> = Arc::new(self.clock.clone());
        TokenLifecycleManager::new(self.connection_repo.clone(), self.credential_repo.clone(), providers)
            .with_clock(clock)
            .with_call_timeout(timeout)
    }
}
