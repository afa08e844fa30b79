//! Application context - dependency injection container

pub mod oauth;

use std::sync::Arc;
use std::time::Duration;

use calsync_core::{
    AvailabilityAggregator, CalendarRepository, ConflictRepository, ConflictResolver,
    ConnectionRepository, ConnectionService, CredentialRepository, EventRepository,
    LocalEventEditor, ProviderRegistry, SubscriptionRepository, SyncEngine, SyncSettings,
    TokenLifecycleManager, WebhookSubscriptionManager,
};
use calsync_domain::{CalSyncError, Config, Result};
use calsync_infra::database::{
    SqlCipherCalendarRepository, SqlCipherConflictRepository, SqlCipherConnectionRepository,
    SqlCipherCredentialRepository, SqlCipherEventRepository, SqlCipherSubscriptionRepository,
};
use calsync_infra::scheduling::{DispatcherWorker, SyncTarget};
use calsync_infra::{
    build_registry, BackgroundTasks, DbManager, HttpClient, KeyManager, NotificationRouter,
    SyncDispatcher,
};
use tokio::sync::Mutex;

pub use self::oauth::OAuthFlows;
use crate::utils::health::{ComponentHealth, HealthStatus};

const START_TIMEOUT: Duration = Duration::from_secs(10);
const DISPATCHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Application context - holds all services and dependencies
pub struct AppContext {
    pub config: Config,
    pub db: Arc<DbManager>,
    pub providers: Arc<ProviderRegistry>,

    // Services
    pub connections: Arc<ConnectionService>,
    pub tokens: Arc<TokenLifecycleManager>,
    pub webhooks: Arc<WebhookSubscriptionManager>,
    pub engine: Arc<SyncEngine>,
    pub editor: Arc<LocalEventEditor>,
    pub conflicts: Arc<ConflictResolver>,
    pub availability: Arc<AvailabilityAggregator>,

    // Push notifications
    pub dispatcher: SyncDispatcher,
    pub notifications: NotificationRouter,
    pub oauth: OAuthFlows,

    background: Mutex<BackgroundTasks>,
    dispatcher_worker: Mutex<DispatcherWorker>,
}

impl AppContext {
    /// Build every service from `config`. Background sweeps are registered
    /// but not started; see [`start_background`](Self::start_background).
    ///
    /// Must be called inside a Tokio runtime: the webhook dispatcher worker
    /// is spawned here.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let encryption_key = KeyManager::default().resolve(&config.database).map_err(|e| {
            tracing::error!(error = %e, "failed to resolve database encryption key");
            e
        })?;
        let db = Arc::new(DbManager::from_config(&config.database, &encryption_key)?);
        db.run_migrations()?;

        let pool = Arc::clone(db.pool());
        let connection_repo: Arc<dyn ConnectionRepository> =
            Arc::new(SqlCipherConnectionRepository::new(Arc::clone(&pool)));
        let calendar_repo: Arc<dyn CalendarRepository> =
            Arc::new(SqlCipherCalendarRepository::new(Arc::clone(&pool)));
        let credential_repo: Arc<dyn CredentialRepository> =
            Arc::new(SqlCipherCredentialRepository::new(Arc::clone(&pool)));
        let event_repo: Arc<dyn EventRepository> =
            Arc::new(SqlCipherEventRepository::new(Arc::clone(&pool)));
        let conflict_repo: Arc<dyn ConflictRepository> =
            Arc::new(SqlCipherConflictRepository::new(Arc::clone(&pool)));
        let subscription_repo: Arc<dyn SubscriptionRepository> =
            Arc::new(SqlCipherSubscriptionRepository::new(pool));

        let provider_timeout = Duration::from_secs(config.sync.provider_timeout_secs);
        let http = HttpClient::builder()
            .timeout(provider_timeout)
            .user_agent(concat!("calsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let providers = Arc::new(build_registry(&config.providers, http.clone()));

        let tokens = Arc::new(
            TokenLifecycleManager::new(
                Arc::clone(&connection_repo),
                Arc::clone(&credential_repo),
                Arc::clone(&providers),
            )
            .with_refresh_threshold(chrono::Duration::seconds(config.tokens.refresh_threshold_secs))
            .with_max_concurrency(config.tokens.max_concurrent_refreshes)
            .with_call_timeout(provider_timeout),
        );
        let webhooks = Arc::new(
            WebhookSubscriptionManager::new(
                Arc::clone(&connection_repo),
                Arc::clone(&subscription_repo),
                Arc::clone(&tokens),
                Arc::clone(&providers),
                config.server.public_base_url.as_str(),
            )
            .with_renewal_window_days(config.webhooks.renewal_window_days)
            .with_call_timeout(provider_timeout),
        );
        let connections = Arc::new(ConnectionService::new(
            Arc::clone(&connection_repo),
            Arc::clone(&calendar_repo),
            credential_repo,
            subscription_repo,
            Arc::clone(&conflict_repo),
            Arc::clone(&tokens),
            Arc::clone(&webhooks),
        ));
        let engine = Arc::new(
            SyncEngine::new(
                Arc::clone(&connection_repo),
                Arc::clone(&calendar_repo),
                Arc::clone(&event_repo),
                Arc::clone(&conflict_repo),
                Arc::clone(&tokens),
                Arc::clone(&providers),
            )
            .with_settings(SyncSettings::from_config(&config.sync)?),
        );
        let editor =
            Arc::new(LocalEventEditor::new(Arc::clone(&connection_repo), Arc::clone(&event_repo)));
        let conflicts = Arc::new(ConflictResolver::new(Arc::clone(&event_repo), conflict_repo));
        let availability = Arc::new(AvailabilityAggregator::new(
            connection_repo,
            calendar_repo,
            event_repo,
            &config.availability.default_schedule,
        )?);

        let target: Arc<dyn SyncTarget> = Arc::clone(&engine) as Arc<dyn SyncTarget>;
        let (dispatcher, dispatcher_worker) = SyncDispatcher::spawn(
            target,
            config.sync.dispatch_queue_capacity,
            config.sync.max_concurrent_syncs,
        );
        let notifications = NotificationRouter::new(Arc::clone(&webhooks), dispatcher.clone());

        let background = BackgroundTasks::new(
            &config,
            Arc::clone(&tokens),
            Arc::clone(&webhooks),
            Arc::clone(&engine),
        )
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "failed to register background sweeps");
            CalSyncError::from(err)
        })?;

        let oauth = OAuthFlows::new(&config, &http);

        tracing::info!(
            providers = ?providers.providers(),
            sweeps = ?background.job_names(),
            "application context ready"
        );

        Ok(Self {
            config,
            db,
            providers,
            connections,
            tokens,
            webhooks,
            engine,
            editor,
            conflicts,
            availability,
            dispatcher,
            notifications,
            oauth,
            background: Mutex::new(background),
            dispatcher_worker: Mutex::new(dispatcher_worker),
        })
    }

    /// Start the cron sweeps (fail-fast with a timeout).
    pub async fn start_background(&self) -> Result<()> {
        let mut background = self.background.lock().await;
        tokio::time::timeout(START_TIMEOUT, background.start())
            .await
            .map_err(|_| {
                tracing::error!(timeout_secs = START_TIMEOUT.as_secs(), "background sweeps start timed out");
                CalSyncError::Timeout("background sweeps did not start within 10s".into())
            })?
            .map_err(|err| {
                tracing::error!(error = %err, "failed to start background sweeps");
                CalSyncError::from(err)
            })
    }

    /// Stop the sweeps, then let in-flight webhook passes finish.
    pub async fn shutdown(&self) -> Result<()> {
        let sweeps = self.background.lock().await.stop().await;
        let dispatcher =
            self.dispatcher_worker.lock().await.shutdown(DISPATCHER_DRAIN_TIMEOUT).await;

        if let Err(err) = &sweeps {
            tracing::warn!(error = %err, "background sweeps did not stop cleanly");
        }
        if let Err(err) = &dispatcher {
            tracing::warn!(error = %err, "dispatcher did not drain cleanly");
        }
        sweeps?;
        dispatcher?;
        tracing::info!("application context shut down");
        Ok(())
    }

    /// Component health for `GET /health`.
    pub async fn health(&self) -> HealthStatus {
        let db = Arc::clone(&self.db);
        let database = match tokio::task::spawn_blocking(move || db.health_check()).await {
            Ok(Ok(())) => ComponentHealth::healthy("database"),
            Ok(Err(err)) => ComponentHealth::unhealthy("database", err.to_string()),
            Err(err) => ComponentHealth::unhealthy("database", format!("health check panicked: {err}")),
        }
        .critical();

        let registered = self.providers.providers();
        let providers = if registered.is_empty() {
            ComponentHealth::unhealthy("providers", "no provider adapters configured")
        } else {
            let names: Vec<String> = registered.iter().map(ToString::to_string).collect();
            ComponentHealth::healthy("providers").with_message(names.join(", "))
        };

        let dispatcher = if self.dispatcher_worker.lock().await.is_running() {
            ComponentHealth::healthy("dispatcher")
                .with_message(format!("{} pending", self.dispatcher.pending_len()))
        } else {
            ComponentHealth::unhealthy("dispatcher", "worker stopped")
        };

        let sweeps = if self.background.lock().await.is_running() {
            ComponentHealth::healthy("background_sweeps")
        } else {
            ComponentHealth::unhealthy("background_sweeps", "not running")
        };

        let mut status = HealthStatus::new()
            .add_component(database)
            .add_component(providers)
            .add_component(dispatcher)
            .add_component(sweeps);
        status.calculate_score();
        status
    }
}
