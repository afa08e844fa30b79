#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use calsync_common::testing::TEST_DB_KEY;
use calsync_domain::{CalendarConnection, Credential, Provider, TokenGrant};
use calsync_infra::database::{
    DbManager, SqlCipherCalendarRepository, SqlCipherConflictRepository,
    SqlCipherConnectionRepository, SqlCipherCredentialRepository, SqlCipherEventRepository,
    SqlCipherSubscriptionRepository,
};
use calsync_infra::http::HttpClient;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

/// Temporary encrypted database with migrations applied. The file lives as
/// long as the wrapper.
pub struct TestDatabase {
    pub manager: Arc<DbManager>,
    _temp_dir: TempDir,
}

impl TestDatabase {
    pub fn new() -> Self {
        Self::with_pool_size(4)
    }

    pub fn with_pool_size(pool_size: u32) -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");
        let db_path = temp_dir.path().join("calsync-test.db");

        let manager = DbManager::new(&db_path, pool_size, Some(TEST_DB_KEY))
            .expect("db manager should be created");
        manager.run_migrations().expect("schema migrations should apply");

        Self { manager: Arc::new(manager), _temp_dir: temp_dir }
    }

    pub fn repositories(&self) -> Repositories {
        let pool = Arc::clone(self.manager.pool());
        Repositories {
            connections: Arc::new(SqlCipherConnectionRepository::new(Arc::clone(&pool))),
            calendars: Arc::new(SqlCipherCalendarRepository::new(Arc::clone(&pool))),
            credentials: Arc::new(SqlCipherCredentialRepository::new(Arc::clone(&pool))),
            events: Arc::new(SqlCipherEventRepository::new(Arc::clone(&pool))),
            conflicts: Arc::new(SqlCipherConflictRepository::new(Arc::clone(&pool))),
            subscriptions: Arc::new(SqlCipherSubscriptionRepository::new(pool)),
        }
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// Every repository over one database.
pub struct Repositories {
    pub connections: Arc<SqlCipherConnectionRepository>,
    pub calendars: Arc<SqlCipherCalendarRepository>,
    pub credentials: Arc<SqlCipherCredentialRepository>,
    pub events: Arc<SqlCipherEventRepository>,
    pub conflicts: Arc<SqlCipherConflictRepository>,
    pub subscriptions: Arc<SqlCipherSubscriptionRepository>,
}

/// HTTP client that fails fast against a mock server.
pub fn test_http_client() -> HttpClient {
    HttpClient::builder()
        .timeout(Duration::from_secs(5))
        .max_attempts(2)
        .base_backoff(Duration::from_millis(1))
        .build()
        .expect("http client should build")
}

/// 2025-03-10 at the given UTC hour.
pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, hour, 0, 0).single().expect("valid test instant")
}

pub fn connection(user_id: &str, provider: Provider, account: &str) -> CalendarConnection {
    CalendarConnection::new(user_id, provider, account, at(8))
}

/// Credential that stays valid for a day after `now`.
pub fn fresh_credential(connection_id: &str, now: DateTime<Utc>) -> Credential {
    Credential::from_grant(
        connection_id,
        TokenGrant {
            access_token: "access-token".into(),
            refresh_token: Some("refresh-token".into()),
            expires_in: Some(86_400),
            scope: None,
        },
        now,
    )
}
