//! Token refresh, quarantine and re-authorization

mod support;

use std::time::Duration as StdDuration;

use calsync_domain::{CalSyncError, Credential, Provider, RefreshOutcome, TokenGrant};
use chrono::Duration;
use support::provider::ScriptedProvider;
use support::{oauth_grant, Harness};

#[tokio::test]
async fn fresh_credentials_are_returned_untouched() {
    let h = Harness::new();
    let conn = h.connect_google().await;

    let credential = h.tokens.ensure_valid(&conn).await.unwrap();

    assert_eq!(credential.access_token, "access-0");
    assert_eq!(ScriptedProvider::calls(&h.google.refresh_calls), 0);
}

#[tokio::test]
async fn credentials_inside_the_threshold_are_refreshed() {
    let h = Harness::new();
    let conn = h.connect_google().await;
    h.advance(Duration::minutes(51));

    let credential = h.tokens.ensure_valid(&conn).await.unwrap();

    assert_eq!(credential.access_token, "access-1");
    assert_eq!(credential.refresh_count, 1);
    assert_eq!(credential.refresh_token.as_deref(), Some("refresh-0"));
    assert_eq!(credential.last_refreshed_at, Some(support::t0() + Duration::minutes(51)));
    assert_eq!(h.credential_repo.snapshot(&conn.id).unwrap(), credential);
}

#[tokio::test]
async fn sweep_refreshes_only_what_is_due() {
    let h = Harness::new();
    let due = h.connect_google().await;
    let fresh = h.connect(Provider::Outlook, "alice@contoso.com").await;
    h.advance(Duration::minutes(55));
    h.tokens
        .register_grant(
            &fresh.id,
            TokenGrant { expires_in: Some(7200), ..oauth_grant() },
        )
        .await
        .unwrap();

    let report = h.tokens.sweep().await.unwrap();

    assert_eq!(report.checked, 2);
    assert_eq!(report.refreshed, vec![due.id.clone()]);
    assert!(report.quarantined.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(ScriptedProvider::calls(&h.outlook.refresh_calls), 0);
}

#[tokio::test]
async fn rejected_refresh_token_quarantines_after_one_attempt() {
    let h = Harness::new();
    let conn = h.connect_google().await;
    h.advance(Duration::minutes(55));
    h.google.script_refresh(Err(CalSyncError::ReauthRequired("invalid_grant".into())));

    let report = h.tokens.sweep().await.unwrap();
    assert_eq!(report.quarantined, vec![conn.id.clone()]);
    let stored = h.connection_repo.snapshot(&conn.id).unwrap();
    assert!(!stored.is_active);
    assert!(stored.deactivated_reason.is_some());

    // Later sweeps never touch the provider again.
    h.advance(Duration::minutes(5));
    h.tokens.sweep().await.unwrap();
    h.advance(Duration::minutes(5));
    let report = h.tokens.sweep().await.unwrap();
    assert_eq!(report.checked, 0);
    assert_eq!(ScriptedProvider::calls(&h.google.refresh_calls), 1);

    let err = h.tokens.ensure_valid(&stored).await.unwrap_err();
    assert!(err.requires_reauth());
}

#[tokio::test]
async fn transient_refresh_failure_does_not_quarantine() {
    let h = Harness::new();
    let conn = h.connect_google().await;
    h.advance(Duration::minutes(55));
    h.google.script_refresh(Err(CalSyncError::TransientProvider("503".into())));

    let report = h.tokens.sweep().await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert!(report.quarantined.is_empty());
    assert!(h.connection_repo.snapshot(&conn.id).unwrap().is_active);

    let report = h.tokens.sweep().await.unwrap();
    assert_eq!(report.refreshed, vec![conn.id]);
}

#[tokio::test]
async fn hung_token_endpoint_times_out_without_quarantine() {
    let h = Harness::new();
    let conn = h.connect_google().await;
    let tokens = h.tokens_with_call_timeout(StdDuration::from_millis(50));
    h.advance(Duration::minutes(55));
    h.google.delay_next_refresh(StdDuration::from_secs(60));

    let started = std::time::Instant::now();
    let err = tokens.ensure_valid(&conn).await.unwrap_err();

    assert!(matches!(err, CalSyncError::Timeout(_)), "{err:?}");
    assert!(err.is_transient());
    assert!(started.elapsed() < StdDuration::from_secs(10));
    assert!(h.connection_repo.snapshot(&conn.id).unwrap().is_active);

    // The refresh lease was released with the timed-out call.
    let credential = tokens.ensure_valid(&conn).await.unwrap();
    assert_eq!(credential.access_token, "access-2");
    assert_eq!(ScriptedProvider::calls(&h.google.refresh_calls), 2);
}

#[tokio::test]
async fn missing_refresh_token_quarantines() {
    let h = Harness::new();
    let conn = h.connect_google().await;
    h.credential_repo.put(Credential {
        refresh_token: None,
        ..h.credential_repo.snapshot(&conn.id).unwrap()
    });
    h.advance(Duration::minutes(55));

    let err = h.tokens.ensure_valid(&conn).await.unwrap_err();

    assert!(matches!(err, CalSyncError::ReauthRequired(_)));
    assert!(!h.connection_repo.snapshot(&conn.id).unwrap().is_active);
    assert_eq!(ScriptedProvider::calls(&h.google.refresh_calls), 0);
}

#[tokio::test]
async fn manual_refresh_is_a_noop_when_fresh() {
    let h = Harness::new();
    let conn = h.connect_google().await;

    assert_eq!(h.tokens.manual_refresh(&conn.id).await.unwrap(), RefreshOutcome::AlreadyFresh);
    assert_eq!(h.tokens.manual_refresh(&conn.id).await.unwrap(), RefreshOutcome::AlreadyFresh);
    assert_eq!(ScriptedProvider::calls(&h.google.refresh_calls), 0);

    h.advance(Duration::minutes(55));
    assert_eq!(h.tokens.manual_refresh(&conn.id).await.unwrap(), RefreshOutcome::Refreshed);
    assert_eq!(h.tokens.manual_refresh(&conn.id).await.unwrap(), RefreshOutcome::AlreadyFresh);
    assert_eq!(ScriptedProvider::calls(&h.google.refresh_calls), 1);
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
    let h = Harness::new();
    let conn = h.connect_google().await;
    h.advance(Duration::minutes(55));

    let (a, b, c) = tokio::join!(
        h.tokens.ensure_valid(&conn),
        h.tokens.ensure_valid(&conn),
        h.tokens.manual_refresh(&conn.id),
    );

    assert_eq!(a.unwrap().access_token, "access-1");
    assert_eq!(b.unwrap().access_token, "access-1");
    c.unwrap();
    assert_eq!(ScriptedProvider::calls(&h.google.refresh_calls), 1);
}

#[tokio::test]
async fn reauthorization_lifts_quarantine() {
    let h = Harness::new();
    let conn = h.connect_google().await;
    h.advance(Duration::minutes(55));
    h.google.script_refresh(Err(CalSyncError::ReauthRequired("invalid_grant".into())));
    h.tokens.sweep().await.unwrap();
    assert!(!h.connection_repo.snapshot(&conn.id).unwrap().is_active);

    let credential = h
        .tokens
        .register_grant(&conn.id, TokenGrant { access_token: "access-new".into(), ..oauth_grant() })
        .await
        .unwrap();

    let stored = h.connection_repo.snapshot(&conn.id).unwrap();
    assert!(stored.is_active);
    assert!(stored.deactivated_reason.is_none());
    assert_eq!(credential.access_token, "access-new");
    assert_eq!(h.tokens.ensure_valid(&stored).await.unwrap().access_token, "access-new");
}

#[tokio::test]
async fn non_expiring_secrets_are_never_refreshed() {
    let h = Harness::new();
    let conn = h.connect(Provider::CalDav, "alice@example.com").await;
    h.tokens
        .register_grant(
            &conn.id,
            TokenGrant {
                access_token: "app-specific-password".into(),
                refresh_token: None,
                expires_in: None,
                scope: None,
            },
        )
        .await
        .unwrap();
    h.advance(Duration::days(400));

    let credential = h.tokens.ensure_valid(&conn).await.unwrap();

    assert_eq!(credential.access_token, "app-specific-password");
    assert_eq!(h.tokens.sweep().await.unwrap().checked, 0);
    assert_eq!(ScriptedProvider::calls(&h.caldav.refresh_calls), 0);
}
