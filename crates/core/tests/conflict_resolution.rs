//! Explicit conflict resolution

mod support;

use calsync_domain::{CalSyncError, CalendarConnection, ConflictType, Resolution, SyncTrigger};
use chrono::Duration;
use support::provider::ScriptedProvider;
use support::{meeting, Harness};

/// Mirror `g-1`, then edit it on both sides and sync. Returns the connection,
/// the event id and the conflict id.
async fn diverge(h: &Harness) -> (CalendarConnection, String, String) {
    let conn = h.connect_google().await;
    h.google.remote_write("primary", "g-1", meeting("Standup", 9));
    h.engine.sync_connection(&conn.id, SyncTrigger::Manual).await.unwrap();
    let event_id = h.event_repo.by_provider_id("g-1").unwrap().id;
    h.advance(Duration::minutes(1));
    h.editor.update(&event_id, meeting("Standup (local)", 9)).await.unwrap();
    h.advance(Duration::minutes(1));
    h.google.remote_write("primary", "g-1", meeting("Standup (remote)", 10));
    h.engine.sync_connection(&conn.id, SyncTrigger::Webhook).await.unwrap();
    let conflict_id = h.conflict_repo.all()[0].id.clone();
    (conn, event_id, conflict_id)
}

#[tokio::test]
async fn use_remote_overwrites_the_mirror_immediately() {
    let h = Harness::new();
    let (conn, event_id, conflict_id) = diverge(&h).await;

    let resolved = h.resolver.resolve(&conflict_id, Resolution::UseRemote).await.unwrap();

    assert_eq!(resolved.resolution, Some(Resolution::UseRemote));
    assert!(resolved.resolved_at.is_some());
    assert!(resolved.applied_at.is_some());
    let event = h.event_repo.snapshot(&event_id).unwrap();
    assert_eq!(event.content.summary, "Standup (remote)");
    assert_eq!(event.content.start_time, support::at(10, 0));
    assert!(!event.is_dirty());

    let summary = h.engine.sync_connection(&conn.id, SyncTrigger::Manual).await.unwrap();
    assert_eq!(summary.pushed, 0);
    assert_eq!(summary.conflicts_raised, 0);
    assert_eq!(ScriptedProvider::calls(&h.google.upsert_calls), 0);
}

#[tokio::test]
async fn resolving_twice_is_idempotent_but_switching_sides_is_rejected() {
    let h = Harness::new();
    let (_, _, conflict_id) = diverge(&h).await;

    let first = h.resolver.resolve(&conflict_id, Resolution::UseLocal).await.unwrap();
    let again = h.resolver.resolve(&conflict_id, Resolution::UseLocal).await.unwrap();
    assert_eq!(first, again);

    let err = h.resolver.resolve(&conflict_id, Resolution::UseRemote).await.unwrap_err();
    assert!(matches!(err, CalSyncError::InvalidInput(_)));
}

#[tokio::test]
async fn unknown_conflict_is_not_found() {
    let h = Harness::new();
    let err = h.resolver.resolve("missing", Resolution::UseLocal).await.unwrap_err();
    assert!(matches!(err, CalSyncError::NotFound(_)));
}

#[tokio::test]
async fn bulk_resolution_is_applied_item_by_item() {
    let h = Harness::new();
    let (conn, _, conflict_id) = diverge(&h).await;

    let outcome = h
        .resolver
        .resolve_all(vec![
            ("missing".to_string(), Resolution::UseRemote),
            (conflict_id.clone(), Resolution::UseRemote),
        ])
        .await;

    assert_eq!(outcome.resolved, vec![conflict_id]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].id, "missing");
    assert!(h.resolver.list_open(Some(&conn.id)).await.unwrap().is_empty());
}

#[tokio::test]
async fn open_conflicts_never_expire() {
    let h = Harness::new();
    let (conn, event_id, conflict_id) = diverge(&h).await;

    for _ in 0..3 {
        h.advance(Duration::days(120));
        h.engine.reconcile_all().await.unwrap();
    }

    let open = h.resolver.list_open(None).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, conflict_id);
    assert_eq!(open[0].connection_id, conn.id);
    assert_eq!(h.event_repo.snapshot(&event_id).unwrap().content.summary, "Standup (local)");
}

#[tokio::test]
async fn open_conflict_tracks_later_remote_edits() {
    let h = Harness::new();
    let (conn, _, conflict_id) = diverge(&h).await;

    h.advance(Duration::minutes(5));
    h.google.remote_write("primary", "g-1", meeting("Standup (remote, again)", 11));
    h.engine.sync_connection(&conn.id, SyncTrigger::Webhook).await.unwrap();

    let conflict = h.resolver.get(&conflict_id).await.unwrap();
    assert_eq!(h.conflict_repo.all().len(), 1);
    assert_eq!(
        conflict.remote_snapshot.content.unwrap().summary,
        "Standup (remote, again)"
    );

    h.resolver.resolve(&conflict_id, Resolution::UseRemote).await.unwrap();
    let event = h.event_repo.by_provider_id("g-1").unwrap();
    assert_eq!(event.content.start_time, support::at(11, 0));
}

#[tokio::test]
async fn keeping_a_locally_edited_event_the_provider_deleted_recreates_it() {
    let h = Harness::new();
    let conn = h.connect_google().await;
    h.google.remote_write("primary", "g-1", meeting("Standup", 9));
    h.engine.sync_connection(&conn.id, SyncTrigger::Manual).await.unwrap();
    let event_id = h.event_repo.by_provider_id("g-1").unwrap().id;
    h.advance(Duration::minutes(1));
    h.editor.update(&event_id, meeting("Standup (keep me)", 9)).await.unwrap();
    h.advance(Duration::minutes(1));
    h.google.remote_cancel("primary", "g-1");
    h.engine.sync_connection(&conn.id, SyncTrigger::Webhook).await.unwrap();
    let conflict = h.conflict_repo.all().remove(0);
    assert_eq!(conflict.conflict_type, ConflictType::DeleteUpdate);

    h.resolver.resolve(&conflict.id, Resolution::UseLocal).await.unwrap();
    let summary = h.engine.sync_connection(&conn.id, SyncTrigger::Manual).await.unwrap();

    assert_eq!(summary.pushed, 1);
    assert_eq!(summary.conflicts_resolved, 1);
    let event = h.event_repo.snapshot(&event_id).unwrap();
    let new_id = event.provider_event_id.unwrap();
    assert_ne!(new_id, "g-1");
    assert_eq!(
        h.google.remote_event("primary", &new_id).unwrap().content.unwrap().summary,
        "Standup (keep me)"
    );
}

#[tokio::test]
async fn taking_the_remote_side_undoes_a_local_delete() {
    let h = Harness::new();
    let conn = h.connect_google().await;
    h.google.remote_write("primary", "g-1", meeting("Standup", 9));
    h.engine.sync_connection(&conn.id, SyncTrigger::Manual).await.unwrap();
    let event_id = h.event_repo.by_provider_id("g-1").unwrap().id;
    h.advance(Duration::minutes(1));
    h.editor.delete(&event_id).await.unwrap();
    h.advance(Duration::minutes(1));
    h.google.remote_write("primary", "g-1", meeting("Standup (moved)", 13));
    h.engine.sync_connection(&conn.id, SyncTrigger::Webhook).await.unwrap();
    let conflict = h.conflict_repo.all().remove(0);
    assert_eq!(conflict.conflict_type, ConflictType::UpdateDelete);
    assert_eq!(ScriptedProvider::calls(&h.google.delete_calls), 0);

    h.resolver.resolve(&conflict.id, Resolution::UseRemote).await.unwrap();

    let event = h.event_repo.snapshot(&event_id).unwrap();
    assert!(event.is_live());
    assert!(!event.is_dirty());
    assert_eq!(event.content.summary, "Standup (moved)");
    h.engine.sync_connection(&conn.id, SyncTrigger::Manual).await.unwrap();
    assert_eq!(ScriptedProvider::calls(&h.google.delete_calls), 0);
}
