//! Pull-side diff: decide what one remote change does to the mirror
//!
//! Pure function of the local row, its open conflict, and the remote event.
//! The engine performs the returned action.

use calsync_domain::{
    CalendarEvent, ConflictType, EventSnapshot, Provider, RemoteEvent, SyncConflict,
};
use chrono::{DateTime, Utc};

/// Where the remote event came from
#[derive(Debug, Clone, Copy)]
pub struct DiffContext<'a> {
    pub connection_id: &'a str,
    pub provider: Provider,
    pub calendar_id: &'a str,
    pub now: DateTime<Utc>,
}

/// What to do with one remote change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffAction {
    /// Nothing to do: already applied, or a cancellation of an unknown event.
    Unchanged,
    /// First sighting of a remote event.
    Insert(CalendarEvent),
    /// Overwrite the mirror row, guarded by the local version read.
    Apply { event: CalendarEvent, expected_local_version: i64 },
    /// Both sides diverged; record a conflict and leave the mirror alone.
    RaiseConflict(SyncConflict),
    /// The event already has an open conflict and the remote side moved on.
    RefreshConflict { conflict_id: String, remote: EventSnapshot },
}

/// Diff one remote event against the mirror.
pub fn diff_remote(
    local: Option<&CalendarEvent>,
    open_conflict: Option<&SyncConflict>,
    remote: &RemoteEvent,
    ctx: DiffContext<'_>,
) -> DiffAction {
    let Some(local) = local else {
        return match &remote.content {
            Some(content) if !remote.is_deleted() => DiffAction::Insert(CalendarEvent::from_remote(
                ctx.connection_id,
                ctx.provider,
                ctx.calendar_id,
                &remote.provider_event_id,
                content.clone(),
                remote.last_modified,
                ctx.now,
            )),
            _ => DiffAction::Unchanged,
        };
    };

    if let Some(conflict) = open_conflict {
        let newer = conflict
            .remote_snapshot
            .last_modified
            .map_or(true, |seen| remote.last_modified > seen);
        return if newer {
            DiffAction::RefreshConflict { conflict_id: conflict.id.clone(), remote: remote.snapshot() }
        } else {
            DiffAction::Unchanged
        };
    }

    let remote_advanced =
        local.remote_last_modified.map_or(true, |seen| remote.last_modified > seen);
    if !remote_advanced {
        return DiffAction::Unchanged;
    }

    if !local.is_dirty() {
        return apply_remote(local, remote, ctx.now, false);
    }

    let local_deleted = local.pending_delete || local.is_deleted();
    match (local_deleted, remote.is_deleted()) {
        // Both sides deleted: converged.
        (true, true) => apply_remote(local, remote, ctx.now, true),
        (true, false) => conflict(local, remote, ConflictType::UpdateDelete, ctx),
        (false, true) => conflict(local, remote, ConflictType::DeleteUpdate, ctx),
        (false, false) => {
            let same = remote.content.as_ref().is_some_and(|c| c.same_as(&local.content));
            if same {
                apply_remote(local, remote, ctx.now, true)
            } else {
                conflict(local, remote, ConflictType::UpdateUpdate, ctx)
            }
        }
    }
}

fn apply_remote(
    local: &CalendarEvent,
    remote: &RemoteEvent,
    now: DateTime<Utc>,
    converge_local: bool,
) -> DiffAction {
    let mut event = local.clone();
    event.remote_last_modified = Some(remote.last_modified);
    event.updated_at = now;
    if converge_local {
        event.synced_version = event.local_version;
    }
    match (&remote.content, remote.is_deleted()) {
        (Some(content), false) => {
            event.content = content.clone().normalized();
            event.deleted_at = None;
            event.pending_delete = false;
        }
        _ => {
            if event.deleted_at.is_none() {
                event.deleted_at = Some(now);
            }
        }
    }
    DiffAction::Apply { event, expected_local_version: local.local_version }
}

fn conflict(
    local: &CalendarEvent,
    remote: &RemoteEvent,
    conflict_type: ConflictType,
    ctx: DiffContext<'_>,
) -> DiffAction {
    DiffAction::RaiseConflict(SyncConflict::new(
        &local.id,
        ctx.connection_id,
        conflict_type,
        local.local_snapshot(),
        remote.snapshot(),
        ctx.now,
    ))
}
