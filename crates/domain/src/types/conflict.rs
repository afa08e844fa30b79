//! Sync conflicts between the local mirror and a provider

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::EventContent;
use crate::impl_domain_enum_strings;

/// Kind of divergence. The first word names the remote side, the second the
/// local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Both sides edited the event.
    UpdateUpdate,
    /// Remote edited, local deleted.
    UpdateDelete,
    /// Remote deleted, local edited.
    DeleteUpdate,
}

impl_domain_enum_strings!(ConflictType {
    UpdateUpdate => "update_update",
    UpdateDelete => "update_delete",
    DeleteUpdate => "delete_update",
});

/// Which side wins a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    UseLocal,
    UseRemote,
}

impl_domain_enum_strings!(Resolution {
    UseLocal => "use_local",
    UseRemote => "use_remote",
});

/// One side of a conflict at detection time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub content: Option<EventContent>,
    pub last_modified: Option<DateTime<Utc>>,
    pub deleted: bool,
}

impl EventSnapshot {
    pub const fn live(content: EventContent, last_modified: Option<DateTime<Utc>>) -> Self {
        Self { content: Some(content), last_modified, deleted: false }
    }

    pub const fn deleted(last_modified: Option<DateTime<Utc>>) -> Self {
        Self { content: None, last_modified, deleted: true }
    }
}

/// A recorded divergence awaiting (or carrying) an explicit resolution.
///
/// Open conflicts never expire on their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub id: String,
    pub event_id: String,
    pub connection_id: String,
    pub conflict_type: ConflictType,
    pub local_snapshot: EventSnapshot,
    pub remote_snapshot: EventSnapshot,
    pub resolution: Option<Resolution>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// When the chosen side reached both the mirror and the provider.
    pub applied_at: Option<DateTime<Utc>>,
}

impl SyncConflict {
    /// Open conflict detected at `now`.
    pub fn new(
        event_id: impl Into<String>,
        connection_id: impl Into<String>,
        conflict_type: ConflictType,
        local_snapshot: EventSnapshot,
        remote_snapshot: EventSnapshot,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: super::new_id(),
            event_id: event_id.into(),
            connection_id: connection_id.into(),
            conflict_type,
            local_snapshot,
            remote_snapshot,
            resolution: None,
            detected_at,
            resolved_at: None,
            applied_at: None,
        }
    }

    pub const fn is_open(&self) -> bool {
        self.resolution.is_none()
    }

    /// Resolved but the chosen side has not reached the provider yet.
    pub const fn awaiting_apply(&self) -> bool {
        self.resolution.is_some() && self.applied_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_type_wire_names() {
        assert_eq!(serde_json::to_value(ConflictType::DeleteUpdate).unwrap(), "delete_update");
        assert_eq!("update_delete".parse::<ConflictType>().unwrap(), ConflictType::UpdateDelete);
        assert_eq!(Resolution::UseRemote.to_string(), "use_remote");
    }

    #[test]
    fn open_until_resolved() {
        let mut conflict = SyncConflict::new(
            "evt",
            "conn",
            ConflictType::UpdateUpdate,
            EventSnapshot::deleted(None),
            EventSnapshot::deleted(None),
            Utc::now(),
        );
        assert!(conflict.is_open());
        assert!(!conflict.awaiting_apply());

        conflict.resolution = Some(Resolution::UseLocal);
        conflict.resolved_at = Some(Utc::now());
        assert!(!conflict.is_open());
        assert!(conflict.awaiting_apply());
    }
}
