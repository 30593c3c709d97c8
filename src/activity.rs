//! Append-only per-workspace activity feed.
//!
//! Every recorded entry is persisted and then fanned out to the workspace
//! room as a `new_activity` event. Recording never fails a caller's
//! operation: the fan-out is best-effort and persistence errors surface to
//! the caller only where the entry is the operation itself.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::realtime::rooms::RoomRegistry;
use crate::realtime::ServerEvent;
use crate::storage::{ActivityRow, Storage};

/// Well-known activity kinds. The log itself is open-ended (stored as text),
/// these are the kinds the daemon emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    WorkspaceCreated,
    MemberJoined,
    MemberLeft,
    MemberRemoved,
    FileUploaded,
    FileDeleted,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::WorkspaceCreated => "workspace_created",
            ActivityKind::MemberJoined => "member_joined",
            ActivityKind::MemberLeft => "member_left",
            ActivityKind::MemberRemoved => "member_removed",
            ActivityKind::FileUploaded => "file_uploaded",
            ActivityKind::FileDeleted => "file_deleted",
        }
    }
}

/// Activity entry enriched with the actor's display name for feeds.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityView {
    pub id: i64,
    pub workspace_id: i64,
    pub user_id: Option<i64>,
    pub user_name: Option<String>,
    pub activity_type: String,
    pub description: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

impl ActivityView {
    fn from_row(row: ActivityRow, user_name: Option<String>) -> Self {
        let payload = serde_json::from_str(&row.payload)
            .unwrap_or(serde_json::Value::Object(Default::default()));
        Self {
            id: row.id,
            workspace_id: row.workspace_id,
            user_id: row.user_id,
            user_name,
            activity_type: row.activity_type,
            description: row.description,
            payload,
            created_at: row.created_at,
        }
    }
}

/// A page of the activity feed, newest first.
#[derive(Debug, Serialize)]
pub struct ActivityPage {
    pub entries: Vec<ActivityView>,
    pub has_more: bool,
}

pub struct ActivityLog {
    storage: Arc<Storage>,
    rooms: Arc<RoomRegistry>,
}

impl ActivityLog {
    pub fn new(storage: Arc<Storage>, rooms: Arc<RoomRegistry>) -> Self {
        Self { storage, rooms }
    }

    /// Persist an entry and broadcast it to the workspace room.
    pub async fn record(
        &self,
        workspace_id: i64,
        user_id: Option<i64>,
        kind: ActivityKind,
        description: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<ActivityView> {
        let description = description.into();
        let row = self
            .storage
            .append_activity(
                workspace_id,
                user_id,
                kind.as_str(),
                &description,
                &payload.to_string(),
            )
            .await?;
        let user_name = match user_id {
            Some(id) => self.storage.get_user(id).await?.map(|u| u.display_name),
            None => None,
        };
        let view = ActivityView::from_row(row, user_name);
        let event = ServerEvent::NewActivity {
            workspace_id,
            activity: serde_json::to_value(&view)?,
        };
        self.rooms.broadcast(workspace_id, &event.to_frame());
        Ok(view)
    }

    /// Newest-first page. `before` is an exclusive entry-id cursor.
    pub async fn list(
        &self,
        workspace_id: i64,
        limit: i64,
        before: Option<i64>,
    ) -> Result<ActivityPage> {
        let limit = limit.clamp(1, 100);
        let rows = self.storage.list_activity(workspace_id, limit, before).await?;
        let has_more = rows.len() as i64 == limit;

        // Resolve actor names once per distinct user.
        let mut names: HashMap<i64, String> = HashMap::new();
        for row in &rows {
            if let Some(uid) = row.user_id {
                if !names.contains_key(&uid) {
                    if let Some(user) = self.storage.get_user(uid).await? {
                        names.insert(uid, user.display_name);
                    }
                }
            }
        }
        let entries = rows
            .into_iter()
            .map(|row| {
                let name = row.user_id.and_then(|uid| names.get(&uid).cloned());
                ActivityView::from_row(row, name)
            })
            .collect();
        Ok(ActivityPage { entries, has_more })
    }
}
