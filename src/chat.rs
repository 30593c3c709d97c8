//! Workspace chat feed.
//!
//! Messages carry a small type tag (text, file, system) and are paged by
//! row id (stable even when timestamps collide). Pages are fetched
//! newest-first and returned oldest-first, the order a chat panel renders
//! them in.

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::realtime::ServerEvent;
use crate::storage::MessageWithAuthorRow;
use crate::workspace;
use crate::AppContext;

const MAX_BODY_LEN: usize = 4000;
const DEFAULT_PAGE: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct PostMessageInput {
    pub body: String,
    pub message_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessagePage {
    /// Oldest-first within the page.
    pub messages: Vec<MessageWithAuthorRow>,
    pub has_more: bool,
}

/// Post a message and fan it out to the workspace room.
pub async fn post_message(
    ctx: &AppContext,
    user: &crate::storage::UserRow,
    workspace_id: i64,
    input: PostMessageInput,
) -> ApiResult<MessageWithAuthorRow> {
    workspace::get_workspace_or_404(&ctx.storage, workspace_id).await?;
    workspace::require_member(&ctx.storage, workspace_id, user.id).await?;

    let body = input.body.trim();
    if body.is_empty() {
        return Err(ApiError::InvalidInput("message body is required".into()));
    }
    if body.len() > MAX_BODY_LEN {
        return Err(ApiError::InvalidInput(format!(
            "message body exceeds {MAX_BODY_LEN} bytes"
        )));
    }
    let message_type = match input.message_type.as_deref() {
        None | Some("text") => "text",
        Some("file") => "file",
        Some("system") => "system",
        Some(other) => {
            return Err(ApiError::InvalidInput(format!(
                "unknown message type {other:?}"
            )))
        }
    };

    let message = ctx
        .storage
        .create_message(workspace_id, user.id, body, message_type)
        .await?;
    let event = ServerEvent::NewMessage {
        workspace_id,
        message: serde_json::to_value(&message).map_err(anyhow::Error::from)?,
    };
    ctx.rooms.broadcast(workspace_id, &event.to_frame());
    Ok(message)
}

/// A page of history. `before` is an exclusive message-id cursor; `has_more`
/// is true when another page exists behind this one.
pub async fn list_messages(
    ctx: &AppContext,
    user: &crate::storage::UserRow,
    workspace_id: i64,
    limit: Option<i64>,
    before: Option<i64>,
) -> ApiResult<MessagePage> {
    workspace::get_workspace_or_404(&ctx.storage, workspace_id).await?;
    workspace::require_member(&ctx.storage, workspace_id, user.id).await?;

    let limit = limit.unwrap_or(DEFAULT_PAGE).clamp(1, 100);
    let mut messages = ctx.storage.list_messages(workspace_id, limit, before).await?;
    let has_more = messages.len() as i64 == limit;
    messages.reverse();
    Ok(MessagePage { messages, has_more })
}

/// Delete a message. Allowed for its author and for the workspace owner.
pub async fn delete_message(
    ctx: &AppContext,
    user: &crate::storage::UserRow,
    workspace_id: i64,
    message_id: i64,
) -> ApiResult<()> {
    let row = workspace::get_workspace_or_404(&ctx.storage, workspace_id).await?;
    workspace::require_member(&ctx.storage, workspace_id, user.id).await?;

    let message = ctx
        .storage
        .get_message(message_id)
        .await?
        .filter(|m| m.workspace_id == workspace_id)
        .ok_or(ApiError::NotFound("message"))?;
    let is_author = message.user_id == user.id;
    if !is_author && row.owner_id != user.id {
        return Err(ApiError::Forbidden(
            "only the author or the workspace owner may delete a message".into(),
        ));
    }
    ctx.storage.delete_message(message_id).await?;
    Ok(())
}
