//! Workspace lifecycle, membership, and the invite state machine.
//!
//! Roles are strictly ordered: owner > admin > member > viewer. Capabilities
//! are derived from the role on every role change, never stored
//! independently. Invites move pending → accepted | declined | revoked |
//! expired; expiry is evaluated lazily whenever an invite is touched.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityKind;
use crate::error::{ApiError, ApiResult};
use crate::identity::generate_token;
use crate::storage::{InviteRow, MemberRow, Storage, UserRow, WorkspaceRow};
use crate::AppContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Member => "member",
            Role::Viewer => "viewer",
        }
    }

    /// Capability pair (can_edit, can_invite) implied by the role.
    pub fn capabilities(self) -> (bool, bool) {
        match self {
            Role::Owner | Role::Admin => (true, true),
            Role::Member => (true, false),
            Role::Viewer => (false, false),
        }
    }

    /// Roles an invite may carry. Ownership is never granted by invite.
    pub fn invitable(self) -> bool {
        !matches!(self, Role::Owner)
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

impl FromStr for Role {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            "viewer" => Ok(Role::Viewer),
            other => Err(ApiError::InvalidInput(format!("unknown role {other:?}"))),
        }
    }
}

// ─── Views ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct WorkspaceView {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub owner_id: i64,
    pub saved_project_id: Option<i64>,
    pub is_public: bool,
    pub max_members: i64,
    pub member_count: i64,
    /// The requesting user's role, if they are a member.
    pub my_role: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct InvitePreview {
    pub workspace_id: i64,
    pub workspace_name: String,
    pub email: String,
    pub role: String,
    pub status: String,
    pub expires_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub saved_project_id: Option<i64>,
    #[serde(default)]
    pub is_public: bool,
    pub max_members: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkspaceInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
    pub max_members: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateInviteInput {
    pub email: String,
    pub role: String,
}

// ─── Access helpers ──────────────────────────────────────────────────────────

pub async fn get_workspace_or_404(storage: &Storage, id: i64) -> ApiResult<WorkspaceRow> {
    storage
        .get_workspace(id)
        .await?
        .ok_or(ApiError::NotFound("workspace"))
}

/// The user's membership row, or `Forbidden`.
pub async fn require_member(
    storage: &Storage,
    workspace_id: i64,
    user_id: i64,
) -> ApiResult<MemberRow> {
    storage
        .get_membership(workspace_id, user_id)
        .await?
        .ok_or_else(|| ApiError::Forbidden("not a member of this workspace".into()))
}

/// Membership with edit capability, or `Forbidden`.
pub async fn require_editor(
    storage: &Storage,
    workspace_id: i64,
    user_id: i64,
) -> ApiResult<MemberRow> {
    let member = require_member(storage, workspace_id, user_id).await?;
    if !member.can_edit {
        return Err(ApiError::Forbidden("requires edit permission".into()));
    }
    Ok(member)
}

async fn require_admin(
    storage: &Storage,
    workspace_id: i64,
    user_id: i64,
) -> ApiResult<MemberRow> {
    let member = require_member(storage, workspace_id, user_id).await?;
    let role = Role::from_str(&member.role)?;
    if !role.is_admin() {
        return Err(ApiError::Forbidden("requires admin role".into()));
    }
    Ok(member)
}

async fn view_of(
    storage: &Storage,
    row: WorkspaceRow,
    user_id: i64,
) -> ApiResult<WorkspaceView> {
    let member_count = storage.member_count(row.id).await?;
    let my_role = storage
        .get_membership(row.id, user_id)
        .await?
        .map(|m| m.role);
    Ok(WorkspaceView {
        id: row.id,
        name: row.name,
        description: row.description,
        owner_id: row.owner_id,
        saved_project_id: row.saved_project_id,
        is_public: row.is_public,
        max_members: row.max_members,
        member_count,
        my_role,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

// ─── Workspace lifecycle ─────────────────────────────────────────────────────

pub async fn create_workspace(
    ctx: &AppContext,
    owner: &UserRow,
    input: CreateWorkspaceInput,
) -> ApiResult<WorkspaceView> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(ApiError::InvalidInput("workspace name is required".into()));
    }
    let max_members = input
        .max_members
        .unwrap_or(ctx.config.default_max_members);
    if max_members < 1 {
        return Err(ApiError::InvalidInput(
            "max_members must be at least 1".into(),
        ));
    }
    if let Some(project_id) = input.saved_project_id {
        let project = ctx
            .storage
            .get_saved_project(project_id)
            .await?
            .ok_or(ApiError::NotFound("saved project"))?;
        if project.owner_id != owner.id {
            return Err(ApiError::Forbidden(
                "saved project belongs to another user".into(),
            ));
        }
    }
    let row = ctx
        .storage
        .create_workspace(
            owner.id,
            name,
            input.description.trim(),
            input.saved_project_id,
            input.is_public,
            max_members,
        )
        .await?;
    tracing::info!(workspace_id = row.id, owner_id = owner.id, "workspace created");
    ctx.activity
        .record(
            row.id,
            Some(owner.id),
            ActivityKind::WorkspaceCreated,
            format!("{} created the workspace", owner.display_name),
            serde_json::json!({ "workspace_name": row.name }),
        )
        .await?;
    view_of(&ctx.storage, row, owner.id).await
}

/// Workspace detail. Members always; non-members only when public.
pub async fn get_workspace(
    ctx: &AppContext,
    user: &UserRow,
    workspace_id: i64,
) -> ApiResult<WorkspaceView> {
    let row = get_workspace_or_404(&ctx.storage, workspace_id).await?;
    let membership = ctx.storage.get_membership(workspace_id, user.id).await?;
    if membership.is_none() && !row.is_public {
        return Err(ApiError::Forbidden("not a member of this workspace".into()));
    }
    view_of(&ctx.storage, row, user.id).await
}

pub async fn list_my_workspaces(
    ctx: &AppContext,
    user: &UserRow,
) -> ApiResult<Vec<WorkspaceView>> {
    let rows = ctx.storage.list_workspaces_for_user(user.id).await?;
    let mut views = Vec::with_capacity(rows.len());
    for row in rows {
        views.push(view_of(&ctx.storage, row, user.id).await?);
    }
    Ok(views)
}

pub async fn discover_workspaces(
    ctx: &AppContext,
    user: &UserRow,
) -> ApiResult<Vec<WorkspaceView>> {
    let rows = ctx.storage.discover_public_workspaces(user.id).await?;
    let mut views = Vec::with_capacity(rows.len());
    for row in rows {
        views.push(view_of(&ctx.storage, row, user.id).await?);
    }
    Ok(views)
}

pub async fn update_workspace(
    ctx: &AppContext,
    user: &UserRow,
    workspace_id: i64,
    input: UpdateWorkspaceInput,
) -> ApiResult<WorkspaceView> {
    get_workspace_or_404(&ctx.storage, workspace_id).await?;
    require_admin(&ctx.storage, workspace_id, user.id).await?;
    if let Some(name) = input.name.as_deref() {
        if name.trim().is_empty() {
            return Err(ApiError::InvalidInput("workspace name is required".into()));
        }
    }
    if let Some(max) = input.max_members {
        let current = ctx.storage.member_count(workspace_id).await?;
        if max < 1 {
            return Err(ApiError::InvalidInput(
                "max_members must be at least 1".into(),
            ));
        }
        // Never shrink below the current membership.
        if max < current {
            return Err(ApiError::InvalidInput(format!(
                "max_members {max} is below the current member count {current}"
            )));
        }
    }
    ctx.storage
        .update_workspace(
            workspace_id,
            input.name.as_deref().map(str::trim),
            input.description.as_deref(),
            input.is_public,
            input.max_members,
        )
        .await?;
    let row = get_workspace_or_404(&ctx.storage, workspace_id).await?;
    view_of(&ctx.storage, row, user.id).await
}

pub async fn delete_workspace(
    ctx: &AppContext,
    user: &UserRow,
    workspace_id: i64,
) -> ApiResult<()> {
    let row = get_workspace_or_404(&ctx.storage, workspace_id).await?;
    if row.owner_id != user.id {
        return Err(ApiError::Forbidden("only the owner may delete".into()));
    }
    ctx.storage.delete_workspace(workspace_id).await?;
    tracing::info!(workspace_id, "workspace deleted");
    // Remove uploaded blobs after the rows; a failure here leaves orphans on
    // disk but never a dangling row.
    let upload_dir = ctx.config.workspace_upload_dir(workspace_id);
    if let Err(err) = tokio::fs::remove_dir_all(&upload_dir).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(workspace_id, error = %err, "failed to remove upload directory");
        }
    }
    Ok(())
}

// ─── Membership ──────────────────────────────────────────────────────────────

pub async fn list_members(
    ctx: &AppContext,
    user: &UserRow,
    workspace_id: i64,
) -> ApiResult<Vec<crate::storage::MemberWithUserRow>> {
    get_workspace_or_404(&ctx.storage, workspace_id).await?;
    require_member(&ctx.storage, workspace_id, user.id).await?;
    Ok(ctx.storage.list_members(workspace_id).await?)
}

/// Leave a workspace. The owner cannot leave; they delete or transfer.
pub async fn leave_workspace(
    ctx: &AppContext,
    user: &UserRow,
    workspace_id: i64,
) -> ApiResult<()> {
    let row = get_workspace_or_404(&ctx.storage, workspace_id).await?;
    let member = require_member(&ctx.storage, workspace_id, user.id).await?;
    if row.owner_id == user.id {
        return Err(ApiError::InvalidState(
            "the owner cannot leave their own workspace".into(),
        ));
    }
    ctx.storage.delete_member(member.id).await?;
    ctx.activity
        .record(
            workspace_id,
            Some(user.id),
            ActivityKind::MemberLeft,
            format!("{} left the workspace", user.display_name),
            serde_json::json!({}),
        )
        .await?;
    Ok(())
}

/// Remove another member. Owner only; everyone else leaves on their own.
pub async fn remove_member(
    ctx: &AppContext,
    actor: &UserRow,
    workspace_id: i64,
    member_id: i64,
) -> ApiResult<()> {
    let row = get_workspace_or_404(&ctx.storage, workspace_id).await?;
    require_member(&ctx.storage, workspace_id, actor.id).await?;
    if actor.id != row.owner_id {
        return Err(ApiError::Forbidden(
            "only the owner may remove members".into(),
        ));
    }
    let target = ctx
        .storage
        .get_member(member_id)
        .await?
        .filter(|m| m.workspace_id == workspace_id)
        .ok_or(ApiError::NotFound("member"))?;
    if target.user_id == actor.id {
        return Err(ApiError::InvalidState(
            "use leave to remove yourself".into(),
        ));
    }
    if Role::from_str(&target.role)? == Role::Owner {
        return Err(ApiError::Forbidden("the owner cannot be removed".into()));
    }
    ctx.storage.delete_member(target.id).await?;
    let removed_name = ctx
        .storage
        .get_user(target.user_id)
        .await?
        .map(|u| u.display_name)
        .unwrap_or_else(|| format!("user {}", target.user_id));
    ctx.activity
        .record(
            workspace_id,
            Some(actor.id),
            ActivityKind::MemberRemoved,
            format!("{} removed {removed_name}", actor.display_name),
            serde_json::json!({ "removed_user_id": target.user_id }),
        )
        .await?;
    Ok(())
}

/// Change a member's role. Capabilities are recomputed from the new role.
pub async fn update_member_role(
    ctx: &AppContext,
    actor: &UserRow,
    workspace_id: i64,
    member_id: i64,
    new_role: &str,
) -> ApiResult<MemberRow> {
    get_workspace_or_404(&ctx.storage, workspace_id).await?;
    let acting = require_admin(&ctx.storage, workspace_id, actor.id).await?;
    let target = ctx
        .storage
        .get_member(member_id)
        .await?
        .filter(|m| m.workspace_id == workspace_id)
        .ok_or(ApiError::NotFound("member"))?;
    let role = Role::from_str(new_role)?;
    if !role.invitable() {
        return Err(ApiError::InvalidInput(
            "ownership cannot be assigned here".into(),
        ));
    }
    if Role::from_str(&target.role)? == Role::Owner {
        return Err(ApiError::InvalidState(
            "the owner's role cannot be changed".into(),
        ));
    }
    if Role::from_str(&acting.role)? != Role::Owner && role == Role::Admin {
        return Err(ApiError::Forbidden("only the owner may promote to admin".into()));
    }
    let (can_edit, can_invite) = role.capabilities();
    ctx.storage
        .update_member_role(target.id, role.as_str(), can_edit, can_invite)
        .await?;
    ctx.storage
        .get_member(target.id)
        .await?
        .ok_or(ApiError::NotFound("member"))
}

/// Join a public workspace directly, no invite needed. The capacity check
/// and the insert are one guarded statement.
pub async fn join_public(
    ctx: &AppContext,
    user: &UserRow,
    workspace_id: i64,
) -> ApiResult<WorkspaceView> {
    let row = get_workspace_or_404(&ctx.storage, workspace_id).await?;
    if !row.is_public {
        return Err(ApiError::Forbidden("this workspace is private".into()));
    }
    if ctx
        .storage
        .get_membership(workspace_id, user.id)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("already a member".into()));
    }
    let (can_edit, can_invite) = Role::Member.capabilities();
    let joined = ctx
        .storage
        .try_insert_member(workspace_id, user.id, Role::Member.as_str(), can_edit, can_invite)
        .await?;
    if !joined {
        return Err(ApiError::CapacityExceeded);
    }
    ctx.activity
        .record(
            workspace_id,
            Some(user.id),
            ActivityKind::MemberJoined,
            format!("{} joined the workspace", user.display_name),
            serde_json::json!({ "role": "member" }),
        )
        .await?;
    view_of(&ctx.storage, row, user.id).await
}

// ─── Invites ─────────────────────────────────────────────────────────────────

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn invite_is_expired(invite: &InviteRow) -> bool {
    parse_rfc3339(&invite.expires_at).is_some_and(|t| t < Utc::now())
}

/// Flip a pending invite to `expired` once its deadline has passed.
/// Returns the refreshed row.
async fn lazily_expire(storage: &Storage, invite: InviteRow) -> ApiResult<InviteRow> {
    if invite.status == "pending" && invite_is_expired(&invite) {
        storage.mark_invite(invite.id, "expired", None).await?;
        let refreshed = storage
            .get_invite_by_token(&invite.token)
            .await?
            .ok_or(ApiError::NotFound("invite"))?;
        return Ok(refreshed);
    }
    Ok(invite)
}

pub async fn create_invite(
    ctx: &AppContext,
    actor: &UserRow,
    workspace_id: i64,
    input: CreateInviteInput,
) -> ApiResult<InviteRow> {
    let workspace = get_workspace_or_404(&ctx.storage, workspace_id).await?;
    let acting = require_member(&ctx.storage, workspace_id, actor.id).await?;
    if !acting.can_invite {
        return Err(ApiError::Forbidden("requires invite permission".into()));
    }
    let email = input.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::InvalidInput("valid email is required".into()));
    }
    let role = Role::from_str(&input.role)?;
    if !role.invitable() {
        return Err(ApiError::InvalidInput(
            "ownership cannot be granted by invite".into(),
        ));
    }
    if ctx.storage.member_count(workspace_id).await? >= workspace.max_members {
        return Err(ApiError::CapacityExceeded);
    }
    // Reject if the address already resolves to a member.
    if let Some(existing) = ctx.storage.lookup_user_by_email(&email).await? {
        if ctx
            .storage
            .get_membership(workspace_id, existing.id)
            .await?
            .is_some()
        {
            return Err(ApiError::Conflict(format!("{email} is already a member")));
        }
    }
    if let Some(pending) = ctx.storage.find_pending_invite(workspace_id, &email).await? {
        // An expired-but-unflipped invite does not block a fresh one.
        let pending = lazily_expire(&ctx.storage, pending).await?;
        if pending.status == "pending" {
            return Err(ApiError::Conflict(format!(
                "{email} already has a pending invite"
            )));
        }
    }
    let token = generate_token();
    let expires_at =
        (Utc::now() + Duration::days(ctx.config.invite_expiry_days)).to_rfc3339();
    let invite = ctx
        .storage
        .create_invite(
            workspace_id,
            &email,
            actor.id,
            &token,
            role.as_str(),
            &expires_at,
        )
        .await?;
    tracing::info!(workspace_id, invite_id = invite.id, "invite created");
    Ok(invite)
}

pub async fn list_invites(
    ctx: &AppContext,
    actor: &UserRow,
    workspace_id: i64,
) -> ApiResult<Vec<InviteRow>> {
    get_workspace_or_404(&ctx.storage, workspace_id).await?;
    let acting = require_member(&ctx.storage, workspace_id, actor.id).await?;
    if !acting.can_invite {
        return Err(ApiError::Forbidden("requires invite permission".into()));
    }
    let rows = ctx.storage.list_invites(workspace_id).await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(lazily_expire(&ctx.storage, row).await?);
    }
    Ok(out)
}

pub async fn revoke_invite(
    ctx: &AppContext,
    actor: &UserRow,
    workspace_id: i64,
    invite_id: i64,
) -> ApiResult<()> {
    get_workspace_or_404(&ctx.storage, workspace_id).await?;
    let acting = require_member(&ctx.storage, workspace_id, actor.id).await?;
    if !acting.can_invite {
        return Err(ApiError::Forbidden("requires invite permission".into()));
    }
    let invite = ctx
        .storage
        .get_invite_in_workspace(invite_id, workspace_id)
        .await?
        .ok_or(ApiError::NotFound("invite"))?;
    let invite = lazily_expire(&ctx.storage, invite).await?;
    if invite.status != "pending" {
        return Err(ApiError::InvalidState(format!(
            "invite is {}, only pending invites can be revoked",
            invite.status
        )));
    }
    ctx.storage
        .mark_invite(invite.id, "revoked", Some(&Utc::now().to_rfc3339()))
        .await?;
    Ok(())
}

/// Unauthenticated-safe preview for the invite landing page.
pub async fn preview_invite(ctx: &AppContext, token: &str) -> ApiResult<InvitePreview> {
    let invite = ctx
        .storage
        .get_invite_by_token(token)
        .await?
        .ok_or(ApiError::NotFound("invite"))?;
    let invite = lazily_expire(&ctx.storage, invite).await?;
    let workspace = get_workspace_or_404(&ctx.storage, invite.workspace_id).await?;
    Ok(InvitePreview {
        workspace_id: workspace.id,
        workspace_name: workspace.name,
        email: invite.email,
        role: invite.role,
        status: invite.status,
        expires_at: invite.expires_at,
    })
}

/// Accept an invite. Check order is fixed: existence, state, expiry,
/// addressee, then capacity. The membership insert and the status flip are
/// one transaction.
pub async fn accept_invite(
    ctx: &AppContext,
    user: &UserRow,
    token: &str,
) -> ApiResult<WorkspaceView> {
    let invite = ctx
        .storage
        .get_invite_by_token(token)
        .await?
        .ok_or(ApiError::NotFound("invite"))?;
    if invite.status != "pending" {
        return Err(ApiError::InvalidState(format!(
            "invite is {}",
            invite.status
        )));
    }
    if invite_is_expired(&invite) {
        ctx.storage.mark_invite(invite.id, "expired", None).await?;
        return Err(ApiError::Expired);
    }
    if !invite.email.eq_ignore_ascii_case(&user.email) {
        return Err(ApiError::Forbidden(
            "this invite is addressed to a different email".into(),
        ));
    }
    if ctx
        .storage
        .get_membership(invite.workspace_id, user.id)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("already a member".into()));
    }
    let role = Role::from_str(&invite.role)?;
    let (can_edit, can_invite) = role.capabilities();
    let joined = ctx
        .storage
        .accept_invite_and_join(
            invite.id,
            invite.workspace_id,
            user.id,
            role.as_str(),
            can_edit,
            can_invite,
        )
        .await?;
    if !joined {
        return Err(ApiError::CapacityExceeded);
    }
    tracing::info!(
        workspace_id = invite.workspace_id,
        user_id = user.id,
        "invite accepted"
    );
    ctx.activity
        .record(
            invite.workspace_id,
            Some(user.id),
            ActivityKind::MemberJoined,
            format!("{} joined the workspace", user.display_name),
            serde_json::json!({ "role": invite.role }),
        )
        .await?;
    let row = get_workspace_or_404(&ctx.storage, invite.workspace_id).await?;
    view_of(&ctx.storage, row, user.id).await
}

pub async fn decline_invite(ctx: &AppContext, user: &UserRow, token: &str) -> ApiResult<()> {
    let invite = ctx
        .storage
        .get_invite_by_token(token)
        .await?
        .ok_or(ApiError::NotFound("invite"))?;
    if invite.status != "pending" {
        return Err(ApiError::InvalidState(format!(
            "invite is {}",
            invite.status
        )));
    }
    if invite_is_expired(&invite) {
        ctx.storage.mark_invite(invite.id, "expired", None).await?;
        return Err(ApiError::Expired);
    }
    if !invite.email.eq_ignore_ascii_case(&user.email) {
        return Err(ApiError::Forbidden(
            "this invite is addressed to a different email".into(),
        ));
    }
    ctx.storage
        .mark_invite(invite.id, "declined", Some(&Utc::now().to_rfc3339()))
        .await?;
    Ok(())
}

/// Shorthand used by feed modules; resolves the workspace and asserts
/// membership in one call.
pub async fn resolve_member(
    ctx: &Arc<AppContext>,
    workspace_id: i64,
    user_id: i64,
) -> ApiResult<MemberRow> {
    get_workspace_or_404(&ctx.storage, workspace_id).await?;
    require_member(&ctx.storage, workspace_id, user_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_follow_role() {
        assert_eq!(Role::Owner.capabilities(), (true, true));
        assert_eq!(Role::Admin.capabilities(), (true, true));
        assert_eq!(Role::Member.capabilities(), (true, false));
        assert_eq!(Role::Viewer.capabilities(), (false, false));
    }

    #[test]
    fn owner_is_not_invitable() {
        assert!(!Role::Owner.invitable());
        assert!(Role::Admin.invitable());
        assert!(Role::Viewer.invitable());
    }

    #[test]
    fn role_parsing_rejects_unknown() {
        assert!(Role::from_str("admin").is_ok());
        assert!(Role::from_str("superuser").is_err());
    }
}
