//! Workspace lifecycle, membership, and invite endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ApiResult;
use crate::rest::auth::AuthUser;
use crate::workspace::{self, CreateInviteInput, CreateWorkspaceInput, UpdateWorkspaceInput};
use crate::AppContext;

pub async fn create(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Json(input): Json<CreateWorkspaceInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let view = workspace::create_workspace(&ctx, &user, input).await?;
    Ok((StatusCode::CREATED, Json(json!({ "workspace": view }))))
}

pub async fn list_mine(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Value>> {
    let views = workspace::list_my_workspaces(&ctx, &user).await?;
    Ok(Json(json!({ "workspaces": views })))
}

pub async fn discover(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Value>> {
    let views = workspace::discover_workspaces(&ctx, &user).await?;
    Ok(Json(json!({ "workspaces": views })))
}

pub async fn get(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let view = workspace::get_workspace(&ctx, &user, id).await?;
    Ok(Json(json!({ "workspace": view })))
}

pub async fn update(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<UpdateWorkspaceInput>,
) -> ApiResult<Json<Value>> {
    let view = workspace::update_workspace(&ctx, &user, id, input).await?;
    Ok(Json(json!({ "workspace": view })))
}

pub async fn remove(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    workspace::delete_workspace(&ctx, &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn members(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let members = workspace::list_members(&ctx, &user, id).await?;
    Ok(Json(json!({ "members": members })))
}

pub async fn leave(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    workspace::leave_workspace(&ctx, &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn join(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let view = workspace::join_public(&ctx, &user, id).await?;
    Ok(Json(json!({ "workspace": view })))
}

pub async fn remove_member(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path((id, member_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    workspace::remove_member(&ctx, &user, id, member_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct UpdateRoleInput {
    pub role: String,
}

pub async fn update_member_role(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path((id, member_id)): Path<(i64, i64)>,
    Json(input): Json<UpdateRoleInput>,
) -> ApiResult<Json<Value>> {
    let member = workspace::update_member_role(&ctx, &user, id, member_id, &input.role).await?;
    Ok(Json(json!({ "member": member })))
}

pub async fn create_invite(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<CreateInviteInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let invite = workspace::create_invite(&ctx, &user, id, input).await?;
    Ok((StatusCode::CREATED, Json(json!({ "invite": invite }))))
}

pub async fn list_invites(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let invites = workspace::list_invites(&ctx, &user, id).await?;
    Ok(Json(json!({ "invites": invites })))
}

pub async fn revoke_invite(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path((id, invite_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    workspace::revoke_invite(&ctx, &user, id, invite_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn preview_invite(
    State(ctx): State<Arc<AppContext>>,
    Path(token): Path<String>,
) -> ApiResult<Json<Value>> {
    let preview = workspace::preview_invite(&ctx, &token).await?;
    Ok(Json(json!({ "invite": preview })))
}

pub async fn accept_invite(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(token): Path<String>,
) -> ApiResult<Json<Value>> {
    let view = workspace::accept_invite(&ctx, &user, &token).await?;
    Ok(Json(json!({ "workspace": view })))
}

pub async fn decline_invite(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(token): Path<String>,
) -> ApiResult<StatusCode> {
    workspace::decline_invite(&ctx, &user, &token).await?;
    Ok(StatusCode::NO_CONTENT)
}
