//! Registration, token issue, and saved-project endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::identity;
use crate::rest::auth::AuthUser;
use crate::AppContext;

#[derive(Deserialize)]
pub struct RegisterInput {
    pub email: String,
    pub display_name: String,
}

pub async fn register(
    State(ctx): State<Arc<AppContext>>,
    Json(input): Json<RegisterInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let user = identity::register_user(&ctx.storage, &input.email, &input.display_name).await?;
    Ok((StatusCode::CREATED, Json(json!({ "user": user }))))
}

#[derive(Deserialize)]
pub struct TokenInput {
    pub email: String,
}

pub async fn issue_token(
    State(ctx): State<Arc<AppContext>>,
    Json(input): Json<TokenInput>,
) -> ApiResult<Json<Value>> {
    let (user, token) = identity::issue_token(&ctx.storage, &input.email).await?;
    Ok(Json(json!({ "user": user, "token": token })))
}

pub async fn me(AuthUser(user): AuthUser) -> Json<Value> {
    Json(json!({ "user": user }))
}

#[derive(Deserialize)]
pub struct CreateProjectInput {
    pub title: String,
    pub duration_hint: Option<String>,
}

pub async fn create_project(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Json(input): Json<CreateProjectInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(ApiError::InvalidInput("title is required".into()));
    }
    let project = ctx
        .storage
        .create_saved_project(user.id, title, input.duration_hint.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "project": project }))))
}

pub async fn get_project(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let project = ctx
        .storage
        .get_saved_project(id)
        .await?
        .filter(|p| p.owner_id == user.id)
        .ok_or(ApiError::NotFound("project"))?;
    Ok(Json(json!({ "project": project })))
}
