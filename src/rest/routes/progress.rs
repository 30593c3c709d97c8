//! Progress-tracking endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ApiResult;
use crate::progress::{self, AddTaskInput, CustomizeInput, InitializeInput, UpdatePhaseInput};
use crate::rest::auth::AuthUser;
use crate::AppContext;

pub async fn initialize(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(project_id): Path<i64>,
    input: Option<Json<InitializeInput>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let input = input.map(|Json(i)| i).unwrap_or_default();
    let view = progress::initialize(&ctx, &user, project_id, input).await?;
    Ok((StatusCode::CREATED, Json(json!(view))))
}

pub async fn get(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(project_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let view = progress::get_progress(&ctx, &user, project_id).await?;
    Ok(Json(json!(view)))
}

pub async fn customize(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(project_id): Path<i64>,
    Json(input): Json<CustomizeInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let view = progress::customize(&ctx, &user, project_id, input).await?;
    Ok((StatusCode::CREATED, Json(json!(view))))
}

pub async fn update_phase(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(phase_id): Path<i64>,
    Json(input): Json<UpdatePhaseInput>,
) -> ApiResult<Json<Value>> {
    let view = progress::update_phase(&ctx, &user, phase_id, input).await?;
    Ok(Json(json!({ "phase": view })))
}

pub async fn toggle_task(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let view = progress::toggle_task(&ctx, &user, task_id).await?;
    Ok(Json(json!(view)))
}

pub async fn add_task(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Json(input): Json<AddTaskInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let task = progress::add_task(&ctx, &user, input).await?;
    Ok((StatusCode::CREATED, Json(json!({ "task": task }))))
}

pub async fn delete_task(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(task_id): Path<i64>,
) -> ApiResult<StatusCode> {
    progress::delete_task(&ctx, &user, task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
