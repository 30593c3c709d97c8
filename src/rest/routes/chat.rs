//! Chat endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::chat::{self, PostMessageInput};
use crate::error::ApiResult;
use crate::rest::auth::AuthUser;
use crate::AppContext;

#[derive(Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub before: Option<i64>,
}

pub async fn list(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Value>> {
    let page = chat::list_messages(&ctx, &user, id, page.limit, page.before).await?;
    Ok(Json(json!({ "messages": page.messages, "has_more": page.has_more })))
}

pub async fn post_message(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    Json(input): Json<PostMessageInput>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let message = chat::post_message(&ctx, &user, id, input).await?;
    Ok((StatusCode::CREATED, Json(json!({ "message": message }))))
}

pub async fn remove(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path((id, message_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    chat::delete_message(&ctx, &user, id, message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
