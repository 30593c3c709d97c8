//! Activity feed endpoint.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ApiResult;
use crate::rest::auth::AuthUser;
use crate::workspace;
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
    workspace::resolve_member(&ctx, id, user.id).await?;
    let feed = ctx
        .activity
        .list(id, page.limit.unwrap_or(50), page.before)
        .await?;
    Ok(Json(json!({ "activity": feed.entries, "has_more": feed.has_more })))
}
