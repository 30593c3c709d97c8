//! File endpoints. Uploads arrive as multipart form data with a `file`
//! part and an optional `description` part.

use axum::{
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::files;
use crate::rest::auth::AuthUser;
use crate::AppContext;

pub async fn list(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let rows = files::list(&ctx, &user, id).await?;
    Ok(Json(json!({ "files": rows })))
}

pub async fn upload(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;
    let mut description = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidInput(format!("malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(str::to_owned)
                    .ok_or_else(|| ApiError::InvalidInput("file part needs a filename".into()))?;
                let content_type = field.content_type().map(str::to_owned);
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::PayloadTooLarge)?;
                file = Some((filename, content_type, data.to_vec()));
            }
            Some("description") => {
                description = field
                    .text()
                    .await
                    .map_err(|e| ApiError::InvalidInput(format!("bad description: {e}")))?;
            }
            _ => {}
        }
    }

    let (filename, content_type, data) =
        file.ok_or_else(|| ApiError::InvalidInput("a file part is required".into()))?;
    let row = files::upload(
        &ctx,
        &user,
        id,
        &filename,
        content_type.as_deref(),
        &description,
        &data,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(json!({ "file": row }))))
}

pub async fn download(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path((id, file_id)): Path<(i64, i64)>,
) -> ApiResult<impl IntoResponse> {
    let resolved = files::download(&ctx, &user, id, file_id).await?;
    let data = tokio::fs::read(&resolved.path)
        .await
        .map_err(anyhow::Error::from)?;

    let mut headers = HeaderMap::new();
    let content_type = resolved
        .file_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    let disposition = format!(
        "attachment; filename=\"{}\"",
        resolved.original_filename.replace('"', "")
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .unwrap_or(HeaderValue::from_static("attachment")),
    );
    Ok((headers, data))
}

pub async fn remove(
    State(ctx): State<Arc<AppContext>>,
    AuthUser(user): AuthUser,
    Path((id, file_id)): Path<(i64, i64)>,
) -> ApiResult<StatusCode> {
    files::delete(&ctx, &user, id, file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
