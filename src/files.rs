//! Workspace file sharing.
//!
//! Uploads are stored under `{data_dir}/uploads/workspace_{id}/` with a
//! generated UUID name; the original name only survives in the database.
//! The extension allow-list and size cap are enforced before anything
//! touches the disk.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::Serialize;
use uuid::Uuid;

use crate::activity::ActivityKind;
use crate::error::{ApiError, ApiResult};
use crate::realtime::ServerEvent;
use crate::storage::{FileRow, UserRow};
use crate::workspace::{self, Role};
use crate::AppContext;

static ALLOWED_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "txt", "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "png", "jpg", "jpeg",
        "gif", "svg", "zip", "rar", "7z", "mp4", "avi", "mov", "py", "js", "html", "css",
        "json", "xml", "md", "csv",
    ]
    .into_iter()
    .collect()
});

/// Lower-cased extension of a filename, if it has one.
fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn extension_allowed(filename: &str) -> bool {
    extension_of(filename).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(ext.as_str()))
}

#[derive(Debug, Serialize)]
pub struct FileDownload {
    pub path: PathBuf,
    pub original_filename: String,
    pub file_type: Option<String>,
}

/// Validate and persist an upload, then announce it.
pub async fn upload(
    ctx: &AppContext,
    user: &UserRow,
    workspace_id: i64,
    original_filename: &str,
    content_type: Option<&str>,
    description: &str,
    data: &[u8],
) -> ApiResult<FileRow> {
    workspace::get_workspace_or_404(&ctx.storage, workspace_id).await?;
    workspace::require_editor(&ctx.storage, workspace_id, user.id).await?;

    let original_filename = original_filename.trim();
    if original_filename.is_empty() {
        return Err(ApiError::InvalidInput("filename is required".into()));
    }
    let ext = extension_of(original_filename)
        .filter(|ext| ALLOWED_EXTENSIONS.contains(ext.as_str()))
        .ok_or_else(|| {
            ApiError::InvalidInput(format!("file type of {original_filename:?} is not allowed"))
        })?;
    if data.is_empty() {
        return Err(ApiError::InvalidInput("file is empty".into()));
    }
    if data.len() as u64 > ctx.config.max_upload_bytes {
        return Err(ApiError::PayloadTooLarge);
    }

    let stored_name = format!("{}.{ext}", Uuid::new_v4());
    let dir = ctx.config.workspace_upload_dir(workspace_id);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(anyhow::Error::from)?;
    let path = dir.join(&stored_name);
    tokio::fs::write(&path, data)
        .await
        .map_err(anyhow::Error::from)?;

    let row = match ctx
        .storage
        .create_file(
            workspace_id,
            user.id,
            &stored_name,
            original_filename,
            data.len() as i64,
            content_type,
            &path.to_string_lossy(),
            description.trim(),
        )
        .await
    {
        Ok(row) => row,
        Err(err) => {
            // Orphaned blob cleanup; the row is the source of truth.
            let _ = tokio::fs::remove_file(&path).await;
            return Err(err.into());
        }
    };

    tracing::info!(workspace_id, file_id = row.id, size = row.file_size, "file uploaded");
    ctx.activity
        .record(
            workspace_id,
            Some(user.id),
            ActivityKind::FileUploaded,
            format!("{} uploaded {original_filename}", user.display_name),
            serde_json::json!({ "file_id": row.id, "filename": original_filename }),
        )
        .await?;
    let event = ServerEvent::NewFile {
        workspace_id,
        file: serde_json::to_value(&row).map_err(anyhow::Error::from)?,
    };
    ctx.rooms.broadcast(workspace_id, &event.to_frame());
    Ok(row)
}

pub async fn list(
    ctx: &AppContext,
    user: &UserRow,
    workspace_id: i64,
) -> ApiResult<Vec<FileRow>> {
    workspace::get_workspace_or_404(&ctx.storage, workspace_id).await?;
    workspace::require_member(&ctx.storage, workspace_id, user.id).await?;
    Ok(ctx.storage.list_files(workspace_id).await?)
}

/// Resolve a download. The caller streams the blob from `path`.
pub async fn download(
    ctx: &AppContext,
    user: &UserRow,
    workspace_id: i64,
    file_id: i64,
) -> ApiResult<FileDownload> {
    workspace::get_workspace_or_404(&ctx.storage, workspace_id).await?;
    workspace::require_member(&ctx.storage, workspace_id, user.id).await?;
    let row = ctx
        .storage
        .get_file(file_id)
        .await?
        .filter(|f| f.workspace_id == workspace_id)
        .ok_or(ApiError::NotFound("file"))?;
    let path = PathBuf::from(&row.file_path);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        tracing::warn!(file_id, path = %path.display(), "file row has no blob on disk");
        return Err(ApiError::NotFound("file"));
    }
    Ok(FileDownload {
        path,
        original_filename: row.original_filename,
        file_type: row.file_type,
    })
}

/// Delete a file. Allowed for its uploader and for workspace admins. The
/// row goes first; a failed blob removal is logged, not surfaced.
pub async fn delete(
    ctx: &AppContext,
    user: &UserRow,
    workspace_id: i64,
    file_id: i64,
) -> ApiResult<()> {
    workspace::get_workspace_or_404(&ctx.storage, workspace_id).await?;
    let member = workspace::require_member(&ctx.storage, workspace_id, user.id).await?;
    let row = ctx
        .storage
        .get_file(file_id)
        .await?
        .filter(|f| f.workspace_id == workspace_id)
        .ok_or(ApiError::NotFound("file"))?;
    let is_uploader = row.uploaded_by == user.id;
    let is_admin = Role::from_str(&member.role)?.is_admin();
    if !is_uploader && !is_admin {
        return Err(ApiError::Forbidden(
            "only the uploader or an admin may delete a file".into(),
        ));
    }
    ctx.storage.delete_file(file_id).await?;
    if let Err(err) = tokio::fs::remove_file(&row.file_path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(file_id, error = %err, "failed to remove file blob");
        }
    }
    ctx.activity
        .record(
            workspace_id,
            Some(user.id),
            ActivityKind::FileDeleted,
            format!("{} deleted {}", user.display_name, row.original_filename),
            serde_json::json!({ "filename": row.original_filename }),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_allow_list() {
        assert!(extension_allowed("report.pdf"));
        assert!(extension_allowed("photo.JPG"));
        assert!(!extension_allowed("archive.tar.gz"));
        assert!(!extension_allowed("malware.exe"));
        assert!(!extension_allowed("noextension"));
        assert!(!extension_allowed("trailingdot."));
    }
}
