//! Upload validation, blob layout, and file deletion.

mod common;

use std::sync::Arc;

use collabd::config::ServerConfig;
use collabd::error::ApiError;
use collabd::files;
use collabd::storage::Storage;
use collabd::workspace;
use collabd::AppContext;
use common::*;

#[tokio::test]
async fn uploads_land_under_the_workspace_directory() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let ws = make_workspace(&ctx, &alice, "FYP", 10).await;

    let row = files::upload(
        &ctx,
        &alice,
        ws.id,
        "report.pdf",
        Some("application/pdf"),
        "weekly report",
        b"%PDF-1.4 fake",
    )
    .await
    .unwrap();

    assert_eq!(row.original_filename, "report.pdf");
    assert_ne!(row.filename, "report.pdf");
    assert!(row.filename.ends_with(".pdf"));
    assert_eq!(row.file_size, 13);
    assert_eq!(row.description, "weekly report");

    let blob = std::path::Path::new(&row.file_path);
    assert!(blob.starts_with(ctx.config.workspace_upload_dir(ws.id)));
    assert_eq!(std::fs::read(blob).unwrap(), b"%PDF-1.4 fake");

    // The upload shows up in the activity feed.
    let feed = ctx.activity.list(ws.id, 10, None).await.unwrap();
    assert_eq!(feed.entries[0].activity_type, "file_uploaded");

    let download = files::download(&ctx, &alice, ws.id, row.id).await.unwrap();
    assert_eq!(download.original_filename, "report.pdf");
}

#[tokio::test]
async fn disallowed_extensions_never_touch_the_disk() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let ws = make_workspace(&ctx, &alice, "FYP", 10).await;

    for name in ["malware.exe", "script.sh", "noextension", "dot."] {
        let err = files::upload(&ctx, &alice, ws.id, name, None, "", b"data")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)), "{name} should be rejected");
    }
    assert!(!ctx.config.workspace_upload_dir(ws.id).exists());
}

#[tokio::test]
async fn the_size_cap_comes_from_config() {
    // A config.toml in the data dir lowers the cap to 16 bytes.
    let data_dir = tempfile::tempdir().unwrap().keep();
    std::fs::write(data_dir.join("config.toml"), "max_upload_bytes = 16\n").unwrap();
    let config = Arc::new(ServerConfig::new(
        Some(0),
        Some(0),
        Some(data_dir.clone()),
        Some("warn".to_string()),
    ));
    assert_eq!(config.max_upload_bytes, 16);
    let storage = Arc::new(Storage::new(&data_dir).await.unwrap());
    let ctx = Arc::new(AppContext::new(config, storage));

    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let ws = make_workspace(&ctx, &alice, "FYP", 10).await;

    files::upload(&ctx, &alice, ws.id, "tiny.txt", None, "", b"0123456789")
        .await
        .unwrap();
    let err = files::upload(&ctx, &alice, ws.id, "big.txt", None, "", &[0u8; 17])
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::PayloadTooLarge));
}

#[tokio::test]
async fn viewers_cannot_upload_but_can_download() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let eve = make_user(&ctx, "eve@example.com", "Eve").await;
    let ws = make_workspace(&ctx, &alice, "FYP", 10).await;
    let token = invite(&ctx, &alice, ws.id, "eve@example.com", "viewer").await;
    workspace::accept_invite(&ctx, &eve, &token).await.unwrap();

    let err = files::upload(&ctx, &eve, ws.id, "notes.md", None, "", b"# notes")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    let row = files::upload(&ctx, &alice, ws.id, "notes.md", None, "", b"# notes")
        .await
        .unwrap();
    files::download(&ctx, &eve, ws.id, row.id).await.unwrap();
}

#[tokio::test]
async fn deletion_removes_the_row_and_the_blob() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let bob = make_user(&ctx, "bob@example.com", "Bob").await;
    let ws = make_workspace(&ctx, &alice, "FYP", 10).await;
    let token = invite(&ctx, &alice, ws.id, "bob@example.com", "member").await;
    workspace::accept_invite(&ctx, &bob, &token).await.unwrap();

    let row = files::upload(&ctx, &bob, ws.id, "draft.docx", None, "", b"chapter one")
        .await
        .unwrap();

    // Alice didn't upload it, but she's the owner.
    files::delete(&ctx, &alice, ws.id, row.id).await.unwrap();
    assert!(ctx.storage.get_file(row.id).await.unwrap().is_none());
    assert!(!std::path::Path::new(&row.file_path).exists());

    let feed = ctx.activity.list(ws.id, 10, None).await.unwrap();
    assert_eq!(feed.entries[0].activity_type, "file_deleted");
}

#[tokio::test]
async fn uploaders_who_are_plain_members_cannot_delete_others_files() {
    let ctx = test_ctx().await;
    let alice = make_user(&ctx, "alice@example.com", "Alice").await;
    let bob = make_user(&ctx, "bob@example.com", "Bob").await;
    let ws = make_workspace(&ctx, &alice, "FYP", 10).await;
    let token = invite(&ctx, &alice, ws.id, "bob@example.com", "member").await;
    workspace::accept_invite(&ctx, &bob, &token).await.unwrap();

    let row = files::upload(&ctx, &alice, ws.id, "notes.txt", None, "", b"v1")
        .await
        .unwrap();
    let err = files::delete(&ctx, &bob, ws.id, row.id).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
}
