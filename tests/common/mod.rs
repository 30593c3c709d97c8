//! Shared helpers: a real daemon context on a throwaway data directory.
#![allow(dead_code)]

use std::sync::Arc;

use collabd::config::ServerConfig;
use collabd::identity;
use collabd::storage::{Storage, UserRow};
use collabd::workspace::{self, CreateWorkspaceInput, WorkspaceView};
use collabd::AppContext;

pub async fn test_ctx() -> Arc<AppContext> {
    let data_dir = tempfile::tempdir().unwrap().keep();
    let config = Arc::new(ServerConfig::new(
        Some(0),
        Some(0),
        Some(data_dir.clone()),
        Some("warn".to_string()),
    ));
    let storage = Arc::new(Storage::new(&data_dir).await.unwrap());
    Arc::new(AppContext::new(config, storage))
}

pub async fn make_user(ctx: &AppContext, email: &str, name: &str) -> UserRow {
    identity::register_user(&ctx.storage, email, name)
        .await
        .unwrap()
}

pub async fn make_workspace(
    ctx: &AppContext,
    owner: &UserRow,
    name: &str,
    max_members: i64,
) -> WorkspaceView {
    workspace::create_workspace(
        ctx,
        owner,
        CreateWorkspaceInput {
            name: name.to_string(),
            description: String::new(),
            saved_project_id: None,
            is_public: false,
            max_members: Some(max_members),
        },
    )
    .await
    .unwrap()
}

/// Invite `email` and return the raw token.
pub async fn invite(
    ctx: &AppContext,
    actor: &UserRow,
    workspace_id: i64,
    email: &str,
    role: &str,
) -> String {
    workspace::create_invite(
        ctx,
        actor,
        workspace_id,
        workspace::CreateInviteInput {
            email: email.to_string(),
            role: role.to_string(),
        },
    )
    .await
    .unwrap()
    .token
}
